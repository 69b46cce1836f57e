use clap::{Args, Parser, Subcommand};
use crate::tvm::{BocOptions, Cell, CellKind, boc_to_base64, boc_to_hex, deserialize_boc};
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// boc-tool CLI
#[derive(Parser, Debug)]
#[command(name = "boc-tool")]
#[command(about = "Inspect and re-encode Bags of Cells", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Where the BoC text comes from
#[derive(Args, Debug)]
pub struct Input {
    /// BoC as base64 or hex
    #[arg(required_unless_present = "file")]
    pub boc: Option<String>,
    /// Read the BoC text from a file instead
    #[arg(short = 'f', long, conflicts_with = "boc")]
    pub file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print every root as an indented cell tree
    Inspect {
        #[command(flatten)]
        input: Input,
        /// Print a JSON document instead of the tree
        #[arg(long)]
        json: bool,
    },
    /// Print hashes and depths of every root at each level
    Hash {
        #[command(flatten)]
        input: Input,
    },
    /// Decode and serialize again in canonical order
    Reencode {
        #[command(flatten)]
        input: Input,
        /// Write the offset index
        #[arg(long)]
        index: bool,
        /// Append a CRC32C checksum
        #[arg(long)]
        crc32: bool,
        /// Print hex instead of base64
        #[arg(long)]
        hex: bool,
    },
}

/// JSON view of one distinct cell; `refs` are indices into `DagView::cells`
#[derive(Serialize, Debug)]
struct CellView {
    index: usize,
    kind: CellKind,
    bit_len: usize,
    data: String,
    level_mask: u8,
    hash: String,
    depth: u16,
    refs: Vec<usize>,
}

/// JSON view of a whole BoC, listing every distinct cell once
#[derive(Serialize, Debug, Default)]
struct DagView {
    roots: Vec<usize>,
    cells: Vec<CellView>,
}

impl DagView {
    fn new(roots: &[Arc<Cell>]) -> Self {
        let mut view = DagView::default();
        let mut seen = HashMap::new();
        for root in roots {
            let index = view.visit(root, &mut seen);
            view.roots.push(index);
        }
        view
    }

    fn visit(&mut self, cell: &Arc<Cell>, seen: &mut HashMap<[u8; 32], usize>) -> usize {
        if let Some(&index) = seen.get(&cell.repr_hash()) {
            return index;
        }
        let index = self.cells.len();
        seen.insert(cell.repr_hash(), index);
        self.cells.push(CellView {
            index,
            kind: cell.kind(),
            bit_len: cell.bit_len(),
            data: cell.bits().to_string(),
            level_mask: cell.level_mask().value(),
            hash: hex::encode(cell.hash()),
            depth: cell.depth(),
            refs: Vec::new(),
        });
        let refs = cell.references().iter().map(|r| self.visit(r, seen)).collect();
        self.cells[index].refs = refs;
        index
    }
}

/// Decodes hex when the text only has hex digits, base64 otherwise
fn decode_text(text: &str) -> Result<Vec<u8>> {
    use base64::Engine;
    let text: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    if !text.is_empty() && text.len() % 2 == 0 && text.chars().all(|c| c.is_ascii_hexdigit()) {
        return hex::decode(&text).context("invalid hex BoC");
    }
    base64::engine::general_purpose::STANDARD
        .decode(&text)
        .or_else(|_| base64::engine::general_purpose::URL_SAFE.decode(&text))
        .context("BoC is neither hex nor base64")
}

impl Input {
    fn read(&self) -> Result<Vec<Arc<Cell>>> {
        let text = match (&self.boc, &self.file) {
            (_, Some(path)) => std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?,
            (Some(boc), None) => boc.clone(),
            (None, None) => anyhow::bail!("no BoC given"),
        };
        let bytes = decode_text(&text)?;
        log::debug!("decoding {} BoC bytes", bytes.len());
        Ok(deserialize_boc(&bytes)?)
    }
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Execute the command
    pub fn execute(&self) -> Result<()> {
        match &self.command {
            Commands::Inspect { input, json } => self.execute_inspect(input, *json),
            Commands::Hash { input } => self.execute_hash(input),
            Commands::Reencode {
                input,
                index,
                crc32,
                hex,
            } => self.execute_reencode(
                input,
                BocOptions {
                    include_index: *index,
                    include_crc32: *crc32,
                },
                *hex,
            ),
        }
    }

    fn execute_inspect(&self, input: &Input, json: bool) -> Result<()> {
        let roots = input.read()?;
        if json {
            let view = DagView::new(&roots);
            println!("{}", serde_json::to_string_pretty(&view)?);
            return Ok(());
        }
        for (i, root) in roots.iter().enumerate() {
            println!("root #{i}: hash {} depth {}", hex::encode(root.hash()), root.depth());
            println!("{root}");
        }
        Ok(())
    }

    fn execute_hash(&self, input: &Input) -> Result<()> {
        let roots = input.read()?;
        for (i, root) in roots.iter().enumerate() {
            println!("root #{i} ({:?}, level {})", root.kind(), root.level());
            for level in 0..=3 {
                println!(
                    "  level {level}: {} depth {}",
                    hex::encode(root.hash_at(level)),
                    root.depth_at(level)
                );
            }
        }
        Ok(())
    }

    fn execute_reencode(&self, input: &Input, options: BocOptions, hex: bool) -> Result<()> {
        let roots = input.read()?;
        let encoded = if hex {
            boc_to_hex(&roots, options)?
        } else {
            boc_to_base64(&roots, options)?
        };
        log::info!("re-encoded {} roots with {:?}", roots.len(), options);
        println!("{encoded}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_text_detects_format() {
        let from_b64 = decode_text("te6ccgEBAQEAAgAAAA==").unwrap();
        let from_hex = decode_text("b5ee9c72 0101010100020000 00").unwrap();
        assert_eq!(from_b64, from_hex);
        assert!(decode_text("not a boc!").is_err());
    }

    #[test]
    fn test_input_reads_roots() {
        let input = Input {
            boc: Some("te6ccgEBAgEADQABCDreaLEBAAgHW80V".to_string()),
            file: None,
        };
        let roots = input.read().unwrap();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].reference_count(), 1);
    }

    #[test]
    fn test_cell_view_json() {
        let roots = Input {
            boc: Some("te6ccgEBAQEABgAACAdbzRU=".to_string()),
            file: None,
        }
        .read()
        .unwrap();
        let json = serde_json::to_value(DagView::new(&roots)).unwrap();
        assert_eq!(json["roots"], serde_json::json!([0]));
        let cell = &json["cells"][0];
        assert_eq!(cell["kind"], "Ordinary");
        assert_eq!(cell["bit_len"], 32);
        assert_eq!(cell["data"], "075BCD15");
        assert_eq!(cell["refs"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn test_dag_view_lists_shared_cells_once() {
        let mut cell = Arc::new(Cell::empty());
        for _ in 0..40 {
            let mut builder = crate::tvm::Builder::new();
            for _ in 0..4 {
                builder.store_ref(cell.clone()).unwrap();
            }
            cell = builder.end_cell().unwrap();
        }
        let view = DagView::new(&[cell.clone(), cell]);
        assert_eq!(view.roots, vec![0, 0]);
        assert_eq!(view.cells.len(), 41);
        assert_eq!(view.cells[0].refs, vec![1; 4]);
        assert!(view.cells[40].refs.is_empty());
    }

    #[test]
    fn test_cli_parses_reencode() {
        let cli = Cli::try_parse_from(["boc-tool", "reencode", "te6ccgEBAQEAAgAAAA==", "--crc32"]).unwrap();
        match cli.command {
            Commands::Reencode { crc32, index, hex, .. } => {
                assert!(crc32);
                assert!(!index);
                assert!(!hex);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
