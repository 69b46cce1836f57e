//! Bag of Cells (BoC) serialization and deserialization
//!
//! BoC is a serialization format that encodes cells into byte arrays.
//! Cells are stored once each, parents before children, and reference
//! each other by index.
//!
//! Generic layout (`b5ee9c72`):
//!
//! ```text
//! magic:u32 flags:u8 off_bytes:u8 cells:size roots:size absent:size
//! tot_cells_size:off_bytes root_list:[size; roots] index:[off_bytes; cells]?
//! cell_data:[u8; tot_cells_size] crc32c:u32le?
//! ```
//!
//! where `flags = has_idx << 7 | has_crc32c << 6 | has_cache_bits << 5 | size`.

use crate::crc::CRC32C;
use crate::tvm::bitstring::BitString;
use crate::tvm::cell::{Cell, CellKind, HASH_BYTES, MAX_CELL_BITS, MAX_CELL_REFS};
use crate::tvm::error::{CellError, Result};
use crate::tvm::level_mask::LevelMask;
use base64::Engine;
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use bytes::Bytes;
use log::{debug, trace};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// BoC magic number for standard format
const BOC_GENERIC_MAGIC: u32 = 0xb5ee9c72;

/// BoC magic number for the legacy indexed format
const BOC_INDEXED_MAGIC: u32 = 0x68ff65f3;

/// BoC magic number for the legacy indexed format with CRC32C
const BOC_INDEXED_CRC32C_MAGIC: u32 = 0xacc3a728;

const FLAG_INDEX: u8 = 0x80;
const FLAG_CRC32C: u8 = 0x40;
const FLAG_CACHE_BITS: u8 = 0x20;
const FLAGS_RESERVED: u8 = 0x18;

const DEPTH_BYTES: usize = 2;

/// Serializer options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BocOptions {
    /// Write the per-cell offset index
    pub include_index: bool,
    /// Append a CRC32C of everything before it
    pub include_crc32: bool,
}

/// Serializes one or more root cells and everything under them
pub fn serialize_boc(roots: &[Arc<Cell>], options: BocOptions) -> Result<Vec<u8>> {
    if roots.is_empty() {
        return Err(CellError::format(0, "no root cells to serialize"));
    }

    let (cells, root_indices) = topological_order(roots);
    let indices: HashMap<[u8; HASH_BYTES], usize> = cells
        .iter()
        .enumerate()
        .map(|(i, cell)| (cell.repr_hash(), i))
        .collect();

    let size_bytes = bytes_needed(cells.len());

    let mut cells_data = Vec::new();
    let mut offsets = Vec::with_capacity(cells.len());
    for (i, cell) in cells.iter().enumerate() {
        serialize_cell(&mut cells_data, cell, &indices, size_bytes);
        offsets.push(cells_data.len());
        trace!(
            "cell #{i}: {} bits, {} refs, hash {}",
            cell.bit_len(),
            cell.reference_count(),
            hex::encode(cell.hash())
        );
    }

    let offset_bytes = bytes_needed(cells_data.len());

    let mut result = Vec::with_capacity(
        6 + (3 + roots.len()) * size_bytes
            + (1 + offsets.len() * options.include_index as usize) * offset_bytes
            + cells_data.len()
            + 4,
    );
    result.extend_from_slice(&BOC_GENERIC_MAGIC.to_be_bytes());

    let mut flags = size_bytes as u8;
    if options.include_index {
        flags |= FLAG_INDEX;
    }
    if options.include_crc32 {
        flags |= FLAG_CRC32C;
    }
    result.push(flags);
    result.push(offset_bytes as u8);

    write_uint(&mut result, cells.len(), size_bytes);
    write_uint(&mut result, root_indices.len(), size_bytes);
    // Absent cells
    write_uint(&mut result, 0, size_bytes);
    write_uint(&mut result, cells_data.len(), offset_bytes);
    for &index in &root_indices {
        write_uint(&mut result, index, size_bytes);
    }

    if options.include_index {
        for &offset in &offsets {
            write_uint(&mut result, offset, offset_bytes);
        }
    }

    result.extend_from_slice(&cells_data);

    if options.include_crc32 {
        let crc = CRC32C.checksum(&result);
        let start = result.len();
        result.resize(start + 4, 0);
        LittleEndian::write_u32(&mut result[start..], crc);
    }

    debug!(
        "serialized BoC: {} cells, {} roots, {} bytes",
        cells.len(),
        root_indices.len(),
        result.len()
    );
    Ok(result)
}

/// Deserializes a Bag of Cells into its root cells
pub fn deserialize_boc(data: &[u8]) -> Result<Vec<Arc<Cell>>> {
    let header = Header::parse(data)?;

    let cells_end = header.data_offset + header.data_size;
    if header.has_crc32c {
        let stored = LittleEndian::read_u32(&data[cells_end..cells_end + 4]);
        let computed = CRC32C.checksum(&data[..cells_end]);
        if stored != computed {
            return Err(CellError::ChecksumMismatch {
                offset: cells_end,
                stored,
                computed,
            });
        }
    }

    let buffer = Bytes::copy_from_slice(&data[..cells_end]);
    let raw_cells = parse_cells(&buffer, &header)?;
    let cells = build_cells(raw_cells)?;

    let roots = header
        .root_indices
        .iter()
        .map(|&i| cells[i].clone())
        .collect::<Vec<_>>();

    debug!(
        "deserialized BoC: {} cells, {} roots, {} bytes",
        cells.len(),
        roots.len(),
        data.len()
    );
    Ok(roots)
}

/// Deserializes a BoC that must contain exactly one root
pub fn deserialize_boc_single(data: &[u8]) -> Result<Arc<Cell>> {
    let mut roots = deserialize_boc(data)?;
    if roots.len() != 1 {
        return Err(CellError::format(
            0,
            format!("expected a single root, found {}", roots.len()),
        ));
    }
    Ok(roots.remove(0))
}

/// Parsed and bounds-checked BoC header
#[derive(Debug)]
struct Header {
    has_crc32c: bool,
    size_bytes: usize,
    cell_count: usize,
    root_indices: Vec<usize>,
    data_offset: usize,
    data_size: usize,
}

impl Header {
    fn parse(data: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(data);
        let magic = reader.read_uint(4, "magic")? as u32;
        let flags = reader.read_uint(1, "flags")? as u8;

        let (has_index, has_crc32c, has_roots) = match magic {
            BOC_GENERIC_MAGIC => {
                if flags & FLAGS_RESERVED != 0 {
                    return Err(CellError::format(4, format!("reserved flags set in {flags:#04x}")));
                }
                if flags & FLAG_CACHE_BITS != 0 && flags & FLAG_INDEX == 0 {
                    return Err(CellError::format(4, "cache bits without an index"));
                }
                (flags & FLAG_INDEX != 0, flags & FLAG_CRC32C != 0, true)
            }
            BOC_INDEXED_MAGIC | BOC_INDEXED_CRC32C_MAGIC => {
                // Legacy formats carry a bare size byte
                if flags & !0x07 != 0 {
                    return Err(CellError::format(4, format!("invalid legacy size byte {flags:#04x}")));
                }
                (true, magic == BOC_INDEXED_CRC32C_MAGIC, false)
            }
            other => {
                return Err(CellError::format(0, format!("unknown BoC magic {other:#010x}")));
            }
        };

        let size_bytes = (flags & 0x07) as usize;
        if !(1..=4).contains(&size_bytes) {
            return Err(CellError::format(4, format!("invalid ref size {size_bytes}")));
        }
        let offset_bytes = reader.read_uint(1, "offset size")? as usize;
        if !(1..=8).contains(&offset_bytes) {
            return Err(CellError::format(5, format!("invalid offset size {offset_bytes}")));
        }

        let cell_count = reader.read_uint(size_bytes, "cell count")?;
        let root_count = reader.read_uint(size_bytes, "root count")?;
        let absent_pos = reader.pos;
        let absent_count = reader.read_uint(size_bytes, "absent count")?;
        let data_size = reader.read_uint(offset_bytes, "total cell size")?;

        if root_count == 0 {
            return Err(CellError::format(6 + size_bytes, "BoC has no roots"));
        }
        if absent_count != 0 {
            return Err(CellError::format(absent_pos, "absent cells are not supported"));
        }
        // Every cell takes at least its two descriptor bytes
        if cell_count.saturating_mul(2) > data_size {
            return Err(CellError::format(
                reader.pos,
                format!("{cell_count} cells cannot fit in {data_size} bytes"),
            ));
        }

        if !has_roots && root_count != 1 {
            return Err(CellError::format(
                6 + size_bytes,
                format!("legacy BoC must have one root, found {root_count}"),
            ));
        }

        // Check the declared sizes against the input before allocating anything
        let roots_len = if has_roots { root_count.checked_mul(size_bytes) } else { Some(0) };
        let index_len = if has_index { cell_count.checked_mul(offset_bytes) } else { Some(0) };
        let expected = roots_len
            .zip(index_len)
            .and_then(|(roots, index)| reader.pos.checked_add(roots)?.checked_add(index))
            .and_then(|n| n.checked_add(data_size))
            .and_then(|n| n.checked_add(if has_crc32c { 4 } else { 0 }))
            .ok_or_else(|| CellError::format(reader.pos, "declared BoC size overflows"))?;
        if data.len() < expected {
            return Err(CellError::format(
                data.len(),
                format!("unexpected end of BoC: {} of {expected} bytes", data.len()),
            ));
        }
        if data.len() > expected {
            return Err(CellError::format(
                expected,
                format!("{} trailing bytes", data.len() - expected),
            ));
        }

        let root_indices = if has_roots {
            let mut roots = Vec::with_capacity(root_count);
            for _ in 0..root_count {
                let pos = reader.pos;
                let index = reader.read_uint(size_bytes, "root index")?;
                if index >= cell_count {
                    return Err(CellError::format(
                        pos,
                        format!("root index {index} out of range for {cell_count} cells"),
                    ));
                }
                roots.push(index);
            }
            roots
        } else {
            vec![0]
        };

        if has_index {
            // Offsets are not needed to parse cells sequentially
            reader.take(cell_count * offset_bytes, "index")?;
        }
        let data_offset = reader.pos;

        Ok(Self {
            has_crc32c,
            size_bytes,
            cell_count,
            root_indices,
            data_offset,
            data_size,
        })
    }
}

/// Bounds-checked big-endian reader over the raw BoC
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize, what: &str) -> Result<&'a [u8]> {
        if self.data.len() - self.pos < n {
            return Err(CellError::format(
                self.pos,
                format!("unexpected end of BoC while reading {what}"),
            ));
        }
        let bytes = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    fn read_uint(&mut self, size: usize, what: &str) -> Result<usize> {
        let pos = self.pos;
        let value = BigEndian::read_uint(self.take(size, what)?, size);
        usize::try_from(value)
            .map_err(|_| CellError::format(pos, format!("{what} {value} does not fit in usize")))
    }
}

/// Cell as read from the stream, before its references are resolved
struct RawCell {
    kind: CellKind,
    bits: BitString,
    references: Vec<usize>,
    level_mask: LevelMask,
    offset: usize,
}

fn parse_cells(buffer: &Bytes, header: &Header) -> Result<Vec<RawCell>> {
    let end = header.data_offset + header.data_size;
    let mut pos = header.data_offset;
    let mut cells = Vec::with_capacity(header.cell_count);

    for index in 0..header.cell_count {
        let start = pos;
        let truncated = || CellError::cell_format(index, start, "cell data exceeds total size");
        if end - pos < 2 {
            return Err(truncated());
        }
        let d1 = buffer[pos];
        let d2 = buffer[pos + 1];
        pos += 2;

        let ref_count = (d1 & 0x07) as usize;
        let is_exotic = d1 & 0x08 != 0;
        let with_hashes = d1 & 0x10 != 0;
        let level_mask = LevelMask::new(d1 >> 5);

        if ref_count > MAX_CELL_REFS {
            return Err(CellError::cell_format(
                index,
                start,
                format!("{ref_count} references (absent cells are not supported)"),
            ));
        }

        if with_hashes {
            // A pruned branch (exotic, no refs, nonzero level) stores only its top hash
            let stored = if is_exotic && ref_count == 0 && level_mask.level() != 0 {
                1
            } else {
                level_mask.hash_count()
            };
            let skip = stored * (HASH_BYTES + DEPTH_BYTES);
            if end - pos < skip {
                return Err(truncated());
            }
            pos += skip;
        }

        let data_len = (d2 as usize).div_ceil(2);
        if end - pos < data_len {
            return Err(truncated());
        }
        let bit_len = if d2 % 2 == 0 {
            data_len * 8
        } else {
            let last = buffer[pos + data_len - 1];
            if last == 0 {
                return Err(CellError::cell_format(
                    index,
                    pos + data_len - 1,
                    "missing completion tag",
                ));
            }
            data_len * 8 - 1 - last.trailing_zeros() as usize
        };
        if bit_len > MAX_CELL_BITS {
            return Err(CellError::cell_format(
                index,
                start,
                format!("{bit_len} bits exceed the cell limit"),
            ));
        }
        let bits = BitString::new(buffer.slice(pos..pos + data_len), 0, bit_len)?;
        pos += data_len;

        let kind = if is_exotic {
            let tag = if bit_len < 8 {
                Err(CellError::MissingExoticTag(bit_len))
            } else {
                CellKind::from_tag(bits.read_uint(0, 8)? as u8)
            };
            tag.map_err(|e| e.in_cell(index, start))?
        } else {
            CellKind::Ordinary
        };

        let refs_len = ref_count * header.size_bytes;
        if end - pos < refs_len {
            return Err(truncated());
        }
        let mut references = Vec::with_capacity(ref_count);
        for r in 0..ref_count {
            let at = pos + r * header.size_bytes;
            let target = BigEndian::read_uint(&buffer[at..at + header.size_bytes], header.size_bytes);
            let target = usize::try_from(target).unwrap_or(usize::MAX);
            if target <= index || target >= header.cell_count {
                return Err(CellError::cell_format(
                    index,
                    at,
                    format!("reference to cell #{target} must point forward within {} cells", header.cell_count),
                ));
            }
            references.push(target);
        }
        pos += refs_len;

        cells.push(RawCell {
            kind,
            bits,
            references,
            level_mask,
            offset: start,
        });
    }

    if pos != end {
        return Err(CellError::format(
            pos,
            format!("{} unused bytes after the last cell", end - pos),
        ));
    }
    Ok(cells)
}

/// Builds cells from the last to the first so every reference is ready
fn build_cells(raw: Vec<RawCell>) -> Result<Vec<Arc<Cell>>> {
    let mut built: Vec<Option<Arc<Cell>>> = vec![None; raw.len()];

    for (index, cell) in raw.into_iter().enumerate().rev() {
        let references = cell
            .references
            .iter()
            .map(|&r| built[r].clone())
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| CellError::cell_format(index, cell.offset, "unresolved reference"))?;

        let result = Cell::new(cell.kind, cell.bits, references)
            .map_err(|e| e.in_cell(index, cell.offset))?;
        if result.level_mask() != cell.level_mask {
            return Err(CellError::LevelMaskMismatch {
                index,
                declared: cell.level_mask.value(),
                computed: result.level_mask().value(),
            });
        }
        trace!("built cell #{index}: {:?}", result);
        built[index] = Some(Arc::new(result));
    }

    Ok(built.into_iter().flatten().collect())
}

/// Cells are identified by `repr_hash` so a pruned branch and the subtree
/// it stands for stay distinct.
///
/// Breadth-first discovery from the roots, then a depth-first post-order
/// (references visited last to first) from each unsorted cell in discovery
/// order. The reversed post-order puts every parent before its children.
fn topological_order(roots: &[Arc<Cell>]) -> (Vec<Arc<Cell>>, Vec<usize>) {
    let mut discovered: Vec<Arc<Cell>> = Vec::new();
    let mut seen: HashMap<[u8; HASH_BYTES], usize> = HashMap::new();
    let mut queue = std::collections::VecDeque::new();
    queue.extend(roots.iter().cloned());

    while let Some(cell) = queue.pop_front() {
        if seen.contains_key(&cell.repr_hash()) {
            continue;
        }
        seen.insert(cell.repr_hash(), discovered.len());
        queue.extend(cell.references().iter().cloned());
        discovered.push(cell);
    }

    let mut sorted = Vec::with_capacity(discovered.len());
    let mut done = vec![false; discovered.len()];
    for start in 0..discovered.len() {
        visit(start, &discovered, &seen, &mut done, &mut sorted);
    }

    let mut positions = vec![0; discovered.len()];
    for (pos, &id) in sorted.iter().rev().enumerate() {
        positions[id] = pos;
    }
    let root_indices = roots
        .iter()
        .map(|root| positions[seen[&root.repr_hash()]])
        .collect();
    let cells = sorted
        .into_iter()
        .rev()
        .map(|id| discovered[id].clone())
        .collect();
    (cells, root_indices)
}

fn visit(
    id: usize,
    discovered: &[Arc<Cell>],
    seen: &HashMap<[u8; HASH_BYTES], usize>,
    done: &mut [bool],
    sorted: &mut Vec<usize>,
) {
    if done[id] {
        return;
    }
    // Cells form a DAG, so no cell is re-entered while on the stack
    done[id] = true;
    for reference in discovered[id].references().iter().rev() {
        visit(seen[&reference.repr_hash()], discovered, seen, done, sorted);
    }
    sorted.push(id);
}

fn serialize_cell(
    out: &mut Vec<u8>,
    cell: &Cell,
    indices: &HashMap<[u8; HASH_BYTES], usize>,
    size_bytes: usize,
) {
    out.extend_from_slice(&cell.descriptors());
    out.extend_from_slice(&cell.bits().to_padded_bytes());
    for reference in cell.references() {
        write_uint(out, indices[&reference.repr_hash()], size_bytes);
    }
}

fn bytes_needed(value: usize) -> usize {
    let bits = (usize::BITS - value.leading_zeros()) as usize;
    bits.div_ceil(8).max(1)
}

fn write_uint(buf: &mut Vec<u8>, value: usize, size: usize) {
    let start = buf.len();
    buf.resize(start + size, 0);
    BigEndian::write_uint(&mut buf[start..], value as u64, size);
}

/// Converts a hex string to a BoC
pub fn hex_to_boc(hex: &str) -> Result<Vec<Arc<Cell>>> {
    let hex: String = hex.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = hex::decode(&hex)?;
    deserialize_boc(&bytes)
}

/// Converts a BoC to a hex string
pub fn boc_to_hex(roots: &[Arc<Cell>], options: BocOptions) -> Result<String> {
    Ok(hex::encode(serialize_boc(roots, options)?))
}

/// Converts a BoC to base64
pub fn boc_to_base64(roots: &[Arc<Cell>], options: BocOptions) -> Result<String> {
    let bytes = serialize_boc(roots, options)?;
    Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
}

/// Converts a base64 string to a BoC
pub fn base64_to_boc(b64: &str) -> Result<Vec<Arc<Cell>>> {
    let bytes = base64::engine::general_purpose::STANDARD.decode(b64.trim())?;
    deserialize_boc(&bytes)
}

impl Cell {
    /// Serializes this cell as the single root of a BoC
    pub fn to_boc(self: &Arc<Self>, options: BocOptions) -> Result<Vec<u8>> {
        serialize_boc(std::slice::from_ref(self), options)
    }

    /// Deserializes a single-root BoC
    pub fn from_boc(data: &[u8]) -> Result<Arc<Cell>> {
        deserialize_boc_single(data)
    }

    /// Deserializes a single-root base64 BoC
    pub fn from_base64(b64: &str) -> Result<Arc<Cell>> {
        let bytes = base64::engine::general_purpose::STANDARD.decode(b64.trim())?;
        deserialize_boc_single(&bytes)
    }
}
