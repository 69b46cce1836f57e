//! Cell implementation
//!
//! A cell is the fundamental data structure of the chain: up to 1023 bits
//! of data and up to 4 references to other cells. Cells are immutable once
//! built and are shared through `Arc`, so a single cell may be a child of
//! many parents (a DAG, never a tree with owning links).
//!
//! Every cell caches its level mask together with the hash and depth of
//! each Merkle level at construction time; nothing is recomputed later.

use crate::tvm::bitstring::BitString;
use crate::tvm::error::{CellError, Result};
use crate::tvm::hash::{self, CellHashes};
use crate::tvm::level_mask::{LevelMask, MAX_CELL_LEVEL};
use crate::tvm::slice::Slice;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Maximum number of bits a cell can store
pub const MAX_CELL_BITS: usize = 1023;

/// Maximum number of references a cell can have
pub const MAX_CELL_REFS: usize = 4;

/// Maximum depth of a cell tree
pub const MAX_CELL_DEPTH: usize = 1024;

/// Size of a representation hash in bytes
pub const HASH_BYTES: usize = 32;

/// Cell kind. Exotic kinds are identified by the first byte of their data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CellKind {
    Ordinary,
    PrunedBranch,
    LibraryReference,
    MerkleProof,
    MerkleUpdate,
}

impl CellKind {
    pub fn is_exotic(self) -> bool {
        self != CellKind::Ordinary
    }

    pub fn is_merkle(self) -> bool {
        matches!(self, CellKind::MerkleProof | CellKind::MerkleUpdate)
    }

    /// Tag byte stored at the start of an exotic cell
    pub fn tag(self) -> Option<u8> {
        match self {
            CellKind::Ordinary => None,
            CellKind::PrunedBranch => Some(1),
            CellKind::LibraryReference => Some(2),
            CellKind::MerkleProof => Some(3),
            CellKind::MerkleUpdate => Some(4),
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            1 => Ok(CellKind::PrunedBranch),
            2 => Ok(CellKind::LibraryReference),
            3 => Ok(CellKind::MerkleProof),
            4 => Ok(CellKind::MerkleUpdate),
            other => Err(CellError::UnknownExoticTag(other)),
        }
    }
}

/// Immutable cell
#[derive(Clone)]
pub struct Cell {
    kind: CellKind,
    bits: BitString,
    references: Vec<Arc<Cell>>,
    level_mask: LevelMask,
    hashes: [[u8; HASH_BYTES]; 4],
    depths: [u16; 4],
}

impl Cell {
    /// Creates a cell, validating its layout and computing every level's
    /// hash and depth
    pub fn new(kind: CellKind, bits: BitString, references: Vec<Arc<Cell>>) -> Result<Self> {
        if bits.len() > MAX_CELL_BITS {
            return Err(CellError::BitsOverflow {
                need: bits.len(),
                available: MAX_CELL_BITS,
            });
        }
        if references.len() > MAX_CELL_REFS {
            return Err(CellError::RefsOverflow);
        }

        let CellHashes {
            level_mask,
            hashes,
            depths,
        } = hash::compute(kind, &bits, &references)?;

        Ok(Self {
            kind,
            bits,
            references,
            level_mask,
            hashes,
            depths,
        })
    }

    /// Creates an empty ordinary cell
    pub fn empty() -> Self {
        let CellHashes {
            level_mask,
            hashes,
            depths,
        } = hash::empty_cell();
        Self {
            kind: CellKind::Ordinary,
            bits: BitString::empty(),
            references: Vec::new(),
            level_mask,
            hashes,
            depths,
        }
    }

    pub fn kind(&self) -> CellKind {
        self.kind
    }

    pub fn is_exotic(&self) -> bool {
        self.kind.is_exotic()
    }

    pub fn bits(&self) -> &BitString {
        &self.bits
    }

    /// Returns the number of bits in the cell
    pub fn bit_len(&self) -> usize {
        self.bits.len()
    }

    /// Returns the cell's references
    pub fn references(&self) -> &[Arc<Cell>] {
        &self.references
    }

    /// Gets a reference by index
    pub fn reference(&self, index: usize) -> Option<&Arc<Cell>> {
        self.references.get(index)
    }

    /// Returns the number of references
    pub fn reference_count(&self) -> usize {
        self.references.len()
    }

    pub fn level_mask(&self) -> LevelMask {
        self.level_mask
    }

    pub fn level(&self) -> u8 {
        self.level_mask.level()
    }

    /// Representation hash (level 0)
    pub fn hash(&self) -> [u8; HASH_BYTES] {
        self.hashes[0]
    }

    /// Hash at the given Merkle level; levels above 3 resolve to level 3
    pub fn hash_at(&self, level: u8) -> [u8; HASH_BYTES] {
        self.hashes[level.min(MAX_CELL_LEVEL) as usize]
    }

    /// Hash at the highest level. Unlike `hash()`, which a pruned branch
    /// shares with the cell it replaces, this tells the two apart.
    pub fn repr_hash(&self) -> [u8; HASH_BYTES] {
        self.hashes[MAX_CELL_LEVEL as usize]
    }

    /// Depth at level 0
    pub fn depth(&self) -> u16 {
        self.depths[0]
    }

    pub fn depth_at(&self, level: u8) -> u16 {
        self.depths[level.min(MAX_CELL_LEVEL) as usize]
    }

    /// Descriptor bytes as written to a BoC: `refs + 8*exotic + 32*mask`
    /// and `floor(bits/8) + ceil(bits/8)`
    pub fn descriptors(&self) -> [u8; 2] {
        [
            hash::refs_descriptor(self.kind, self.references.len(), self.level_mask),
            hash::bits_descriptor(self.bits.len()),
        ]
    }

    /// Bytes hashed to produce `hash_at(level)`
    pub fn representation_at(&self, level: u8) -> Vec<u8> {
        hash::representation_at(self, level)
    }

    /// Strict comparison of kind, bits and the full reference structure.
    /// `==` only compares representation hashes.
    pub fn structurally_eq(&self, other: &Cell) -> bool {
        self.kind == other.kind
            && self.bits == other.bits
            && self.references.len() == other.references.len()
            && self
                .references
                .iter()
                .zip(&other.references)
                .all(|(a, b)| Arc::ptr_eq(a, b) || a.structurally_eq(b))
    }

    /// Starts reading the cell from its first bit and reference
    pub fn as_slice(self: &Arc<Self>) -> Slice {
        Slice::new(self.clone())
    }

    /// Counts how many parents point at each distinct cell
    fn count_parents(&self, parents: &mut HashMap<[u8; HASH_BYTES], usize>) {
        for reference in &self.references {
            let count = parents.entry(reference.repr_hash()).or_insert(0);
            *count += 1;
            if *count == 1 {
                reference.count_parents(parents);
            }
        }
    }

    /// Prints every distinct cell once. A cell with several parents gets a
    /// `#n` label on first print and is shown as `#n` afterwards.
    fn fmt_tree(
        &self,
        f: &mut fmt::Formatter<'_>,
        indent: usize,
        parents: &HashMap<[u8; HASH_BYTES], usize>,
        labels: &mut HashMap<[u8; HASH_BYTES], usize>,
    ) -> fmt::Result {
        let key = self.repr_hash();
        if let Some(label) = labels.get(&key) {
            return write!(f, "{:indent$}#{label}", "", indent = indent);
        }

        let prefix = match self.kind {
            CellKind::Ordinary => 'x',
            CellKind::PrunedBranch => 'p',
            CellKind::LibraryReference => 'l',
            CellKind::MerkleProof => 'm',
            CellKind::MerkleUpdate => 'u',
        };
        write!(f, "{:indent$}{}{{{}}}", "", prefix, self.bits, indent = indent)?;
        if parents.get(&key).copied().unwrap_or(0) > 1 {
            let label = labels.len();
            labels.insert(key, label);
            write!(f, " #{label}")?;
        }
        for reference in &self.references {
            writeln!(f)?;
            reference.fmt_tree(f, indent + 1, parents, labels)?;
        }
        Ok(())
    }
}

impl Default for Cell {
    fn default() -> Self {
        Self::empty()
    }
}

impl PartialEq for Cell {
    fn eq(&self, other: &Self) -> bool {
        self.hash() == other.hash()
    }
}

impl Eq for Cell {}

impl std::hash::Hash for Cell {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.hashes[0].hash(state);
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parents = HashMap::new();
        self.count_parents(&mut parents);
        self.fmt_tree(f, 0, &parents, &mut HashMap::new())
    }
}

impl fmt::Debug for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cell")
            .field("kind", &self.kind)
            .field("bits", &self.bits)
            .field("refs", &self.references.len())
            .field("level_mask", &self.level_mask.value())
            .field("hash", &hex::encode(self.hash()))
            .finish()
    }
}
