//! Exotic cell layouts
//!
//! | kind          | tag | bits                                   | refs |
//! |---------------|-----|----------------------------------------|------|
//! | pruned branch | 1   | tag, mask, n hashes, n depths          | 0    |
//! | library       | 2   | tag, 256-bit hash                      | 0    |
//! | merkle proof  | 3   | tag, hash, depth                       | 1    |
//! | merkle update | 4   | tag, hash x2, depth x2                 | 2    |
//!
//! A pruned branch of level `l` stores `mask.apply(l - 1).hash_count()`
//! hash/depth pairs. Merkle cells store their children's level-0 hash and
//! depth and lower the children's level mask by one.

use crate::tvm::bitstring::BitString;
use crate::tvm::builder::Builder;
use crate::tvm::cell::{Cell, CellKind, HASH_BYTES};
use crate::tvm::error::{CellError, Result};
use crate::tvm::level_mask::{LevelMask, MAX_CELL_LEVEL};
use std::sync::Arc;

const HASH_BITS: usize = HASH_BYTES * 8;
const DEPTH_BITS: usize = 16;

const LIBRARY_BITS: usize = 8 + HASH_BITS;
const MERKLE_PROOF_BITS: usize = 8 + HASH_BITS + DEPTH_BITS;
const MERKLE_UPDATE_BITS: usize = 8 + 2 * (HASH_BITS + DEPTH_BITS);

/// Level mask of a cell and, for pruned branches, the hash/depth pairs
/// stored for its lower levels
pub(crate) struct ExoticLayout {
    pub level_mask: LevelMask,
    pub pruned: Option<Vec<([u8; HASH_BYTES], u16)>>,
}

fn read_hash(bits: &BitString, start: usize) -> Result<[u8; HASH_BYTES]> {
    let bytes = bits.slice(start, HASH_BITS)?.to_bytes();
    let mut hash = [0u8; HASH_BYTES];
    hash.copy_from_slice(&bytes);
    Ok(hash)
}

fn check_shape(kind: CellKind, bits: &BitString, refs: &[Arc<Cell>], bit_len: usize, ref_count: usize) -> Result<()> {
    if bits.len() != bit_len {
        return Err(CellError::invalid_exotic(
            kind,
            format!("expected {bit_len} bits, found {}", bits.len()),
        ));
    }
    if refs.len() != ref_count {
        return Err(CellError::invalid_exotic(
            kind,
            format!("expected {ref_count} refs, found {}", refs.len()),
        ));
    }
    Ok(())
}

fn check_child(kind: CellKind, bits: &BitString, child: &Cell, hash_at: usize, depth_at: usize) -> Result<()> {
    if read_hash(bits, hash_at)? != child.hash_at(0) {
        return Err(CellError::invalid_exotic(kind, "stored hash does not match child"));
    }
    if bits.read_uint(depth_at, DEPTH_BITS)? != child.depth_at(0) as u64 {
        return Err(CellError::invalid_exotic(kind, "stored depth does not match child"));
    }
    Ok(())
}

/// Checks that `bits` and `refs` form a valid cell of `kind` and returns its
/// level layout
pub(crate) fn resolve(kind: CellKind, bits: &BitString, refs: &[Arc<Cell>]) -> Result<ExoticLayout> {
    if let Some(tag) = kind.tag() {
        let stored = bits.read_uint(0, 8).map_err(|_| {
            CellError::invalid_exotic(kind, "missing type tag")
        })? as u8;
        if stored != tag {
            return Err(CellError::invalid_exotic(
                kind,
                format!("type tag {stored} does not match {tag}"),
            ));
        }
    }

    let level_mask = match kind {
        CellKind::Ordinary => refs
            .iter()
            .fold(LevelMask::EMPTY, |mask, r| mask | r.level_mask()),
        CellKind::PrunedBranch => return resolve_pruned(bits, refs),
        CellKind::LibraryReference => {
            check_shape(kind, bits, refs, LIBRARY_BITS, 0)?;
            LevelMask::EMPTY
        }
        CellKind::MerkleProof => {
            check_shape(kind, bits, refs, MERKLE_PROOF_BITS, 1)?;
            check_child(kind, bits, &refs[0], 8, 8 + HASH_BITS)?;
            refs[0].level_mask().shift_right()
        }
        CellKind::MerkleUpdate => {
            check_shape(kind, bits, refs, MERKLE_UPDATE_BITS, 2)?;
            check_child(kind, bits, &refs[0], 8, 8 + 2 * HASH_BITS)?;
            check_child(kind, bits, &refs[1], 8 + HASH_BITS, 8 + 2 * HASH_BITS + DEPTH_BITS)?;
            (refs[0].level_mask() | refs[1].level_mask()).shift_right()
        }
    };

    Ok(ExoticLayout {
        level_mask,
        pruned: None,
    })
}

fn resolve_pruned(bits: &BitString, refs: &[Arc<Cell>]) -> Result<ExoticLayout> {
    let kind = CellKind::PrunedBranch;
    if !refs.is_empty() {
        return Err(CellError::invalid_exotic(
            kind,
            format!("expected 0 refs, found {}", refs.len()),
        ));
    }
    let raw_mask = bits
        .read_uint(8, 8)
        .map_err(|_| CellError::invalid_exotic(kind, "missing level mask"))? as u8;
    let mask = LevelMask::new(raw_mask);
    if raw_mask != mask.value() || mask.level() == 0 {
        return Err(CellError::invalid_exotic(
            kind,
            format!("level mask {raw_mask:#x} must select levels 1 to 3"),
        ));
    }

    let stored = mask.apply(mask.level() - 1).hash_count();
    check_shape(kind, bits, refs, 16 + stored * (HASH_BITS + DEPTH_BITS), 0)?;

    let depths_at = 16 + stored * HASH_BITS;
    let mut pruned = Vec::with_capacity(stored);
    for i in 0..stored {
        let hash = read_hash(bits, 16 + i * HASH_BITS)?;
        let depth = bits.read_uint(depths_at + i * DEPTH_BITS, DEPTH_BITS)? as u16;
        pruned.push((hash, depth));
    }

    Ok(ExoticLayout {
        level_mask: mask,
        pruned: Some(pruned),
    })
}

impl Cell {
    /// Replaces `cell` by a pruned branch of the given level which keeps the
    /// hashes and depths of every level the cell already had
    pub fn pruned_branch(cell: &Cell, level: u8) -> Result<Arc<Cell>> {
        if level == 0 || level > MAX_CELL_LEVEL || level <= cell.level() {
            return Err(CellError::invalid_exotic(
                CellKind::PrunedBranch,
                format!("cannot prune a level {} cell at level {level}", cell.level()),
            ));
        }
        let source = cell.level_mask();
        let mask = source | LevelMask::for_level(level);

        let mut builder = Builder::new();
        builder.store_u8(1)?;
        builder.store_u8(mask.value())?;
        for l in (0..=source.level()).filter(|&l| source.is_significant(l)) {
            builder.store_buffer(&cell.hash_at(l))?;
        }
        for l in (0..=source.level()).filter(|&l| source.is_significant(l)) {
            builder.store_u16(cell.depth_at(l))?;
        }
        builder.end_exotic_cell()
    }

    /// Merkle proof over `child`
    pub fn merkle_proof(child: Arc<Cell>) -> Result<Arc<Cell>> {
        let mut builder = Builder::new();
        builder.store_u8(3)?;
        builder.store_buffer(&child.hash_at(0))?;
        builder.store_u16(child.depth_at(0))?;
        builder.store_ref(child)?;
        builder.end_exotic_cell()
    }

    /// Merkle update from state `from` to state `to`
    pub fn merkle_update(from: Arc<Cell>, to: Arc<Cell>) -> Result<Arc<Cell>> {
        let mut builder = Builder::new();
        builder.store_u8(4)?;
        builder.store_buffer(&from.hash_at(0))?;
        builder.store_buffer(&to.hash_at(0))?;
        builder.store_u16(from.depth_at(0))?;
        builder.store_u16(to.depth_at(0))?;
        builder.store_ref(from)?;
        builder.store_ref(to)?;
        builder.end_exotic_cell()
    }

    /// Library reference to the cell with the given hash
    pub fn library(hash: [u8; HASH_BYTES]) -> Result<Arc<Cell>> {
        let mut builder = Builder::new();
        builder.store_u8(2)?;
        builder.store_buffer(&hash)?;
        builder.end_exotic_cell()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tvm::ErrorKind;

    fn leaf(value: u32) -> Arc<Cell> {
        let mut builder = Builder::new();
        builder.store_u32(value).unwrap();
        builder.end_cell().unwrap()
    }

    fn pair(a: Arc<Cell>, b: Arc<Cell>) -> Arc<Cell> {
        let mut builder = Builder::new();
        builder.store_u8(0xAA).unwrap();
        builder.store_ref(a).unwrap();
        builder.store_ref(b).unwrap();
        builder.end_cell().unwrap()
    }

    #[test]
    fn test_pruned_branch_keeps_hash() {
        let child = pair(leaf(1), leaf(2));
        let pruned = Cell::pruned_branch(&child, 1).unwrap();

        assert_eq!(pruned.kind(), CellKind::PrunedBranch);
        assert_eq!(pruned.bit_len(), 16 + 256 + 16);
        assert_eq!(pruned.level_mask().value(), 1);
        assert_eq!(pruned.hash_at(0), child.hash());
        assert_eq!(pruned.depth_at(0), child.depth());
        assert_ne!(pruned.hash_at(1), child.hash());
        assert_eq!(pruned.reference_count(), 0);
    }

    #[test]
    fn test_pruned_tree_keeps_root_hash() {
        let kept = leaf(7);
        let hidden = pair(leaf(8), leaf(9));
        let full = pair(kept.clone(), hidden.clone());

        let partial = pair(kept, Cell::pruned_branch(&hidden, 1).unwrap());
        assert_eq!(partial.level(), 1);
        assert_eq!(partial.hash_at(0), full.hash());
        assert_eq!(partial.depth_at(0), full.depth());
        assert_ne!(partial.hash_at(1), full.hash());
    }

    #[test]
    fn test_merkle_proof() {
        let kept = leaf(7);
        let hidden = pair(leaf(8), leaf(9));
        let full = pair(kept.clone(), hidden.clone());
        let partial = pair(kept, Cell::pruned_branch(&hidden, 1).unwrap());

        let proof = Cell::merkle_proof(partial.clone()).unwrap();
        assert_eq!(proof.kind(), CellKind::MerkleProof);
        assert_eq!(proof.level(), 0);
        assert_eq!(proof.bit_len(), 280);
        assert_eq!(proof.bits().slice(8, 256).unwrap().to_bytes(), full.hash().to_vec());
        assert_eq!(proof.depth(), partial.depth_at(1) + 1);
    }

    #[test]
    fn test_merkle_update() {
        let before = pair(leaf(1), Cell::pruned_branch(&leaf(2), 1).unwrap());
        let after = pair(leaf(3), Cell::pruned_branch(&leaf(2), 1).unwrap());
        let update = Cell::merkle_update(before.clone(), after.clone()).unwrap();
        assert_eq!(update.kind(), CellKind::MerkleUpdate);
        assert_eq!(update.bit_len(), 552);
        assert_eq!(update.level(), 0);
    }

    #[test]
    fn test_library_reference() {
        let lib = Cell::library([0x11; 32]).unwrap();
        assert_eq!(lib.kind(), CellKind::LibraryReference);
        assert_eq!(lib.bit_len(), 264);
        assert_eq!(lib.level(), 0);
        assert_eq!(lib.descriptors()[0], 8);
    }

    #[test]
    fn test_merkle_proof_with_wrong_hash() {
        let child = leaf(1);
        let mut builder = Builder::new();
        builder.store_u8(3).unwrap();
        builder.store_buffer(&[0u8; 32]).unwrap();
        builder.store_u16(child.depth()).unwrap();
        builder.store_ref(child).unwrap();
        let err = builder.end_exotic_cell().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_merkle_proof_ref_count() {
        let mut builder = Builder::new();
        builder.store_u8(3).unwrap();
        builder.store_buffer(&[0u8; 32]).unwrap();
        builder.store_u16(0).unwrap();
        let err = builder.end_exotic_cell().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_pruned_branch_level_count_mismatch() {
        // Mask declares two levels but a single hash/depth pair follows
        let mut builder = Builder::new();
        builder.store_u8(1).unwrap();
        builder.store_u8(0b011).unwrap();
        builder.store_buffer(&[0x55; 32]).unwrap();
        builder.store_u16(3).unwrap();
        let err = builder.end_exotic_cell().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_pruned_branch_zero_level() {
        let mut builder = Builder::new();
        builder.store_u8(1).unwrap();
        builder.store_u8(0).unwrap();
        let err = builder.end_exotic_cell().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_prune_requires_higher_level() {
        let pruned = Cell::pruned_branch(&leaf(1), 2).unwrap();
        assert_eq!(pruned.level(), 2);
        assert!(Cell::pruned_branch(&pruned, 2).is_err());
        let again = Cell::pruned_branch(&pruned, 3).unwrap();
        assert_eq!(again.level_mask().value(), 0b110);
        assert_eq!(again.hash_at(0), leaf(1).hash());
        assert_eq!(again.hash_at(2), pruned.hash_at(2));
    }

    #[test]
    fn test_unknown_tag() {
        let mut builder = Builder::new();
        builder.store_u8(9).unwrap();
        let err = builder.end_exotic_cell().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}
