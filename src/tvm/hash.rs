//! Multi-level representation hashing
//!
//! The level-`L` representation of a cell is
//!
//! ```text
//! d1 d2 | data | depth(child_1) .. depth(child_n) | hash(child_1) .. hash(child_n)
//! ```
//!
//! where `d1 = refs + 8*exotic + 32*mask.apply(L)` and `d2 = floor(b/8) + ceil(b/8)`.
//! The first computed level hashes the cell's own bits with the completion tag;
//! every higher level of a non-pruned cell hashes the previous level's hash
//! instead. Merkle proofs and updates look one level deeper into their
//! children. Pruned branches only compute their top level; their lower levels
//! are read back from the hashes stored in their data.

use crate::tvm::bitstring::BitString;
use crate::tvm::cell::{Cell, CellKind, HASH_BYTES, MAX_CELL_DEPTH};
use crate::tvm::error::{CellError, Result};
use crate::tvm::exotic;
use crate::tvm::level_mask::{LevelMask, MAX_CELL_LEVEL};
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Level mask plus hash and depth resolved for each of the four levels
pub(crate) struct CellHashes {
    pub level_mask: LevelMask,
    pub hashes: [[u8; HASH_BYTES]; 4],
    pub depths: [u16; 4],
}

enum Data<'a> {
    Bits(&'a BitString),
    Hash(&'a [u8; HASH_BYTES]),
}

pub(crate) fn sha256(data: &[u8]) -> [u8; HASH_BYTES] {
    let mut hash = [0u8; HASH_BYTES];
    hash.copy_from_slice(&Sha256::digest(data));
    hash
}

pub(crate) fn refs_descriptor(kind: CellKind, refs: usize, mask: LevelMask) -> u8 {
    refs as u8 + if kind.is_exotic() { 8 } else { 0 } + mask.value() * 32
}

pub(crate) fn bits_descriptor(bit_len: usize) -> u8 {
    (bit_len / 8 + bit_len.div_ceil(8)) as u8
}

fn child_level(kind: CellKind, level: u8) -> u8 {
    if kind.is_merkle() { level + 1 } else { level }
}

fn write_representation(
    out: &mut Vec<u8>,
    kind: CellKind,
    bits: &BitString,
    refs: &[Arc<Cell>],
    mask: LevelMask,
    level: u8,
    data: Data<'_>,
) {
    out.push(refs_descriptor(kind, refs.len(), mask.apply(level)));
    out.push(bits_descriptor(bits.len()));
    match data {
        Data::Bits(bits) => out.extend_from_slice(&bits.to_padded_bytes()),
        Data::Hash(hash) => out.extend_from_slice(hash),
    }

    let child_level = child_level(kind, level);
    for reference in refs {
        out.extend_from_slice(&reference.depth_at(child_level).to_be_bytes());
    }
    for reference in refs {
        out.extend_from_slice(&reference.hash_at(child_level));
    }
}

fn depth_at(kind: CellKind, refs: &[Arc<Cell>], level: u8) -> Result<u16> {
    let child_level = child_level(kind, level);
    let depth = refs
        .iter()
        .map(|r| r.depth_at(child_level) as usize + 1)
        .max()
        .unwrap_or(0);
    if depth > MAX_CELL_DEPTH {
        return Err(CellError::DepthOverflow(depth));
    }
    Ok(depth as u16)
}

/// Validates the layout of a new cell and computes its hashes and depths
pub(crate) fn compute(kind: CellKind, bits: &BitString, refs: &[Arc<Cell>]) -> Result<CellHashes> {
    let layout = exotic::resolve(kind, bits, refs)?;
    let mask = layout.level_mask;

    let total = mask.hash_count();
    let skip = if layout.pruned.is_some() { total - 1 } else { 0 };

    let mut hashes: Vec<[u8; HASH_BYTES]> = Vec::with_capacity(total - skip);
    let mut depths: Vec<u16> = Vec::with_capacity(total - skip);
    let mut repr = Vec::with_capacity(2 + 128 + refs.len() * (2 + HASH_BYTES));

    let mut hash_i = 0;
    for level in 0..=mask.level() {
        if !mask.is_significant(level) {
            continue;
        }
        if hash_i < skip {
            hash_i += 1;
            continue;
        }

        let data = match hashes.last() {
            Some(prev) => Data::Hash(prev),
            None => Data::Bits(bits),
        };
        repr.clear();
        write_representation(&mut repr, kind, bits, refs, mask, level, data);
        let hash = sha256(&repr);

        depths.push(depth_at(kind, refs, level)?);
        hashes.push(hash);
        hash_i += 1;
    }

    let mut resolved = CellHashes {
        level_mask: mask,
        hashes: [[0u8; HASH_BYTES]; 4],
        depths: [0u16; 4],
    };
    for level in 0..=MAX_CELL_LEVEL {
        let index = mask.apply(level).hash_index();
        let (hash, depth) = match &layout.pruned {
            Some(stored) if index != mask.hash_index() => stored[index],
            Some(_) => (hashes[0], depths[0]),
            None => (hashes[index], depths[index]),
        };
        resolved.hashes[level as usize] = hash;
        resolved.depths[level as usize] = depth;
    }
    Ok(resolved)
}

/// Hashes of the empty ordinary cell
pub(crate) fn empty_cell() -> CellHashes {
    let hash = sha256(&[0, 0]);
    CellHashes {
        level_mask: LevelMask::EMPTY,
        hashes: [hash; 4],
        depths: [0; 4],
    }
}

/// Rebuilds the representation hashed for `cell.hash_at(level)`
pub(crate) fn representation_at(cell: &Cell, level: u8) -> Vec<u8> {
    let mask = cell.level_mask();
    let pruned = cell.kind() == CellKind::PrunedBranch;
    let mut level = if pruned {
        mask.level()
    } else {
        level.min(mask.level())
    };
    while level > 0 && !mask.is_significant(level) {
        level -= 1;
    }

    let prev_hash;
    let data = if pruned || level == 0 {
        Data::Bits(cell.bits())
    } else {
        // Higher levels hash the closest lower significant level
        let mut prev = level - 1;
        while prev > 0 && !mask.is_significant(prev) {
            prev -= 1;
        }
        prev_hash = cell.hash_at(prev);
        Data::Hash(&prev_hash)
    };

    let mut out = Vec::new();
    write_representation(
        &mut out,
        cell.kind(),
        cell.bits(),
        cell.references(),
        mask,
        level,
        data,
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tvm::builder::Builder;

    #[test]
    fn test_empty_cell_hash() {
        use base64::Engine;
        let hashes = empty_cell();
        assert_eq!(
            base64::engine::general_purpose::STANDARD.encode(hashes.hashes[0]),
            "lqKW0iTyhcZ77pPDD4owkVfw2qNdxbh+QQt4YwoJz8c="
        );

        let computed = compute(CellKind::Ordinary, &BitString::empty(), &[]).unwrap();
        assert_eq!(computed.hashes, hashes.hashes);
    }

    #[test]
    fn test_representation_matches_hash() {
        let mut child = Builder::new();
        child.store_u32(123456789).unwrap();
        let child = child.end_cell().unwrap();

        let mut root = Builder::new();
        root.store_uint(0b101, 3).unwrap();
        root.store_ref(child.clone()).unwrap();
        let root = root.end_cell().unwrap();

        let repr = root.representation_at(0);
        // d1 d2 | 1 byte data | depth | hash
        assert_eq!(repr.len(), 2 + 1 + 2 + 32);
        assert_eq!(&repr[..3], &[0x01, 0x01, 0b1011_0000]);
        assert_eq!(&repr[3..5], &child.depth().to_be_bytes());
        assert_eq!(&repr[5..], &child.hash());
        assert_eq!(sha256(&repr), root.hash());
    }

    #[test]
    fn test_depth_limit() {
        let mut cell = Arc::new(Cell::empty());
        for _ in 0..MAX_CELL_DEPTH {
            let mut builder = Builder::new();
            builder.store_ref(cell).unwrap();
            cell = builder.end_cell().unwrap();
        }
        assert_eq!(cell.depth() as usize, MAX_CELL_DEPTH);

        let mut builder = Builder::new();
        builder.store_ref(cell).unwrap();
        let err = builder.end_cell().unwrap_err();
        assert_eq!(err.kind(), crate::tvm::ErrorKind::Depth);
    }

    #[test]
    fn test_ordinary_levels_share_hash() {
        let mut builder = Builder::new();
        builder.store_u64(0xDEADBEEF).unwrap();
        let cell = builder.end_cell().unwrap();
        for level in 0..=3 {
            assert_eq!(cell.hash_at(level), cell.hash());
            assert_eq!(cell.depth_at(level), 0);
        }
    }
}
