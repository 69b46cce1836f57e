//! TVM cell data structures
//!
//! This module provides the cell engine:
//! - BitString: immutable, zero-copy bit sequences
//! - Cell: up to 1023 bits and 4 references, ordinary or exotic, with cached Merkle hashes
//! - Builder: appends bits and references, then finalizes a cell
//! - Slice: a reader for sequentially accessing cell data
//! - BoC: Bag of Cells serialization format for encoding cells into byte arrays
//! - Address: standard and external addresses stored in cells

pub mod address;
pub mod bitstring;
pub mod boc;
pub mod builder;
pub mod cell;
pub mod error;
mod exotic;
mod hash;
pub mod level_mask;
pub mod slice;
#[cfg(test)]
pub mod tests;

pub use address::{Address, ExternalAddress};
pub use bitstring::BitString;
pub use boc::{
    BocOptions, base64_to_boc, boc_to_base64, boc_to_hex, deserialize_boc,
    deserialize_boc_single, hex_to_boc, serialize_boc,
};
pub use builder::Builder;
pub use cell::{Cell, CellKind, HASH_BYTES, MAX_CELL_BITS, MAX_CELL_DEPTH, MAX_CELL_REFS};
pub use error::{CellError, ErrorKind, Result};
pub use level_mask::{LevelMask, MAX_CELL_LEVEL};
pub use slice::Slice;
