//! Slice implementation for reading data from cells
//!
//! A Slice reads a window `[bit_pos, bit_end)` of a cell's bits and
//! `[ref_pos, ref_end)` of its references. `load_*` methods advance the
//! window start, `preload_*` methods only peek. The cell itself is never
//! modified.

use crate::tvm::address::{Address, ExternalAddress};
use crate::tvm::bitstring::BitString;
use crate::tvm::builder::Builder;
use crate::tvm::cell::Cell;
use crate::tvm::error::{CellError, Result};
use num_bigint::{BigInt, BigUint};
use std::sync::Arc;

/// A slice for reading data from a cell
#[derive(Debug, Clone)]
pub struct Slice {
    cell: Arc<Cell>,
    bit_pos: usize,
    bit_end: usize,
    ref_pos: usize,
    ref_end: usize,
}

impl Slice {
    /// Creates a new slice over the whole cell
    pub fn new(cell: Arc<Cell>) -> Self {
        let bit_end = cell.bit_len();
        let ref_end = cell.reference_count();
        Self {
            cell,
            bit_pos: 0,
            bit_end,
            ref_pos: 0,
            ref_end,
        }
    }

    /// Returns the number of remaining bits
    pub fn remaining_bits(&self) -> usize {
        self.bit_end - self.bit_pos
    }

    /// Returns the number of remaining references
    pub fn remaining_refs(&self) -> usize {
        self.ref_end - self.ref_pos
    }

    /// Checks that no bits and no references are left
    pub fn is_empty(&self) -> bool {
        self.remaining_bits() == 0 && self.remaining_refs() == 0
    }

    /// Gets the underlying cell
    pub fn cell(&self) -> &Arc<Cell> {
        &self.cell
    }

    /// Unread references
    pub fn references(&self) -> &[Arc<Cell>] {
        &self.cell.references()[self.ref_pos..self.ref_end]
    }

    fn ensure_bits(&self, need: usize) -> Result<()> {
        if need > self.remaining_bits() {
            return Err(CellError::NotEnoughBits {
                need,
                have: self.remaining_bits(),
            });
        }
        Ok(())
    }

    fn ensure_refs(&self, need: usize) -> Result<()> {
        if need > self.remaining_refs() {
            return Err(CellError::NotEnoughRefs {
                need,
                have: self.remaining_refs(),
            });
        }
        Ok(())
    }

    /// Skips a number of bits
    pub fn skip_bits(&mut self, n: usize) -> Result<()> {
        self.ensure_bits(n)?;
        self.bit_pos += n;
        Ok(())
    }

    /// Skips a number of references
    pub fn skip_refs(&mut self, n: usize) -> Result<()> {
        self.ensure_refs(n)?;
        self.ref_pos += n;
        Ok(())
    }

    /// Fails unless every bit and reference has been read
    pub fn end_parse(&self) -> Result<()> {
        if !self.is_empty() {
            return Err(CellError::TrailingData {
                bits: self.remaining_bits(),
                refs: self.remaining_refs(),
            });
        }
        Ok(())
    }

    pub fn preload_bit(&self) -> Result<bool> {
        self.ensure_bits(1)?;
        Ok(self.cell.bits().bit(self.bit_pos))
    }

    /// Loads a single bit
    pub fn load_bit(&mut self) -> Result<bool> {
        let bit = self.preload_bit()?;
        self.bit_pos += 1;
        Ok(bit)
    }

    /// Zero-copy view of the next `n` bits
    pub fn preload_bits(&self, n: usize) -> Result<BitString> {
        self.ensure_bits(n)?;
        self.cell.bits().slice(self.bit_pos, n)
    }

    pub fn load_bits(&mut self, n: usize) -> Result<BitString> {
        let bits = self.preload_bits(n)?;
        self.bit_pos += n;
        Ok(bits)
    }

    pub fn preload_buffer(&self, n: usize) -> Result<Vec<u8>> {
        Ok(self.preload_bits(n * 8)?.to_bytes())
    }

    /// Loads `n` whole bytes
    pub fn load_buffer(&mut self, n: usize) -> Result<Vec<u8>> {
        Ok(self.load_bits(n * 8)?.to_bytes())
    }

    /// Peeks an unsigned integer of up to 64 bits
    pub fn preload_uint(&self, bits: usize) -> Result<u64> {
        if bits > 64 {
            return Err(CellError::ValueOutOfRange {
                value: format!("{bits}-bit integer"),
                bits: 64,
            });
        }
        self.ensure_bits(bits)?;
        self.cell.bits().read_uint(self.bit_pos, bits)
    }

    /// Loads an unsigned integer of up to 64 bits
    pub fn load_uint(&mut self, bits: usize) -> Result<u64> {
        let value = self.preload_uint(bits)?;
        self.bit_pos += bits;
        Ok(value)
    }

    /// Peeks a two's complement integer of up to 64 bits
    pub fn preload_int(&self, bits: usize) -> Result<i64> {
        let unsigned = self.preload_uint(bits)?;
        if bits == 0 || bits == 64 {
            return Ok(unsigned as i64);
        }
        // Sign extend
        let shift = 64 - bits;
        Ok(((unsigned << shift) as i64) >> shift)
    }

    pub fn load_int(&mut self, bits: usize) -> Result<i64> {
        let value = self.preload_int(bits)?;
        self.bit_pos += bits;
        Ok(value)
    }

    pub fn preload_u8(&self) -> Result<u8> {
        Ok(self.preload_uint(8)? as u8)
    }

    pub fn load_u8(&mut self) -> Result<u8> {
        Ok(self.load_uint(8)? as u8)
    }

    pub fn preload_u16(&self) -> Result<u16> {
        Ok(self.preload_uint(16)? as u16)
    }

    /// Loads a u16 value (16 bits, big-endian)
    pub fn load_u16(&mut self) -> Result<u16> {
        Ok(self.load_uint(16)? as u16)
    }

    pub fn preload_u32(&self) -> Result<u32> {
        Ok(self.preload_uint(32)? as u32)
    }

    /// Loads a u32 value (32 bits, big-endian)
    pub fn load_u32(&mut self) -> Result<u32> {
        Ok(self.load_uint(32)? as u32)
    }

    pub fn preload_u64(&self) -> Result<u64> {
        self.preload_uint(64)
    }

    /// Loads a u64 value (64 bits, big-endian)
    pub fn load_u64(&mut self) -> Result<u64> {
        self.load_uint(64)
    }

    /// Peeks an unsigned integer of up to 256 bits
    pub fn preload_big_uint(&self, bits: usize) -> Result<BigUint> {
        if bits > 256 {
            return Err(CellError::ValueOutOfRange {
                value: format!("{bits}-bit integer"),
                bits: 256,
            });
        }
        self.read_big_uint(bits)
    }

    fn read_big_uint(&self, bits: usize) -> Result<BigUint> {
        let raw = self.preload_bits(bits)?;
        let value = BigUint::from_bytes_be(&raw.to_bytes());
        // `to_bytes` left-aligns into whole bytes
        Ok(value >> (raw.len().div_ceil(8) * 8 - bits))
    }

    pub fn load_big_uint(&mut self, bits: usize) -> Result<BigUint> {
        let value = self.preload_big_uint(bits)?;
        self.bit_pos += bits;
        Ok(value)
    }

    /// Peeks a two's complement integer of up to 257 bits
    pub fn preload_big_int(&self, bits: usize) -> Result<BigInt> {
        if bits > 257 {
            return Err(CellError::ValueOutOfRange {
                value: format!("{bits}-bit integer"),
                bits: 257,
            });
        }
        let unsigned = BigInt::from(self.read_big_uint(bits)?);
        if bits > 0 && self.preload_bit()? {
            Ok(unsigned - (BigInt::from(1u8) << bits))
        } else {
            Ok(unsigned)
        }
    }

    pub fn load_big_int(&mut self, bits: usize) -> Result<BigInt> {
        let value = self.preload_big_int(bits)?;
        self.bit_pos += bits;
        Ok(value)
    }

    /// Peeks a variable-length unsigned integer; returns the value and the
    /// number of bits it occupies
    fn read_var_uint(&self, length_bits: usize) -> Result<(u128, usize)> {
        if length_bits == 0 || length_bits > 32 {
            return Err(CellError::ValueOutOfRange {
                value: format!("{length_bits}-bit length prefix"),
                bits: 32,
            });
        }
        let byte_len = self.preload_uint(length_bits)? as usize;
        if byte_len > 16 {
            return Err(CellError::ValueOutOfRange {
                value: format!("{byte_len}-byte integer"),
                bits: 128,
            });
        }
        self.ensure_bits(length_bits + byte_len * 8)?;
        let bytes = self
            .cell
            .bits()
            .slice(self.bit_pos + length_bits, byte_len * 8)?
            .to_bytes();
        let value = bytes
            .iter()
            .fold(0u128, |acc, &byte| (acc << 8) | byte as u128);
        Ok((value, length_bits + byte_len * 8))
    }

    pub fn preload_var_uint(&self, length_bits: usize) -> Result<u128> {
        Ok(self.read_var_uint(length_bits)?.0)
    }

    /// Loads a variable-length integer (VarUInteger)
    /// First length_bits encode the byte length, then that many bytes of data
    pub fn load_var_uint(&mut self, length_bits: usize) -> Result<u128> {
        let (value, used) = self.read_var_uint(length_bits)?;
        self.bit_pos += used;
        Ok(value)
    }

    pub fn preload_coins(&self) -> Result<u128> {
        self.preload_var_uint(4)
    }

    /// Loads coins (VarUInteger 16)
    pub fn load_coins(&mut self) -> Result<u128> {
        self.load_var_uint(4)
    }

    fn read_address(&self) -> Result<(Option<Address>, usize)> {
        let tag = self.preload_uint(2)? as u8;
        match tag {
            0b00 => Ok((None, 2)),
            0b10 => {
                self.ensure_bits(Address::BIT_LEN)?;
                let bits = self.cell.bits();
                if bits.bit(self.bit_pos + 2) {
                    // Anycast addresses are not supported
                    return Err(CellError::UnsupportedAddress(0b101));
                }
                let workchain = bits.read_uint(self.bit_pos + 3, 8)? as u8 as i8;
                let hash = bits.slice(self.bit_pos + 11, 256)?.to_bytes();
                let mut hash_part = [0u8; 32];
                hash_part.copy_from_slice(&hash);
                Ok((Some(Address::new(workchain, hash_part)), Address::BIT_LEN))
            }
            other => Err(CellError::UnsupportedAddress(other)),
        }
    }

    pub fn preload_address(&self) -> Result<Option<Address>> {
        Ok(self.read_address()?.0)
    }

    /// Loads `addr_none` as `None` or a standard address
    pub fn load_address(&mut self) -> Result<Option<Address>> {
        let (address, used) = self.read_address()?;
        self.bit_pos += used;
        Ok(address)
    }

    /// Loads an external address (`addr_extern$01 len:(## 9) bits`)
    pub fn load_external_address(&mut self) -> Result<ExternalAddress> {
        let tag = self.preload_uint(2)? as u8;
        if tag != 0b01 {
            return Err(CellError::UnsupportedAddress(tag));
        }
        self.ensure_bits(11)?;
        let len = self.cell.bits().read_uint(self.bit_pos + 2, 9)? as usize;
        self.ensure_bits(11 + len)?;
        let bits = self.cell.bits().slice(self.bit_pos + 11, len)?;
        self.bit_pos += 11 + len;
        Ok(ExternalAddress::new(bits))
    }

    /// Peeks the `index`-th unread reference
    pub fn preload_ref_at(&self, index: usize) -> Result<Arc<Cell>> {
        self.ensure_refs(index + 1)?;
        Ok(self.cell.references()[self.ref_pos + index].clone())
    }

    pub fn preload_ref(&self) -> Result<Arc<Cell>> {
        self.preload_ref_at(0)
    }

    /// Loads a reference to another cell
    pub fn load_ref(&mut self) -> Result<Arc<Cell>> {
        let reference = self.preload_ref()?;
        self.ref_pos += 1;
        Ok(reference)
    }

    pub fn preload_maybe_ref(&self) -> Result<Option<Arc<Cell>>> {
        if self.preload_bit()? {
            self.preload_ref().map(Some)
        } else {
            Ok(None)
        }
    }

    /// Loads an optional reference (Maybe ^Cell)
    pub fn load_maybe_ref(&mut self) -> Result<Option<Arc<Cell>>> {
        let reference = self.preload_maybe_ref()?;
        self.bit_pos += 1;
        if reference.is_some() {
            self.ref_pos += 1;
        }
        Ok(reference)
    }

    /// Loads snake-encoded bytes: the remaining bytes of this slice followed
    /// by the bytes of every cell along the first-reference chain
    pub fn load_snake_bytes(&mut self) -> Result<Vec<u8>> {
        let mut out = self.load_buffer(self.remaining_bits() / 8)?;
        let mut next = if self.remaining_refs() > 0 {
            Some(self.load_ref()?)
        } else {
            None
        };
        while let Some(cell) = next {
            let mut slice = Slice::new(cell);
            out.extend(slice.load_buffer(slice.remaining_bits() / 8)?);
            next = slice.reference_or_none();
        }
        Ok(out)
    }

    fn reference_or_none(&self) -> Option<Arc<Cell>> {
        self.references().first().cloned()
    }

    /// Loads a snake-encoded UTF-8 string
    pub fn load_snake_string(&mut self) -> Result<String> {
        let bytes = self.load_snake_bytes()?;
        String::from_utf8(bytes)
            .map_err(|e| CellError::ValueOutOfRange {
                value: format!("non UTF-8 string ({e})"),
                bits: 8,
            })
    }

    /// Splits off the next `bits` bits and `refs` references as their own
    /// slice over the same cell
    pub fn load_sub_slice(&mut self, bits: usize, refs: usize) -> Result<Slice> {
        self.ensure_bits(bits)?;
        self.ensure_refs(refs)?;
        let sub = Slice {
            cell: self.cell.clone(),
            bit_pos: self.bit_pos,
            bit_end: self.bit_pos + bits,
            ref_pos: self.ref_pos,
            ref_end: self.ref_pos + refs,
        };
        self.bit_pos += bits;
        self.ref_pos += refs;
        Ok(sub)
    }

    /// Packs the unread remainder into a new ordinary cell
    pub fn as_cell(&self) -> Result<Arc<Cell>> {
        if self.bit_pos == 0
            && self.ref_pos == 0
            && self.bit_end == self.cell.bit_len()
            && self.ref_end == self.cell.reference_count()
            && !self.cell.is_exotic()
        {
            return Ok(self.cell.clone());
        }
        let mut builder = Builder::new();
        builder.store_slice(self)?;
        builder.end_cell()
    }
}

impl From<Arc<Cell>> for Slice {
    fn from(cell: Arc<Cell>) -> Self {
        Self::new(cell)
    }
}
