//! Cell builder
//!
//! `Builder` accumulates up to 1023 bits and 4 references and is consumed
//! by [`Builder::end_cell`] (or [`Builder::end_exotic_cell`]), which computes
//! the level mask, hashes and depths of the new cell.
//!
//! Every store checks capacity before writing, so a failed store leaves the
//! builder unchanged.
//!
//! # Examples
//!
//! ```rust
//! use tvm_cells::tvm::{Address, Builder};
//!
//! let mut builder = Builder::new();
//!
//! let addr = Address::new(0, [0u8; 32]);
//! builder.store_address(Some(&addr)).unwrap();
//! builder.store_coins(1_000_000_000).unwrap();
//!
//! let cell = builder.end_cell().unwrap();
//! assert_eq!(cell.bit_len(), 267 + 4 + 32);
//! ```

use crate::tvm::address::{Address, ExternalAddress};
use crate::tvm::bitstring::BitString;
use crate::tvm::cell::{Cell, CellKind, MAX_CELL_BITS, MAX_CELL_REFS};
use crate::tvm::error::{CellError, Result};
use crate::tvm::slice::Slice;
use num_bigint::{BigInt, BigUint, Sign};
use std::sync::Arc;

/// Appends bits and references for a new cell
#[derive(Debug, Clone, Default)]
pub struct Builder {
    data: Vec<u8>,
    bit_len: usize,
    references: Vec<Arc<Cell>>,
}

impl Builder {
    /// Creates a new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of bits used
    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    /// Returns the number of available bits
    pub fn available_bits(&self) -> usize {
        MAX_CELL_BITS - self.bit_len
    }

    /// Returns the number of references
    pub fn ref_count(&self) -> usize {
        self.references.len()
    }

    /// Returns the number of available references
    pub fn available_refs(&self) -> usize {
        MAX_CELL_REFS - self.references.len()
    }

    fn ensure_bits(&self, need: usize) -> Result<()> {
        if need > self.available_bits() {
            return Err(CellError::BitsOverflow {
                need,
                available: self.available_bits(),
            });
        }
        Ok(())
    }

    fn ensure_refs(&self, need: usize) -> Result<()> {
        if need > self.available_refs() {
            return Err(CellError::RefsOverflow);
        }
        Ok(())
    }

    fn push_bit(&mut self, bit: bool) {
        if self.bit_len % 8 == 0 {
            self.data.push(0);
        }
        if bit {
            self.data[self.bit_len / 8] |= 1 << (7 - self.bit_len % 8);
        }
        self.bit_len += 1;
    }

    /// Writes the low `bits` bits of `value`, most significant first
    fn push_uint(&mut self, value: u64, bits: usize) {
        for i in (0..bits).rev() {
            self.push_bit((value >> i) & 1 == 1);
        }
    }

    fn push_bytes(&mut self, bytes: &[u8]) {
        if self.bit_len % 8 == 0 {
            self.data.extend_from_slice(bytes);
            self.bit_len += bytes.len() * 8;
        } else {
            for &byte in bytes {
                self.push_uint(byte as u64, 8);
            }
        }
    }

    fn push_big_uint(&mut self, value: &BigUint, bits: usize) {
        for i in (0..bits as u64).rev() {
            self.push_bit(value.bit(i));
        }
    }

    /// Stores a single bit
    pub fn store_bit(&mut self, bit: bool) -> Result<&mut Self> {
        self.ensure_bits(1)?;
        self.push_bit(bit);
        Ok(self)
    }

    /// Stores a bit string
    pub fn store_bits(&mut self, bits: &BitString) -> Result<&mut Self> {
        self.ensure_bits(bits.len())?;
        if self.bit_len % 8 == 0 {
            // Tail bits of `to_bytes` are zero, so the unused part of the
            // last byte stays clear
            self.data.extend_from_slice(&bits.to_bytes());
            self.bit_len += bits.len();
        } else {
            for bit in bits.iter() {
                self.push_bit(bit);
            }
        }
        Ok(self)
    }

    /// Stores whole bytes
    pub fn store_buffer(&mut self, bytes: &[u8]) -> Result<&mut Self> {
        self.ensure_bits(bytes.len() * 8)?;
        self.push_bytes(bytes);
        Ok(self)
    }

    pub fn store_u8(&mut self, value: u8) -> Result<&mut Self> {
        self.store_uint(value as u64, 8)
    }

    pub fn store_u16(&mut self, value: u16) -> Result<&mut Self> {
        self.store_uint(value as u64, 16)
    }

    /// Stores a u32 value
    pub fn store_u32(&mut self, value: u32) -> Result<&mut Self> {
        self.store_uint(value as u64, 32)
    }

    /// Stores a u64 value
    pub fn store_u64(&mut self, value: u64) -> Result<&mut Self> {
        self.store_uint(value, 64)
    }

    /// Stores an unsigned integer with specific bit length
    pub fn store_uint(&mut self, value: u64, bits: usize) -> Result<&mut Self> {
        if bits > 64 || (bits < 64 && value >> bits != 0) {
            return Err(CellError::ValueOutOfRange {
                value: value.to_string(),
                bits,
            });
        }
        self.ensure_bits(bits)?;
        self.push_uint(value, bits);
        Ok(self)
    }

    /// Stores a signed integer in two's complement with specific bit length
    pub fn store_int(&mut self, value: i64, bits: usize) -> Result<&mut Self> {
        let fits = match bits {
            0 => value == 0,
            1..=64 => {
                let bound = 1i128 << (bits - 1);
                (-bound..bound).contains(&(value as i128))
            }
            _ => false,
        };
        if !fits {
            return Err(CellError::ValueOutOfRange {
                value: value.to_string(),
                bits,
            });
        }
        self.ensure_bits(bits)?;
        self.push_uint(value as u64, bits);
        Ok(self)
    }

    /// Stores an unsigned integer of up to 256 bits
    pub fn store_big_uint(&mut self, value: &BigUint, bits: usize) -> Result<&mut Self> {
        if bits > 256 || value.bits() > bits as u64 {
            return Err(CellError::ValueOutOfRange {
                value: value.to_string(),
                bits,
            });
        }
        self.ensure_bits(bits)?;
        self.push_big_uint(value, bits);
        Ok(self)
    }

    /// Stores a signed integer of up to 257 bits in two's complement
    pub fn store_big_int(&mut self, value: &BigInt, bits: usize) -> Result<&mut Self> {
        let out_of_range = || CellError::ValueOutOfRange {
            value: value.to_string(),
            bits,
        };
        if bits > 257 {
            return Err(out_of_range());
        }
        let magnitude = value.magnitude();
        let encoded = match value.sign() {
            Sign::NoSign => BigUint::default(),
            _ if bits == 0 => return Err(out_of_range()),
            Sign::Plus => {
                if magnitude.bits() >= bits as u64 {
                    return Err(out_of_range());
                }
                magnitude.clone()
            }
            Sign::Minus => {
                let bound = BigUint::from(1u8) << (bits - 1);
                if magnitude > &bound {
                    return Err(out_of_range());
                }
                (BigUint::from(1u8) << bits) - magnitude
            }
        };
        self.ensure_bits(bits)?;
        self.push_big_uint(&encoded, bits);
        Ok(self)
    }

    /// Stores a variable-length unsigned integer: a `length_bits` byte count
    /// followed by that many big-endian bytes
    pub fn store_var_uint(&mut self, value: u128, length_bits: usize) -> Result<&mut Self> {
        let byte_len = (128 - value.leading_zeros() as usize).div_ceil(8);
        let max_len = if length_bits >= 8 {
            usize::MAX
        } else {
            (1usize << length_bits) - 1
        };
        if length_bits == 0 || length_bits > 32 || byte_len > max_len {
            return Err(CellError::ValueOutOfRange {
                value: value.to_string(),
                bits: max_len.min(16) * 8,
            });
        }
        self.ensure_bits(length_bits + byte_len * 8)?;
        self.push_uint(byte_len as u64, length_bits);
        self.push_bytes(&value.to_be_bytes()[16 - byte_len..]);
        Ok(self)
    }

    /// Stores coins (VarUInteger 16), at most 15 value bytes
    pub fn store_coins(&mut self, amount: u128) -> Result<&mut Self> {
        self.store_var_uint(amount, 4)
    }

    /// Stores a reference to another cell
    pub fn store_ref(&mut self, cell: Arc<Cell>) -> Result<&mut Self> {
        self.ensure_refs(1)?;
        self.references.push(cell);
        Ok(self)
    }

    /// Stores an optional reference (Maybe ^Cell)
    pub fn store_maybe_ref(&mut self, cell: Option<Arc<Cell>>) -> Result<&mut Self> {
        match cell {
            Some(c) => {
                self.ensure_bits(1)?;
                self.ensure_refs(1)?;
                self.push_bit(true);
                self.references.push(c);
            }
            None => {
                self.store_bit(false)?;
            }
        }
        Ok(self)
    }

    /// Appends the bits and references of another builder
    pub fn store_builder(&mut self, other: Builder) -> Result<&mut Self> {
        self.ensure_bits(other.bit_len)?;
        self.ensure_refs(other.references.len())?;
        let bits = BitString::new(other.data, 0, other.bit_len)?;
        self.store_bits(&bits)?;
        self.references.extend(other.references);
        Ok(self)
    }

    /// Appends the unread bits and references of a slice
    pub fn store_slice(&mut self, slice: &Slice) -> Result<&mut Self> {
        self.ensure_bits(slice.remaining_bits())?;
        self.ensure_refs(slice.remaining_refs())?;
        self.store_bits(&slice.preload_bits(slice.remaining_bits())?)?;
        self.references.extend(slice.references().iter().cloned());
        Ok(self)
    }

    /// Stores a standard address, or `addr_none` for `None`
    pub fn store_address(&mut self, address: Option<&Address>) -> Result<&mut Self> {
        match address {
            None => {
                // addr_none$00
                self.store_uint(0b00, 2)?;
            }
            Some(addr) => {
                // addr_std$10 anycast:(Maybe Anycast) workchain_id:int8 address:bits256
                self.ensure_bits(Address::BIT_LEN)?;
                self.push_uint(0b10, 2);
                self.push_bit(false);
                self.push_uint(addr.workchain as u8 as u64, 8);
                self.push_bytes(&addr.hash_part);
            }
        }
        Ok(self)
    }

    /// Stores an external address
    pub fn store_external_address(&mut self, address: &ExternalAddress) -> Result<&mut Self> {
        // addr_extern$01 len:(## 9) external_address:(bits len)
        let len = address.bits().len();
        if len >= 1 << 9 {
            return Err(CellError::ValueOutOfRange {
                value: len.to_string(),
                bits: 9,
            });
        }
        self.ensure_bits(2 + 9 + len)?;
        self.push_uint(0b01, 2);
        self.push_uint(len as u64, 9);
        self.store_bits(address.bits())
    }

    /// Stores bytes using snake encoding: what fits here, the rest in a
    /// chain of cells hanging off the last reference
    pub fn store_snake_bytes(&mut self, bytes: &[u8]) -> Result<&mut Self> {
        let head = (self.available_bits() / 8).min(bytes.len());
        let (first, rest) = bytes.split_at(head);
        if !rest.is_empty() {
            self.ensure_refs(1)?;
        }

        let mut tail: Option<Arc<Cell>> = None;
        for chunk in rest.chunks(MAX_CELL_BITS / 8).rev() {
            let mut next = Builder::new();
            next.store_buffer(chunk)?;
            if let Some(cell) = tail.take() {
                next.store_ref(cell)?;
            }
            tail = Some(next.end_cell()?);
        }

        self.push_bytes(first);
        if let Some(cell) = tail {
            self.references.push(cell);
        }
        Ok(self)
    }

    /// Stores a string using snake encoding
    pub fn store_snake_string(&mut self, s: &str) -> Result<&mut Self> {
        self.store_snake_bytes(s.as_bytes())
    }

    fn into_bits(self) -> Result<(BitString, Vec<Arc<Cell>>)> {
        let bits = BitString::new(self.data, 0, self.bit_len)?;
        Ok((bits, self.references))
    }

    /// Finalizes an ordinary cell
    pub fn end_cell(self) -> Result<Arc<Cell>> {
        let (bits, references) = self.into_bits()?;
        Ok(Arc::new(Cell::new(CellKind::Ordinary, bits, references)?))
    }

    /// Finalizes an exotic cell whose kind is given by the first data byte
    pub fn end_exotic_cell(self) -> Result<Arc<Cell>> {
        if self.bit_len < 8 {
            return Err(CellError::MissingExoticTag(self.bit_len));
        }
        let kind = CellKind::from_tag(self.data[0])?;
        let (bits, references) = self.into_bits()?;
        Ok(Arc::new(Cell::new(kind, bits, references)?))
    }

    /// Finalizes the cell and starts reading it
    pub fn to_slice(self) -> Result<Slice> {
        Ok(Slice::new(self.end_cell()?))
    }
}
