//! Immutable bit strings
//!
//! A `BitString` is a read-only view over a shared byte buffer. Slicing
//! never copies: the view only narrows its offset and length, so cells,
//! slices and loaded sub-strings all point into the same allocation.

use crate::tvm::error::{CellError, Result};
use bytes::Bytes;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Length-tracked, immutable sequence of bits (MSB first)
#[derive(Clone)]
pub struct BitString {
    data: Bytes,
    offset: usize,
    len: usize,
}

impl BitString {
    /// Creates an empty bit string
    pub fn empty() -> Self {
        Self {
            data: Bytes::new(),
            offset: 0,
            len: 0,
        }
    }

    /// Creates a view of `len` bits starting at bit `offset` of `data`
    pub fn new(data: impl Into<Bytes>, offset: usize, len: usize) -> Result<Self> {
        let data = data.into();
        let total = data.len() * 8;
        let end = offset.checked_add(len).unwrap_or(usize::MAX);
        if end > total {
            return Err(CellError::BitsOutOfRange {
                start: offset,
                end,
                len: total,
            });
        }
        Ok(Self { data, offset, len })
    }

    /// Copies whole bytes into a new bit string
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            data: Bytes::copy_from_slice(bytes),
            offset: 0,
            len: bytes.len() * 8,
        }
    }

    /// Number of bits
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_byte_aligned(&self) -> bool {
        self.len % 8 == 0
    }

    /// Returns the bit at index `i`
    pub fn get_bit(&self, i: usize) -> Result<bool> {
        if i >= self.len {
            return Err(CellError::BitsOutOfRange {
                start: i,
                end: i + 1,
                len: self.len,
            });
        }
        Ok(self.bit(i))
    }

    #[inline]
    pub(crate) fn bit(&self, i: usize) -> bool {
        let pos = self.offset + i;
        (self.data[pos / 8] >> (7 - pos % 8)) & 1 == 1
    }

    /// Zero-copy view of `len` bits starting at `start`
    pub fn slice(&self, start: usize, len: usize) -> Result<BitString> {
        let end = start.checked_add(len).unwrap_or(usize::MAX);
        if end > self.len {
            return Err(CellError::BitsOutOfRange {
                start,
                end,
                len: self.len,
            });
        }
        Ok(Self {
            data: self.data.clone(),
            offset: self.offset + start,
            len,
        })
    }

    /// Reads up to 64 bits starting at `start` as a big-endian unsigned value
    pub fn read_uint(&self, start: usize, bits: usize) -> Result<u64> {
        if bits > 64 {
            return Err(CellError::ValueOutOfRange {
                value: format!("{bits}-bit read"),
                bits: 64,
            });
        }
        if start + bits > self.len {
            return Err(CellError::NotEnoughBits {
                need: bits,
                have: self.len.saturating_sub(start),
            });
        }
        let mut value = 0u64;
        for i in 0..bits {
            value = (value << 1) | self.bit(start + i) as u64;
        }
        Ok(value)
    }

    /// Iterates over the bits
    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        (0..self.len).map(move |i| self.bit(i))
    }

    /// Packs the bits into `ceil(len / 8)` bytes, padding the tail with zeros
    pub fn to_bytes(&self) -> Vec<u8> {
        let byte_len = self.len.div_ceil(8);
        if self.offset % 8 == 0 {
            let start = self.offset / 8;
            let mut out = self.data[start..start + byte_len].to_vec();
            let rem = self.len % 8;
            if rem != 0 {
                if let Some(last) = out.last_mut() {
                    *last &= 0xFFu8 << (8 - rem);
                }
            }
            return out;
        }

        let mut out = vec![0u8; byte_len];
        for i in 0..self.len {
            if self.bit(i) {
                out[i / 8] |= 1 << (7 - i % 8);
            }
        }
        out
    }

    /// Packs the bits and, when the length is not byte-aligned, appends the
    /// completion tag: a single `1` bit followed by zeros up to the byte boundary
    pub fn to_padded_bytes(&self) -> Vec<u8> {
        let mut out = self.to_bytes();
        let rem = self.len % 8;
        if rem != 0 {
            if let Some(last) = out.last_mut() {
                *last |= 1 << (7 - rem);
            }
        }
        out
    }
}

impl Default for BitString {
    fn default() -> Self {
        Self::empty()
    }
}

impl PartialEq for BitString {
    fn eq(&self, other: &Self) -> bool {
        self.len == other.len && self.to_bytes() == other.to_bytes()
    }
}

impl Eq for BitString {}

impl Hash for BitString {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.len.hash(state);
        self.to_bytes().hash(state);
    }
}

impl Ord for BitString {
    /// Lexicographic bit order; a proper prefix sorts first
    fn cmp(&self, other: &Self) -> Ordering {
        self.to_bytes()
            .cmp(&other.to_bytes())
            .then(self.len.cmp(&other.len))
    }
}

impl PartialOrd for BitString {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for BitString {
    /// Uppercase hex. A length that is not a multiple of 4 is completed with
    /// a `1` bit and zeros to the next nibble, and marked with a trailing `_`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let padded = hex::encode_upper(self.to_padded_bytes());
        if self.len % 4 == 0 {
            let nibbles = self.len / 4;
            return f.write_str(&padded[..nibbles]);
        }
        if self.len % 8 <= 4 {
            write!(f, "{}_", &padded[..padded.len() - 1])
        } else {
            write!(f, "{padded}_")
        }
    }
}

impl fmt::Debug for BitString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BitString({}, x{{{}}})", self.len, self)
    }
}

impl From<&[u8]> for BitString {
    fn from(bytes: &[u8]) -> Self {
        Self::from_bytes(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slice_is_zero_copy() {
        let bits = BitString::from_bytes(&[0xAB, 0xCD, 0xEF]);
        let sub = bits.slice(4, 12).unwrap();
        assert_eq!(sub.len(), 12);
        assert_eq!(sub.to_bytes(), vec![0xBC, 0xD0]);
        assert_eq!(sub.data.as_ptr(), bits.data.as_ptr());
    }

    #[test]
    fn test_slice_out_of_bounds() {
        let bits = BitString::from_bytes(&[0xFF]);
        let err = bits.slice(4, 5).unwrap_err();
        assert_eq!(err.kind(), crate::tvm::ErrorKind::Range);
        assert!(bits.slice(8, 0).is_ok());
    }

    #[test]
    fn test_get_bit() {
        let bits = BitString::new(vec![0b1010_0000], 0, 3).unwrap();
        assert!(bits.get_bit(0).unwrap());
        assert!(!bits.get_bit(1).unwrap());
        assert!(bits.get_bit(2).unwrap());
        assert!(bits.get_bit(3).is_err());
    }

    #[test]
    fn test_equality_ignores_offset() {
        let a = BitString::from_bytes(&[0x0F, 0xF0]).slice(4, 8).unwrap();
        let b = BitString::from_bytes(&[0xFF]);
        assert_eq!(a, b);

        // Garbage past the end must not matter
        let c = BitString::new(vec![0b1011_1111], 0, 2).unwrap();
        let d = BitString::new(vec![0b1000_0000], 0, 2).unwrap();
        assert_eq!(c, d);
    }

    #[test]
    fn test_ordering() {
        let one = BitString::new(vec![0x80], 0, 1).unwrap();
        let one_zero = BitString::new(vec![0x80], 0, 2).unwrap();
        let one_one = BitString::new(vec![0xC0], 0, 2).unwrap();
        let zero = BitString::new(vec![0x00], 0, 1).unwrap();
        assert!(zero < one);
        assert!(one < one_zero);
        assert!(one_zero < one_one);
    }

    #[test]
    fn test_padded_bytes() {
        let bits = BitString::new(vec![0b1111_1000], 0, 5).unwrap();
        assert_eq!(bits.to_padded_bytes(), vec![0b1111_1100]);
        let aligned = BitString::from_bytes(&[0x12]);
        assert_eq!(aligned.to_padded_bytes(), vec![0x12]);
    }

    #[test]
    fn test_display() {
        assert_eq!(BitString::empty().to_string(), "");
        assert_eq!(BitString::from_bytes(&[0x07, 0x5B]).to_string(), "075B");
        assert_eq!(BitString::new(vec![0xA0], 0, 4).unwrap().to_string(), "A");
        // 1 bit "1" -> 1100 -> C_
        assert_eq!(BitString::new(vec![0x80], 0, 1).unwrap().to_string(), "C_");
        // 6 bits 101010 -> 1010 1010 -> AA_
        assert_eq!(BitString::new(vec![0xA8], 0, 6).unwrap().to_string(), "AA_");
        // 10 bits
        assert_eq!(
            BitString::new(vec![0xFF, 0xC0], 0, 10).unwrap().to_string(),
            "FFE_"
        );
    }

    #[test]
    fn test_read_uint() {
        let bits = BitString::from_bytes(&[0x12, 0x34]);
        assert_eq!(bits.read_uint(4, 8).unwrap(), 0x23);
        assert!(bits.read_uint(10, 8).is_err());
    }
}
