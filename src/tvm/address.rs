//! Addresses stored in cells
//!
//! Supports standard internal addresses (workchain + hash) in raw
//! `wc:hex` and user-friendly base64 forms, and external addresses.

use crate::crc::CRC16;
use crate::tvm::bitstring::BitString;
use crate::tvm::error::{CellError, Result};
use base64::Engine;
use std::fmt;

const TAG_BOUNCEABLE: u8 = 0x11;
const TAG_NON_BOUNCEABLE: u8 = 0x51;
const TAG_TEST_ONLY: u8 = 0x80;

/// Standard (`addr_std`) address
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    /// Workchain ID (-1 for masterchain, 0 for basechain)
    pub workchain: i8,
    /// 32-byte hash part of the address
    pub hash_part: [u8; 32],
    /// Whether the address is bounceable
    pub is_bounceable: bool,
    /// Whether this is a test-only address
    pub is_test_only: bool,
}

impl Address {
    /// Bits taken by `addr_std$10` without anycast
    pub const BIT_LEN: usize = 2 + 1 + 8 + 256;

    /// Creates a new address from workchain and hash part
    pub fn new(workchain: i8, hash_part: [u8; 32]) -> Self {
        Self {
            workchain,
            hash_part,
            is_bounceable: true,
            is_test_only: false,
        }
    }

    /// Parses either the raw or the user-friendly form
    pub fn parse(address: &str) -> Result<Self> {
        if address.contains(':') {
            Self::from_hex(address)
        } else {
            Self::from_base64(address)
        }
    }

    /// Parses address from hex format: "workchain:hash"
    pub fn from_hex(address: &str) -> Result<Self> {
        let (workchain, hash_hex) = address
            .split_once(':')
            .ok_or_else(|| CellError::InvalidAddress(format!("missing workchain in {address:?}")))?;

        let workchain = workchain
            .parse::<i8>()
            .map_err(|e| CellError::InvalidAddress(format!("bad workchain {workchain:?}: {e}")))?;
        if hash_hex.len() != 64 {
            return Err(CellError::InvalidAddress(
                "hash part must be 64 hex characters".to_string(),
            ));
        }

        let mut hash_part = [0u8; 32];
        hex::decode_to_slice(hash_hex, &mut hash_part)?;
        Ok(Self::new(workchain, hash_part))
    }

    /// Parses address from base64 user-friendly format
    pub fn from_base64(address: &str) -> Result<Self> {
        let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(address)
            .or_else(|_| base64::engine::general_purpose::STANDARD.decode(address))?;

        if decoded.len() != 36 {
            return Err(CellError::InvalidAddress(format!(
                "user-friendly address must be 36 bytes, got {}",
                decoded.len()
            )));
        }

        let expected_crc = u16::from_be_bytes([decoded[34], decoded[35]]);
        let actual_crc = CRC16.checksum(&decoded[..34]);
        if expected_crc != actual_crc {
            return Err(CellError::InvalidAddress("checksum mismatch".to_string()));
        }

        let is_test_only = decoded[0] & TAG_TEST_ONLY != 0;
        let is_bounceable = match decoded[0] & !TAG_TEST_ONLY {
            TAG_BOUNCEABLE => true,
            TAG_NON_BOUNCEABLE => false,
            tag => {
                return Err(CellError::InvalidAddress(format!(
                    "unknown address tag {tag:#04x}"
                )));
            }
        };

        let mut hash_part = [0u8; 32];
        hash_part.copy_from_slice(&decoded[2..34]);
        Ok(Self {
            workchain: decoded[1] as i8,
            hash_part,
            is_bounceable,
            is_test_only,
        })
    }

    /// Converts to hex format (workchain:hash)
    pub fn to_hex(&self) -> String {
        format!("{}:{}", self.workchain, hex::encode(self.hash_part))
    }

    /// User-friendly form with explicit flags
    pub fn to_friendly(&self, url_safe: bool, bounceable: bool, test_only: bool) -> String {
        let mut tag = if bounceable {
            TAG_BOUNCEABLE
        } else {
            TAG_NON_BOUNCEABLE
        };
        if test_only {
            tag |= TAG_TEST_ONLY;
        }

        let mut data = Vec::with_capacity(36);
        data.push(tag);
        data.push(self.workchain as u8);
        data.extend_from_slice(&self.hash_part);
        data.extend_from_slice(&CRC16.checksum(&data).to_be_bytes());

        if url_safe {
            base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(&data)
        } else {
            base64::engine::general_purpose::STANDARD.encode(&data)
        }
    }

    /// Converts to user-friendly base64 format using the address's own flags
    pub fn to_base64(&self) -> String {
        self.to_friendly(true, self.is_bounceable, self.is_test_only)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64())
    }
}

impl std::str::FromStr for Address {
    type Err = CellError;

    fn from_str(s: &str) -> Result<Self> {
        Address::parse(s)
    }
}

/// External (`addr_extern`) address: up to 511 arbitrary bits
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ExternalAddress {
    bits: BitString,
}

impl ExternalAddress {
    pub fn new(bits: BitString) -> Self {
        Self { bits }
    }

    /// Creates an external address from bytes
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self::new(BitString::from_bytes(bytes))
    }

    pub fn bits(&self) -> &BitString {
        &self.bits
    }
}

impl fmt::Display for ExternalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.bits.is_empty() {
            write!(f, "ExternalAddress<null>")
        } else {
            write!(f, "ExternalAddress<{}>", self.bits)
        }
    }
}
