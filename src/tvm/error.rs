use thiserror::Error;

use crate::tvm::cell::{CellKind, MAX_CELL_DEPTH};

/// Coarse classification of a [`CellError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A value does not fit the declared width or a bit range is out of bounds
    Range,
    /// The 1023-bit / 4-reference cell limit would be exceeded
    Capacity,
    /// A slice was read past its available bits or references
    Underflow,
    /// An exotic cell layout is inconsistent with its kind
    Validation,
    /// Malformed BoC header or body
    Format,
    /// Cell tree depth exceeds the maximum
    Depth,
    /// CRC-32C mismatch
    Checksum,
    /// Invalid base64, hex or address text
    Encoding,
}

#[derive(Debug, Error)]
pub enum CellError {
    #[error("value {value} does not fit in {bits} bits")]
    ValueOutOfRange { value: String, bits: usize },

    #[error("bit range {start}..{end} is out of bounds for {len} bits")]
    BitsOutOfRange { start: usize, end: usize, len: usize },

    #[error("cell overflow: {need} bits requested, {available} available")]
    BitsOverflow { need: usize, available: usize },

    #[error("cell overflow: cannot store more than 4 references")]
    RefsOverflow,

    #[error("not enough bits: need {need}, have {have}")]
    NotEnoughBits { need: usize, have: usize },

    #[error("not enough refs: need {need}, have {have}")]
    NotEnoughRefs { need: usize, have: usize },

    #[error("slice is not empty: {bits} bits and {refs} refs left")]
    TrailingData { bits: usize, refs: usize },

    #[error("unsupported address tag {0:#04b}")]
    UnsupportedAddress(u8),

    #[error("invalid {kind:?} cell: {reason}")]
    InvalidExotic { kind: CellKind, reason: String },

    #[error("unknown exotic cell tag {0}")]
    UnknownExoticTag(u8),

    #[error("exotic cell needs an 8-bit type tag, found {0} bits")]
    MissingExoticTag(usize),

    #[error("level mask mismatch in cell #{index}: declared {declared:#05b}, computed {computed:#05b}")]
    LevelMaskMismatch { index: usize, declared: u8, computed: u8 },

    #[error("malformed BoC at byte {offset}: {reason}")]
    Format { offset: usize, reason: String },

    #[error("malformed BoC cell #{index} at byte {offset}: {reason}")]
    CellFormat { index: usize, offset: usize, reason: String },

    #[error("cell depth {0} exceeds maximum {max}", max = MAX_CELL_DEPTH)]
    DepthOverflow(usize),

    #[error("CRC32C mismatch at byte {offset}: stored 0x{stored:08x}, computed 0x{computed:08x}")]
    ChecksumMismatch { offset: usize, stored: u32, computed: u32 },

    #[error("invalid base64: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("BoC cell #{index} at byte {offset}: {source}")]
    InCell {
        index: usize,
        offset: usize,
        source: Box<CellError>,
    },
}

impl CellError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CellError::ValueOutOfRange { .. } | CellError::BitsOutOfRange { .. } => {
                ErrorKind::Range
            }
            CellError::BitsOverflow { .. } | CellError::RefsOverflow => ErrorKind::Capacity,
            CellError::NotEnoughBits { .. }
            | CellError::NotEnoughRefs { .. }
            | CellError::TrailingData { .. } => ErrorKind::Underflow,
            CellError::UnsupportedAddress(_)
            | CellError::InvalidExotic { .. }
            | CellError::UnknownExoticTag(_)
            | CellError::MissingExoticTag(_)
            | CellError::LevelMaskMismatch { .. } => ErrorKind::Validation,
            CellError::Format { .. } | CellError::CellFormat { .. } => ErrorKind::Format,
            CellError::DepthOverflow(_) => ErrorKind::Depth,
            CellError::ChecksumMismatch { .. } => ErrorKind::Checksum,
            CellError::InvalidBase64(_)
            | CellError::InvalidHex(_)
            | CellError::InvalidAddress(_) => ErrorKind::Encoding,
            CellError::InCell { source, .. } => source.kind(),
        }
    }

    pub(crate) fn format(offset: usize, reason: impl Into<String>) -> Self {
        CellError::Format {
            offset,
            reason: reason.into(),
        }
    }

    pub(crate) fn cell_format(index: usize, offset: usize, reason: impl Into<String>) -> Self {
        CellError::CellFormat {
            index,
            offset,
            reason: reason.into(),
        }
    }

    /// Attaches the position of the BoC cell that failed to build
    pub(crate) fn in_cell(self, index: usize, offset: usize) -> Self {
        CellError::InCell {
            index,
            offset,
            source: Box::new(self),
        }
    }

    pub(crate) fn invalid_exotic(kind: CellKind, reason: impl Into<String>) -> Self {
        CellError::InvalidExotic {
            kind,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CellError>;
