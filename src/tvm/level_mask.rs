//! Merkle level masks
//!
//! Bit `i` of the mask is set when level `i + 1` carries an independently
//! computed hash. Level 0 is always present.

use serde::{Deserialize, Serialize};

/// Cell level range (0-3)
pub const MAX_CELL_LEVEL: u8 = 3;

/// 3-bit mask of significant Merkle levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct LevelMask(u8);

impl LevelMask {
    pub const EMPTY: LevelMask = LevelMask(0);

    /// Keeps only the three meaningful bits
    pub const fn new(mask: u8) -> Self {
        Self(mask & 0b111)
    }

    /// Mask with only `level` significant (empty for level 0)
    pub const fn for_level(level: u8) -> Self {
        if level == 0 {
            Self::EMPTY
        } else {
            Self::new(1 << (level - 1))
        }
    }

    pub const fn value(self) -> u8 {
        self.0
    }

    /// Highest significant level
    pub const fn level(self) -> u8 {
        8 - self.0.leading_zeros() as u8
    }

    /// Number of significant levels above zero
    pub const fn hash_index(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Number of distinct hashes the cell carries, level 0 included
    pub const fn hash_count(self) -> usize {
        self.hash_index() + 1
    }

    /// Restricts the mask to levels up to and including `level`
    pub const fn apply(self, level: u8) -> Self {
        if level >= MAX_CELL_LEVEL {
            self
        } else {
            Self::new(self.0 & ((1 << level) - 1))
        }
    }

    pub const fn is_significant(self, level: u8) -> bool {
        level == 0 || (self.0 >> (level - 1)) & 1 == 1
    }

    pub const fn shift_right(self) -> Self {
        Self::new(self.0 >> 1)
    }
}

impl std::ops::BitOr for LevelMask {
    type Output = LevelMask;

    fn bitor(self, rhs: Self) -> Self::Output {
        LevelMask::new(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for LevelMask {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = *self | rhs;
    }
}

impl From<u8> for LevelMask {
    fn from(mask: u8) -> Self {
        LevelMask::new(mask)
    }
}
