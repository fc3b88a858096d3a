#![forbid(unsafe_code)]
//! Shared unit-carrying types for vbd.
//!
//! Sector numbers and byte offsets are distinct newtypes so that the transfer
//! engine cannot mix the two units by accident.

use serde::{Deserialize, Serialize};
use std::fmt;
use vbd_error::{Result, VbdError};

/// Unit the host block layer always counts in, regardless of the device's
/// own sector size.
pub const KERNEL_SECTOR_SIZE: u32 = 512;

pub const DEFAULT_SECTOR_SIZE: u32 = 512;
pub const DEFAULT_NSECTORS: u64 = 1024;

/// Heads reported by the synthesized geometry.
pub const GEOMETRY_HEADS: u8 = 4;
/// Sectors per track reported by the synthesized geometry.
pub const GEOMETRY_SECTORS_PER_TRACK: u8 = 16;
/// Start of data, in sectors, reported by the synthesized geometry.
pub const GEOMETRY_START: u64 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SectorNumber(pub u64);

impl SectorNumber {
    /// Advance by `count` sectors, returning `None` on overflow.
    #[must_use]
    pub fn checked_add(self, count: u64) -> Option<Self> {
        self.0.checked_add(count).map(Self)
    }
}

impl fmt::Display for SectorNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Byte offset into a backing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ByteOffset(pub u64);

impl ByteOffset {
    pub const ZERO: Self = Self(0);

    /// Add a byte count, returning `None` on overflow.
    #[must_use]
    pub fn checked_add(self, bytes: u64) -> Option<Self> {
        self.0.checked_add(bytes).map(Self)
    }
}

impl fmt::Display for ByteOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Validated device sector size (power of two in 512..=65536).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct SectorSize(u32);

impl SectorSize {
    pub const DEFAULT: Self = Self(DEFAULT_SECTOR_SIZE);

    pub fn new(value: u32) -> Result<Self> {
        if !value.is_power_of_two() || !(KERNEL_SECTOR_SIZE..=65536).contains(&value) {
            return Err(VbdError::InvalidConfig(format!(
                "sector_size={value} (must be power of two in 512..=65536)"
            )));
        }
        Ok(Self(value))
    }

    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }

    /// Byte offset of `sector`, or `None` on overflow.
    #[must_use]
    pub fn sector_to_byte(self, sector: SectorNumber) -> Option<ByteOffset> {
        sector.0.checked_mul(u64::from(self.0)).map(ByteOffset)
    }

    /// Length in bytes of `count` sectors, or `None` on overflow.
    #[must_use]
    pub fn sectors_to_bytes(self, count: u64) -> Option<u64> {
        count.checked_mul(u64::from(self.0))
    }
}

impl Default for SectorSize {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TryFrom<u32> for SectorSize {
    type Error = VbdError;

    fn try_from(value: u32) -> Result<Self> {
        Self::new(value)
    }
}

impl From<SectorSize> for u32 {
    fn from(value: SectorSize) -> Self {
        value.0
    }
}

/// Data direction of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Read,
    Write,
}

impl Direction {
    #[must_use]
    pub fn is_write(self) -> bool {
        matches!(self, Self::Write)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => f.write_str("read"),
            Self::Write => f.write_str("write"),
        }
    }
}

/// Legacy CHS geometry reported to hosts that still ask for one.
///
/// A RAM device has no physical geometry; the values are synthesized from
/// capacity alone: 4 heads, 16 sectors per track, data starting at sector 4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geometry {
    pub cylinders: u64,
    pub heads: u8,
    pub sectors: u8,
    pub start: u64,
}

impl Geometry {
    /// Synthesize geometry for a device of `capacity_bytes`.
    ///
    /// `cylinders = (total_sectors & !0x3F) >> 6`, with `total_sectors`
    /// counted in 512-byte kernel sectors.
    #[must_use]
    pub fn from_capacity(capacity_bytes: u64) -> Self {
        let total_sectors = capacity_bytes / u64::from(KERNEL_SECTOR_SIZE);
        Self {
            cylinders: (total_sectors & !0x3F) >> 6,
            heads: GEOMETRY_HEADS,
            sectors: GEOMETRY_SECTORS_PER_TRACK,
            start: GEOMETRY_START,
        }
    }
}
