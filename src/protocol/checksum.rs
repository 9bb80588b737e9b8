//! CRC-16 frame checksum.
//!
//! The instruments use the reflected CRC-16 found in Modbus-style industrial
//! protocols:
//!
//! - Polynomial: 0xA001 (reflected form of 0x8005)
//! - Initial register: 0xFFFF
//! - Input/Output reflected, no final XOR
//!
//! The empty input yields the initial register value, 0xFFFF.

use std::fmt;

use crc::{Crc, CRC_16_MODBUS};

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Order in which the two checksum bytes travel on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
    /// Low byte first (Modbus RTU convention).
    #[default]
    LowFirst,
    /// High byte first.
    HighFirst,
}

/// A computed 16-bit checksum with accessors for each byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Checksum(u16);

impl Checksum {
    /// Computes the checksum of `bytes`.
    pub fn of(bytes: &[u8]) -> Self {
        Self(compute(bytes))
    }

    /// Wraps an already known checksum value.
    pub const fn from_value(value: u16) -> Self {
        Self(value)
    }

    /// Rebuilds a checksum from the two bytes found on the wire.
    pub fn from_wire(bytes: [u8; 2], order: ByteOrder) -> Self {
        match order {
            ByteOrder::LowFirst => Self(u16::from_le_bytes(bytes)),
            ByteOrder::HighFirst => Self(u16::from_be_bytes(bytes)),
        }
    }

    /// The checksum as a single `u16`.
    pub const fn value(self) -> u16 {
        self.0
    }

    /// Least significant byte.
    pub const fn lo(self) -> u8 {
        (self.0 & 0x00FF) as u8
    }

    /// Most significant byte.
    pub const fn hi(self) -> u8 {
        (self.0 >> 8) as u8
    }

    /// `[lo, hi]`
    pub const fn to_le_bytes(self) -> [u8; 2] {
        [self.lo(), self.hi()]
    }

    /// `[hi, lo]`
    pub const fn to_be_bytes(self) -> [u8; 2] {
        [self.hi(), self.lo()]
    }

    /// The two bytes in the requested wire order.
    pub const fn to_wire(self, order: ByteOrder) -> [u8; 2] {
        match order {
            ByteOrder::LowFirst => self.to_le_bytes(),
            ByteOrder::HighFirst => self.to_be_bytes(),
        }
    }
}

impl From<Checksum> for u16 {
    fn from(value: Checksum) -> Self {
        value.0
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}

/// Computes the CRC-16 of an arbitrary byte sequence.
#[inline]
pub fn compute(bytes: &[u8]) -> u16 {
    CRC16.checksum(bytes)
}

/// Returns true if `claimed` is the checksum of `bytes`.
///
/// A `false` result means the frame is corrupt and should be discarded.
#[inline]
pub fn verify(bytes: &[u8], claimed: u16) -> bool {
    compute(bytes) == claimed
}
