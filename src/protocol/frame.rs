//! Checksum-terminated frames.
//!
//! Wire layout: `address(1) | function_code(1) | payload(N) | checksum(2)`.
//! The checksum covers every byte before it. The order of the two checksum
//! bytes is chosen by the caller through [`ByteOrder`].

use thiserror::Error;

use super::checksum::{ByteOrder, Checksum};

/// Smallest valid frame: address, function code and two checksum bytes.
pub const MIN_FRAME_LEN: usize = 4;

/// Errors returned when decoding a frame.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Fewer bytes than [`MIN_FRAME_LEN`].
    #[error("Frame too short: {0} bytes, need at least {MIN_FRAME_LEN}")]
    TooShort(usize),

    /// The trailing checksum does not match the body.
    #[error("Checksum mismatch: expected {expected}, frame carries {actual}")]
    ChecksumMismatch {
        /// Checksum computed over the frame body.
        expected: Checksum,
        /// Checksum carried by the frame.
        actual: Checksum,
    },
}

/// A validated device frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Device address on the bus.
    pub address: u8,
    /// Function code.
    pub function_code: u8,
    /// Business payload, decoded outside this crate.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Creates a frame.
    pub fn new(address: u8, function_code: u8, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            address,
            function_code,
            payload: payload.into(),
        }
    }

    /// Returns true if the function code carries the exception bit (0x80).
    pub fn is_exception(&self) -> bool {
        self.function_code & 0x80 != 0
    }

    /// Checksum over address, function code and payload.
    pub fn checksum(&self) -> Checksum {
        Checksum::of(&self.body())
    }

    /// Serializes the frame with the checksum bytes in `order`.
    pub fn encode(&self, order: ByteOrder) -> Vec<u8> {
        let mut out = self.body();
        let crc = Checksum::of(&out);
        out.extend_from_slice(&crc.to_wire(order));
        out
    }

    /// Parses and validates a complete frame.
    pub fn decode(bytes: &[u8], order: ByteOrder) -> Result<Self, FrameError> {
        if bytes.len() < MIN_FRAME_LEN {
            return Err(FrameError::TooShort(bytes.len()));
        }

        let (body, tail) = bytes.split_at(bytes.len() - 2);
        let actual = Checksum::from_wire([tail[0], tail[1]], order);
        let expected = Checksum::of(body);
        if expected != actual {
            return Err(FrameError::ChecksumMismatch { expected, actual });
        }

        Ok(Self {
            address: body[0],
            function_code: body[1],
            payload: body[2..].to_vec(),
        })
    }

    fn body(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(self.payload.len() + 4);
        body.push(self.address);
        body.push(self.function_code);
        body.extend_from_slice(&self.payload);
        body
    }
}

/// Appends the checksum of `body` in `order` and returns the full frame.
pub fn seal(body: &[u8], order: ByteOrder) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 2);
    out.extend_from_slice(body);
    out.extend_from_slice(&Checksum::of(body).to_wire(order));
    out
}

/// Returns true if the last two bytes of `frame` are a valid checksum of the
/// rest in `order`.
pub fn is_sealed(frame: &[u8], order: ByteOrder) -> bool {
    if frame.len() < 2 {
        return false;
    }
    let (body, tail) = frame.split_at(frame.len() - 2);
    Checksum::of(body) == Checksum::from_wire([tail[0], tail[1]], order)
}
