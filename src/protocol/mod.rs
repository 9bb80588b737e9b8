//! Wire-level framing shared by every instrument.

pub mod checksum;
pub mod frame;

pub use checksum::{compute, verify, ByteOrder, Checksum};
pub use frame::{Frame, FrameError};
