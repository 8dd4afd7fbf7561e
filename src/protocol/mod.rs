//! Protocol Layer: Length-Prefixed Framing
//!
//! Prinsip desain:
//! - Satu frame = 2-byte length prefix + payload (max 65535 bytes)
//! - Byte order prefix dipilih caller (big- atau little-endian)
//! - Scratch buffer milik caller, bukan global pool

mod frame;
mod scratch;

pub use frame::{
    read_frame, read_frame_string, write_frame, write_frame_string, ByteOrder, FrameCodec,
    MAX_PAYLOAD_SIZE, PREFIX_SIZE,
};
pub use scratch::{ScratchBuf, ScratchPool};
