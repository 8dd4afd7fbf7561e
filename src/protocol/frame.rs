//! Length-Prefixed Frame Codec
//!
//! Layout:
//! ┌──────────────────────┬──────────────────────────────┐
//! │ length (u16, 2 bytes)│ payload (length bytes)       │
//! └──────────────────────┴──────────────────────────────┘
//!
//! Byte order of the prefix is chosen by the caller. Payloads above 65535
//! bytes are rejected, never split.

use std::io::{self, Read, Write};

use super::scratch::ScratchPool;
use crate::error::{RelayError, Result};

/// Size of the length prefix
pub const PREFIX_SIZE: usize = 2;

/// Largest payload a single frame can carry
pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
    #[default]
    BigEndian,
    LittleEndian,
}

impl ByteOrder {
    #[inline(always)]
    pub fn encode(self, len: u16) -> [u8; PREFIX_SIZE] {
        match self {
            Self::BigEndian => len.to_be_bytes(),
            Self::LittleEndian => len.to_le_bytes(),
        }
    }

    #[inline(always)]
    pub fn decode(self, prefix: [u8; PREFIX_SIZE]) -> u16 {
        match self {
            Self::BigEndian => u16::from_be_bytes(prefix),
            Self::LittleEndian => u16::from_le_bytes(prefix),
        }
    }
}

#[inline]
fn prefix_for(order: ByteOrder, payload: &[u8]) -> Result<[u8; PREFIX_SIZE]> {
    let len = u16::try_from(payload.len()).map_err(|_| RelayError::FrameTooLarge {
        len: payload.len(),
    })?;
    Ok(order.encode(len))
}

/// Fill `buf` as far as the reader allows; returns how much was filled.
fn read_full<R: Read + ?Sized>(r: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

/// Read the length prefix. A reader that ends cleanly before the first byte
/// yields `Eof`; one that ends inside the prefix yields `Truncated`.
fn read_prefix<R: Read + ?Sized>(r: &mut R, order: ByteOrder) -> Result<usize> {
    let mut prefix = [0u8; PREFIX_SIZE];
    match read_full(r, &mut prefix)? {
        0 => Err(RelayError::Eof),
        PREFIX_SIZE => Ok(order.decode(prefix) as usize),
        got => Err(RelayError::Truncated {
            expected: PREFIX_SIZE,
            got,
        }),
    }
}

/// Read exactly `len` payload bytes, appending them to `out`.
fn read_body<R: Read + ?Sized>(r: &mut R, len: usize, out: &mut Vec<u8>) -> Result<()> {
    let start = out.len();
    out.resize(start + len, 0);

    let got = read_full(r, &mut out[start..])?;
    if got < len {
        out.truncate(start);
        return Err(RelayError::Truncated { expected: len, got });
    }
    Ok(())
}

/// Read one frame's payload.
pub fn read_frame<R: Read + ?Sized>(r: &mut R, order: ByteOrder) -> Result<Vec<u8>> {
    let len = read_prefix(r, order)?;
    let mut payload = Vec::with_capacity(len);
    read_body(r, len, &mut payload)?;
    Ok(payload)
}

/// Read one frame whose payload must be UTF-8.
pub fn read_frame_string<R: Read + ?Sized>(r: &mut R, order: ByteOrder) -> Result<String> {
    Ok(String::from_utf8(read_frame(r, order)?)?)
}

/// Write prefix and payload with a single `write_all`.
pub fn write_frame<W: Write + ?Sized>(w: &mut W, order: ByteOrder, payload: &[u8]) -> Result<()> {
    let prefix = prefix_for(order, payload)?;

    let mut frame = Vec::with_capacity(PREFIX_SIZE + payload.len());
    frame.extend_from_slice(&prefix);
    frame.extend_from_slice(payload);
    w.write_all(&frame)?;
    Ok(())
}

pub fn write_frame_string<W: Write + ?Sized>(w: &mut W, order: ByteOrder, s: &str) -> Result<()> {
    write_frame(w, order, s.as_bytes())
}

/// Frame codec that assembles and parses frames in pooled scratch buffers.
#[derive(Debug, Default)]
pub struct FrameCodec {
    order: ByteOrder,
    scratch: ScratchPool,
}

impl FrameCodec {
    pub fn new(order: ByteOrder) -> Self {
        Self::with_pool(order, ScratchPool::new())
    }

    pub fn with_pool(order: ByteOrder, scratch: ScratchPool) -> Self {
        Self { order, scratch }
    }

    #[inline(always)]
    pub fn order(&self) -> ByteOrder {
        self.order
    }

    pub fn scratch(&self) -> &ScratchPool {
        &self.scratch
    }

    pub fn write<W: Write + ?Sized>(&self, w: &mut W, payload: &[u8]) -> Result<()> {
        let prefix = prefix_for(self.order, payload)?;

        let mut frame = self.scratch.acquire();
        frame.extend_from_slice(&prefix);
        frame.extend_from_slice(payload);
        w.write_all(&frame)?;
        Ok(())
    }

    pub fn write_str<W: Write + ?Sized>(&self, w: &mut W, s: &str) -> Result<()> {
        self.write(w, s.as_bytes())
    }

    /// Read one frame and hand its payload to `f` without allocating.
    pub fn read_with<R, F, T>(&self, r: &mut R, f: F) -> Result<T>
    where
        R: Read + ?Sized,
        F: FnOnce(&[u8]) -> T,
    {
        let len = read_prefix(r, self.order)?;
        let mut body = self.scratch.acquire();
        read_body(r, len, &mut body)?;
        Ok(f(&body))
    }

    pub fn read<R: Read + ?Sized>(&self, r: &mut R) -> Result<Vec<u8>> {
        self.read_with(r, <[u8]>::to_vec)
    }

    pub fn read_string<R: Read + ?Sized>(&self, r: &mut R) -> Result<String> {
        Ok(String::from_utf8(self.read(r)?)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const TEST_MSG: &str = "foo bar foobar";

    #[test]
    fn test_round_trip_both_orders() {
        for order in [ByteOrder::BigEndian, ByteOrder::LittleEndian] {
            let mut channel = Vec::new();
            write_frame_string(&mut channel, order, TEST_MSG).unwrap();
            assert_eq!(channel.len(), PREFIX_SIZE + 14);

            let mut r = Cursor::new(channel);
            assert_eq!(read_frame_string(&mut r, order).unwrap(), TEST_MSG);
        }
    }

    #[test]
    fn test_prefix_byte_order() {
        let mut be = Vec::new();
        write_frame(&mut be, ByteOrder::BigEndian, TEST_MSG.as_bytes()).unwrap();
        assert_eq!(&be[..2], &[0x00, 0x0e]);
        assert_eq!(&be[2..], TEST_MSG.as_bytes());

        let mut le = Vec::new();
        write_frame(&mut le, ByteOrder::LittleEndian, TEST_MSG.as_bytes()).unwrap();
        assert_eq!(&le[..2], &[0x0e, 0x00]);
    }

    #[test]
    fn test_read_consumes_only_declared_length() {
        let mut channel = vec![0x00, 0x03];
        channel.extend_from_slice(b"abcdef");
        let mut r = Cursor::new(channel);

        assert_eq!(read_frame(&mut r, ByteOrder::BigEndian).unwrap(), b"abc");
        assert_eq!(r.position(), 5);
    }

    #[test]
    fn test_truncated_body_rejected() {
        let mut r = Cursor::new(vec![0x00, 0x0a, b'a', b'b']);
        match read_frame(&mut r, ByteOrder::BigEndian) {
            Err(RelayError::Truncated { expected, got }) => {
                assert_eq!((expected, got), (10, 2));
            }
            other => panic!("expected truncation, got {other:?}"),
        }
    }

    #[test]
    fn test_truncated_prefix_and_clean_end() {
        let mut r = Cursor::new(vec![0x00]);
        assert!(matches!(
            read_frame(&mut r, ByteOrder::BigEndian),
            Err(RelayError::Truncated { expected: 2, got: 1 })
        ));

        let mut r = Cursor::new(Vec::new());
        assert!(read_frame(&mut r, ByteOrder::BigEndian).unwrap_err().is_eof());
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let payload = vec![0u8; MAX_PAYLOAD_SIZE + 1];
        let mut channel = Vec::new();

        assert!(matches!(
            write_frame(&mut channel, ByteOrder::BigEndian, &payload),
            Err(RelayError::FrameTooLarge { len }) if len == MAX_PAYLOAD_SIZE + 1
        ));
        assert!(channel.is_empty());

        write_frame(&mut channel, ByteOrder::BigEndian, &payload[1..]).unwrap();
        assert_eq!(channel.len(), PREFIX_SIZE + MAX_PAYLOAD_SIZE);
    }

    #[test]
    fn test_invalid_utf8() {
        let mut channel = Vec::new();
        write_frame(&mut channel, ByteOrder::LittleEndian, &[0xff, 0xfe]).unwrap();
        let mut r = Cursor::new(channel);
        assert!(matches!(
            read_frame_string(&mut r, ByteOrder::LittleEndian),
            Err(RelayError::InvalidUtf8(_))
        ));
    }

    #[test]
    fn test_codec_reuses_scratch() {
        let codec = FrameCodec::new(ByteOrder::LittleEndian);
        let mut channel = Vec::new();

        for msg in ["Message 1", "Message 2", "Message 3"] {
            codec.write_str(&mut channel, msg).unwrap();
        }
        assert_eq!(codec.scratch().idle(), 1);

        let mut r = Cursor::new(channel);
        assert_eq!(codec.read_string(&mut r).unwrap(), "Message 1");
        assert_eq!(codec.read(&mut r).unwrap(), b"Message 2");
        let len = codec.read_with(&mut r, |payload| payload.len()).unwrap();
        assert_eq!(len, 9);
        assert_eq!(codec.scratch().idle(), 1);
        assert!(codec.read(&mut r).unwrap_err().is_eof());
    }
}
