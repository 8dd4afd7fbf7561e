//! Error taxonomy for the relay, its buffers and the framing helpers.

use std::io;
use std::string::FromUtf8Error;
use std::sync::Arc;

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum RelayError {
    /// No more bytes will ever arrive. Normalized to success at the relay boundary.
    #[error("end of data")]
    Eof,

    #[error("io error: {0}")]
    Io(Arc<io::Error>),

    #[error("frame payload of {len} bytes exceeds the {} byte limit", u16::MAX)]
    FrameTooLarge { len: usize },

    #[error("truncated frame: expected {expected} bytes, got {got}")]
    Truncated { expected: usize, got: usize },

    #[error("frame payload is not valid utf-8: {0}")]
    InvalidUtf8(#[from] FromUtf8Error),

    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl RelayError {
    #[inline]
    pub fn is_eof(&self) -> bool {
        matches!(self, Self::Eof)
    }
}

impl From<io::Error> for RelayError {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl From<RelayError> for io::Error {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::Eof => io::Error::new(io::ErrorKind::UnexpectedEof, "end of data"),
            RelayError::Io(inner) => io::Error::new(inner.kind(), inner.to_string()),
            RelayError::Truncated { .. } => io::Error::new(io::ErrorKind::UnexpectedEof, err),
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;

/// A relay that stopped on an error after forwarding `written` bytes.
#[derive(Debug, Clone, Error)]
#[error("relay failed after {written} bytes: {error}")]
pub struct RelayFailure {
    pub written: u64,
    #[source]
    pub error: RelayError,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_round_trip_keeps_kind() {
        let err: RelayError = io::Error::new(io::ErrorKind::BrokenPipe, "peer gone").into();
        assert!(!err.is_eof());

        let back: io::Error = err.into();
        assert_eq!(back.kind(), io::ErrorKind::BrokenPipe);
        assert!(back.to_string().contains("peer gone"));
    }

    #[test]
    fn test_eof_maps_to_unexpected_eof() {
        let back: io::Error = RelayError::Eof.into();
        assert_eq!(back.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_failure_display_carries_count() {
        let failure = RelayFailure {
            written: 7,
            error: RelayError::Eof,
        };
        assert_eq!(failure.to_string(), "relay failed after 7 bytes: end of data");
    }
}
