#![forbid(unsafe_code)]

use std::io;

use thiserror::Error;

////////////////////////////////////////////////////////////////////////////////

pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    MalformedHeader,
    UnsupportedFeature,
    TruncatedInput,
    ChecksumMismatch,
    InvalidBackReference,
    CapacityExceeded,
    LengthMismatch,
    InvalidCode,
    SizeMismatch,
    Io,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed header: {0}")]
    MalformedHeader(String),

    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),

    #[error("truncated input: needed {needed} bits, {available} available")]
    TruncatedInput { needed: usize, available: usize },

    #[error("truncated input: unexpected end of data")]
    UnexpectedEof,

    #[error("bit sequence of {0} bits is longer than 16")]
    SequenceTooLong(u8),

    #[error("{algorithm} mismatch: expected {expected:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        algorithm: &'static str,
        expected: u32,
        computed: u32,
    },

    #[error("back-reference distance {distance} exceeds {available} bytes of output")]
    InvalidBackReference { distance: usize, available: usize },

    #[error("bitstream capacity exceeded: {requested} bits requested, {available} free")]
    CapacityExceeded { requested: usize, available: usize },

    #[error("stored block length check failed: LEN={len:#06x}, NLEN={nlen:#06x}")]
    LengthMismatch { len: u16, nlen: u16 },

    #[error("invalid code: {0}")]
    InvalidCode(String),

    #[error("size mismatch: footer says {expected} bytes, decoded {actual}")]
    SizeMismatch { expected: u32, actual: u32 },

    #[error("I/O error: {0}")]
    Io(io::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MalformedHeader(_) => ErrorKind::MalformedHeader,
            Self::UnsupportedFeature(_) => ErrorKind::UnsupportedFeature,
            Self::TruncatedInput { .. } | Self::UnexpectedEof => ErrorKind::TruncatedInput,
            Self::ChecksumMismatch { .. } => ErrorKind::ChecksumMismatch,
            Self::InvalidBackReference { .. } => ErrorKind::InvalidBackReference,
            Self::CapacityExceeded { .. } | Self::SequenceTooLong(_) => {
                ErrorKind::CapacityExceeded
            }
            Self::LengthMismatch { .. } => ErrorKind::LengthMismatch,
            Self::InvalidCode(_) => ErrorKind::InvalidCode,
            Self::SizeMismatch { .. } => ErrorKind::SizeMismatch,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedHeader(message.into())
    }

    pub(crate) fn unsupported(message: impl Into<String>) -> Self {
        Self::UnsupportedFeature(message.into())
    }

    pub(crate) fn invalid_code(message: impl Into<String>) -> Self {
        Self::InvalidCode(message.into())
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        match err.downcast::<Error>() {
            Ok(inner) => inner,
            // byteorder and read_exact report a short slice this way.
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => Self::UnexpectedEof,
            Err(err) => Self::Io(err),
        }
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(err) => err,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_eof_is_truncation() {
        let err: Error = io::Error::from(io::ErrorKind::UnexpectedEof).into();
        assert!(matches!(err, Error::UnexpectedEof));
        assert_eq!(err.kind(), ErrorKind::TruncatedInput);

        let err: Error = io::Error::from(io::ErrorKind::PermissionDenied).into();
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn survives_io_round_trip() {
        let err = Error::InvalidBackReference {
            distance: 10,
            available: 2,
        };
        let err: Error = io::Error::from(err).into();
        assert_eq!(err.kind(), ErrorKind::InvalidBackReference);
    }

    #[test]
    fn display() {
        let err = Error::ChecksumMismatch {
            algorithm: "CRC-32",
            expected: 0xcbf43926,
            computed: 0,
        };
        assert_eq!(
            err.to_string(),
            "CRC-32 mismatch: expected 0xcbf43926, computed 0x00000000"
        );

        let err = Error::TruncatedInput {
            needed: 32,
            available: 8,
        };
        assert_eq!(err.to_string(), "truncated input: needed 32 bits, 8 available");
    }
}
