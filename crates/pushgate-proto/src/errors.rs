//! Protocol error types.

use thiserror::Error;

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while encoding or decoding wire data.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Encoded document exceeds [`crate::MAX_DOCUMENT_SIZE`].
    #[error("document too large: {size} bytes (max {max})")]
    DocumentTooLarge {
        /// Actual size in bytes
        size: usize,
        /// Maximum accepted size
        max: usize,
    },

    /// CBOR serialization failed.
    #[error("CBOR encode error: {0}")]
    CborEncode(String),

    /// CBOR deserialization failed.
    #[error("CBOR decode error: {0}")]
    CborDecode(String),

    /// A CSV notification payload line could not be parsed.
    #[error("invalid CSV payload at line {line}: {reason}")]
    InvalidCsv {
        /// 1-based line number
        line: usize,
        /// What was wrong with it
        reason: String,
    },
}
