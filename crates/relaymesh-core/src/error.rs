//! Error types for wire decoding and client id validation.

use thiserror::Error;

/// Failure to encode or decode a wire frame.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("frame of {size} bytes exceeds the {limit} byte limit")]
    TooLarge { size: usize, limit: usize },
}

/// Reasons a client id is rejected at connect time.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClientIdError {
    #[error("missing id")]
    Empty,

    #[error("id is {len} bytes, maximum is {max}")]
    TooLong { len: usize, max: usize },

    #[error("id contains invalid character {0:?}")]
    InvalidCharacter(char),
}
