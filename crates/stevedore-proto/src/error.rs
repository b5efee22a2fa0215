//! Protocol error types.

use thiserror::Error;

/// Errors produced while encoding or decoding agent traffic.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid record length prefix: {0}")]
    InvalidLengthPrefix(String),

    #[error("record of {got} bytes exceeds the {max} byte frame limit")]
    RecordTooLarge { got: usize, max: usize },

    #[error("malformed event payload: {0}")]
    MalformedEvent(#[from] serde_json::Error),
}

/// Result type alias using the protocol [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
