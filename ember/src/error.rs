//! Error types for Ember

use thiserror::Error;

/// Result type alias using Ember's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Ember operations
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed caller input: empty prompt, batch size other than 1,
    /// out-of-range index, unsupported backend, or a decode call with no
    /// token id available.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A named asset, signature, or tensor is not present.
    #[error("not found: {0}")]
    NotFound(String),

    /// Recoverable tokenizer condition: the decoded text ends in the middle
    /// of a byte-pair sequence. Callers accumulate more tokens and retry.
    #[error("data loss: {0}")]
    DataLoss(String),

    /// Subgraph invocation failure, work-group coverage failure, or a
    /// benchmark-ledger ordering violation.
    #[error("internal: {0}")]
    Internal(String),

    /// Optional operation the underlying component does not provide.
    #[error("unimplemented: {0}")]
    Unimplemented(String),

    #[error("dtype mismatch: expected {expected}, got {got}")]
    DtypeMismatch { expected: String, got: String },

    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether this error is the recoverable incomplete-BPE signal.
    #[must_use]
    pub fn is_data_loss(&self) -> bool {
        matches!(self, Self::DataLoss(_))
    }
}
