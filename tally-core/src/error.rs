//! Error types for tally-core

use thiserror::Error;

/// Main error type for the tally-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Transport failure or non-200 response from a remote endpoint
    #[error("connect error: {0}")]
    Connect(String),

    /// Malformed event or payload that cannot be encoded/decoded
    #[error("data error: {0}")]
    Data(String),

    /// Queue store row ceiling reached
    #[error("queue store is full ({limit} rows)")]
    StoreFull { limit: usize },

    /// Unexpected shape from the configure endpoint
    #[error("unexpected configure response: {0}")]
    ConfigParse(String),

    /// Unrecoverable fault while processing a command
    #[error("worker fault: {0}")]
    Fatal(String),

    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this error ends the worker regardless of error policy.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Fatal(_))
    }
}

/// Result type alias for tally-core
pub type Result<T> = std::result::Result<T, Error>;
