//! Error types for fedglm.

use thiserror::Error;

/// Result type alias for fedglm operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during federated GLM fitting.
#[derive(Error, Debug)]
pub enum Error {
    // Model specification errors
    #[error("invalid model specification: {0}")]
    Configuration(String),

    #[error("column not found in dataset: {0}")]
    ColumnNotFound(String),

    // Round-protocol errors
    #[error("exog_names mismatch across sites: expected {expected:?}, got {got:?}")]
    SchemaMismatch {
        expected: Vec<String>,
        got: Vec<String>,
    },

    #[error("bad contribution: {0}")]
    BadContribution(String),

    #[error("task aborted by cancellation signal")]
    TaskAborted,

    // Numerical errors
    #[error("numerical failure: {0}")]
    Numerical(String),

    // Serialization errors
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
