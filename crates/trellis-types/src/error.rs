use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid dataset key: {0}")]
    InvalidKey(String),

    #[error("expected a JSON object, found {0}")]
    NotAnObject(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),
}
