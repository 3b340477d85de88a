use thiserror::Error;
use trellis_loader::LoadError;
use trellis_protocol::ProtocolError;

/// Errors from datastore operations.
///
/// Cloneable so the outcome of opening a store can be replayed to every
/// request queued behind it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The dataset key does not have a valid format. Nothing was changed.
    #[error("invalid dataset key: {0}")]
    InvalidKey(String),

    /// The remote answered with its error sentinel. The cache was not updated.
    #[error("remote refused {operation}: {message}")]
    Remote {
        operation: &'static str,
        message: String,
    },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("local store error: {0}")]
    Local(String),

    #[error("load error: {0}")]
    Load(#[from] LoadError),

    #[error("not a dataset: {0}")]
    NotADataset(String),

    #[error("invalid store settings: {0}")]
    InvalidSettings(String),

    /// The store was dropped or the registry reset while a request waited.
    #[error("datastore {0} is unavailable")]
    Unavailable(String),
}

impl From<ProtocolError> for StoreError {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e.to_string())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Local(e.to_string())
    }
}

impl From<trellis_types::TypeError> for StoreError {
    fn from(e: trellis_types::TypeError) -> Self {
        match e {
            trellis_types::TypeError::InvalidKey(key) => Self::InvalidKey(key),
            other => Self::NotADataset(other.to_string()),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
