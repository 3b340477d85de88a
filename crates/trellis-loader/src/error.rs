use thiserror::Error;

/// Errors from resource loading.
///
/// Cloneable so that a single failed fetch can be replayed to every waiter
/// that was coalesced behind it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("transport error loading {url}: {reason}")]
    Transport { url: String, reason: String },

    #[error("failed to decode {url}: {reason}")]
    Decode { url: String, reason: String },

    /// The fetch did not complete within the configured stall timeout.
    #[error("load of {url} stalled after {timeout_ms}ms")]
    Stalled { url: String, timeout_ms: u64 },

    /// The in-flight load this request was waiting on went away (reset or
    /// cancelled) without producing a result.
    #[error("load of {0} was abandoned")]
    Abandoned(String),

    #[error("invalid load spec: {0}")]
    InvalidSpec(String),
}

pub type LoadResult<T> = Result<T, LoadError>;
