use thiserror::Error;
use trellis_loader::LoadError;
use trellis_store::StoreError;

/// Errors from assembling an instance graph.
///
/// Cloneable so the outcome of loading a component manifest can be handed
/// to every resolution waiting on it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AssembleError {
    /// A resource dependency failed to load. `path` names the slot.
    #[error("loading {path}: {source}")]
    Load {
        path: String,
        #[source]
        source: LoadError,
    },

    /// A datastore dependency failed. `path` names the slot.
    #[error("datastore dependency {path}: {source}")]
    Store {
        path: String,
        #[source]
        source: StoreError,
    },

    #[error("unknown component: {0}")]
    UnknownComponent(String),

    #[error("invalid component manifest {url}: {reason}")]
    InvalidManifest { url: String, reason: String },

    /// A manifest names a behavior that was never defined.
    #[error("no behavior named {0:?}")]
    MissingBehavior(String),

    /// A lifecycle hook failed.
    #[error("{phase} hook of {instance} failed: {reason}")]
    Hook {
        instance: String,
        phase: &'static str,
        reason: String,
    },

    /// The component manifest load was abandoned before it completed.
    #[error("component {0} is unavailable")]
    Unavailable(String),
}

pub type AssembleResult<T> = Result<T, AssembleError>;
