//! High-level SDK for Trellis.
//!
//! [`Trellis`] wires a resource loader, component registry and datastore
//! registry from a [`TrellisConfig`] and is the main entry point for
//! applications embedding Trellis.

pub mod config;
pub mod error;
pub mod trellis;

pub use config::{ComponentConfig, TrellisConfig};
pub use error::{SdkError, SdkResult};
pub use trellis::Trellis;

// Re-export key types
pub use trellis_assembler::{
    config as parse_config, AssembleError, Assembler, Behavior, ComponentHandle, ComponentRef, ComponentSpec, Config,
    Instance, LazyInstance, Value,
};
pub use trellis_loader::{LoadSpec, Resource, StaticFetcher};
pub use trellis_store::{Datastore, StoreError, StoreSettings, Tier};
pub use trellis_types::{Dataset, DatasetKey, Query, ReplayOrder};
