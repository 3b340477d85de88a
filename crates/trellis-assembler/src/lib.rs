//! Dependency-driven instance assembly for Trellis.
//!
//! An instance is described by a component plus layered configuration.
//! Configuration values may be dependency descriptors, tagged JSON arrays
//! that the [`Assembler`] replaces with what they describe:
//!
//! | Descriptor                          | Resolves to                     |
//! |-------------------------------------|---------------------------------|
//! | `["load", url_or_spec]`             | a loaded [`Resource`]           |
//! | `["component", ref, config?]`       | a [`ComponentHandle`]           |
//! | `["instance", ref, config?]`        | a nested [`Instance`]           |
//! | `["start", ref, config?]`           | a nested, started [`Instance`]  |
//! | `["proxy", ref, config?]`           | a [`LazyInstance`]              |
//! | `["store", settings]`               | a shared [`Datastore`]          |
//! | `["get", settings, key_or_query?]`  | dataset(s) as plain data        |
//! | `["set", settings, dataset]`        | the stored dataset              |
//! | `["del", settings, key]`            | the removed dataset, or null    |
//!
//! Components are named by registered index (`name-1-0-0`), by manifest URL
//! or inline. See [`ComponentRef`].
//!
//! [`Resource`]: trellis_loader::Resource
//! [`Datastore`]: trellis_store::Datastore

pub mod assembler;
pub mod component;
pub mod context;
pub mod error;
pub mod instance;
pub mod registry;
pub mod value;

pub use assembler::Assembler;
pub use component::{Behavior, ComponentDefinition, ComponentIndex, ComponentRef, ComponentSpec, NoBehavior};
pub use context::Context;
pub use error::{AssembleError, AssembleResult};
pub use instance::{ComponentHandle, Instance, LazyInstance};
pub use registry::ComponentRegistry;
pub use value::{config, Config, Dependency, Value};
