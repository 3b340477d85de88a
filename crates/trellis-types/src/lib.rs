//! Foundation types for Trellis.
//!
//! This crate provides the small, dependency-free vocabulary shared by the
//! loader, the tiered datastore, and the instance assembler.
//!
//! # Key Types
//!
//! - [`Dataset`] -- a JSON record carrying a `key` field
//! - [`DatasetKey`] -- string, numeric, or composite dataset key
//! - [`Query`] -- key lookup or structural-subset filter
//! - [`Waitlist`] -- deferred continuations replayed in a [`ReplayOrder`]
//!
//! # Helpers
//!
//! - [`generate_key`] -- time-sortable, practically unique keys
//! - [`is_subset`] -- structural subset test used by query mode
//! - [`integrate`] -- top-level / dot-path overwrite merge

pub mod dataset;
pub mod error;
pub mod key;
pub mod query;
pub mod waitlist;

pub use dataset::{dataset_key, deep_get, deep_set, integrate, Dataset};
pub use error::TypeError;
pub use key::{generate_key, is_valid_key_text, DatasetKey};
pub use query::{is_subset, Query};
pub use waitlist::{ReplayOrder, Waitlist};
