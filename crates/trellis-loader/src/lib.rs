//! Resource loading for Trellis.
//!
//! The [`ResourceLoader`] fetches a named resource (by URL) at most once per
//! process lifetime of its cache. Concurrent requests for the same URL are
//! coalesced: the first caller performs the fetch, later callers are queued
//! on a waitlist and replayed with the identical result once it arrives.
//!
//! Fetching itself is delegated to a [`Fetcher`]:
//!
//! - [`HttpFetcher`] -- `reqwest`-based HTTP(S) fetching
//! - [`StaticFetcher`] -- in-memory resources for embedding and tests

pub mod config;
pub mod error;
pub mod fetcher;
pub mod loader;
pub mod spec;

pub use config::LoaderConfig;
pub use error::{LoadError, LoadResult};
pub use fetcher::{Fetcher, HttpFetcher, StaticFetcher};
pub use loader::{Resource, ResourceLoader};
pub use spec::LoadSpec;
