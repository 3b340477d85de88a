//! Tiered datastore for Trellis.
//!
//! A [`Datastore`] exposes one get/set/del interface over one of three
//! tiers, selected structurally from its [`StoreSettings`]:
//!
//! 1. **Memory** -- only the in-memory cache (no `storeName`, no `url`)
//! 2. **Local** -- a host-provided [`LocalStore`] (`storeName`)
//! 3. **Remote** -- a remote service over a [`RemoteTransport`], or a
//!    persistent realtime connection with push updates (`url`)
//!
//! Every datastore keeps an in-memory cache. Reads from the cache resolve
//! embedded `["get", settings, key]` data dependencies against other
//! datastores, waiting for stores that are still being opened.
//!
//! # Registry
//!
//! The [`StoreRegistry`] maps a settings [`Signature`] (`url`, `dbName`,
//! `storeName`) to a single shared [`Datastore`]. While a store is being
//! opened its signature is held by a sentinel, and concurrent requests
//! queue on a waitlist instead of opening it twice.
//!
//! # Design Rules
//!
//! 1. Writes and deletes reach the backing tier first; the cache changes
//!    only after the backing tier confirms.
//! 2. Malformed keys are rejected before anything is touched.
//! 3. A string response from a remote is a refusal, never data.
//! 4. Locks are never held across an await.

pub mod config;
pub mod datastore;
pub mod error;
pub mod file;
pub mod local;
pub mod realtime;
pub mod registry;
pub mod remote;
pub mod resolve;
pub mod settings;

pub use config::StoreConfig;
pub use datastore::{Datastore, Fetched};
pub use error::{StoreError, StoreResult};
pub use file::JsonFileStore;
pub use local::{LocalStore, MemoryLocalStore, StoreLocation};
pub use realtime::{RealtimeConnection, RealtimeConnector, TcpConnector};
pub use registry::{Lookup, StoreBackends, StoreRegistry};
pub use remote::{HttpTransport, RemoteTransport};
pub use resolve::DataDependency;
pub use settings::{
    AuthHook, ChangeHook, Credentials, LocalData, Signature, StaticCredentials, StoreSettings, Tier,
};
