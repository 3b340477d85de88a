//! Wire protocol for Trellis remote (tier 3) datastores.
//!
//! Requests are JSON records: `{key}` reads, `{dataset}` writes and
//! `{del: key}` deletes, optionally carrying `storeName`, `dbName`, `user`
//! and `token`. A response is a record, an array of records, `null`, or a
//! string meaning the remote refused the operation.
//!
//! The realtime variant exchanges the same payloads as newline-delimited
//! JSON over a persistent connection. Requests carry a `callback` sequence
//! number that the remote echoes; frames without one are push
//! notifications.

pub mod codec;
pub mod endpoint;
pub mod error;
pub mod message;
pub mod realtime;

pub use codec::LineCodec;
pub use endpoint::{endpoints, HealthResponse};
pub use error::{ProtocolError, ProtocolResult};
pub use message::{Operation, StoreRequest, StoreResponse, PROTOCOL_VERSION, MAX_MESSAGE_SIZE};
pub use realtime::{Incoming, Notification, RealtimeRequest, ServerFrame};
