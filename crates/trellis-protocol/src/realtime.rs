use serde::{Deserialize, Serialize};
use serde_json::Value;
use trellis_types::{dataset_key, Dataset, DatasetKey};

use crate::error::{ProtocolError, ProtocolResult};
use crate::message::{StoreRequest, StoreResponse};

/// Client-to-server frame: a store request tagged with the sequence number
/// the server must echo back.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RealtimeRequest {
    pub callback: usize,
    #[serde(flatten)]
    pub request: StoreRequest,
}

/// Server-to-client frame.
///
/// With a `callback` it answers the request of that sequence number and
/// `data` holds the response. Without one it is a push notification: `data`
/// holds a changed dataset, or `del` names a deleted key.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback: Option<usize>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub del: Option<DatasetKey>,
}

/// An unsolicited change announced by the remote.
#[derive(Clone, Debug, PartialEq)]
pub enum Notification {
    Changed(Dataset),
    Deleted(DatasetKey),
}

impl Notification {
    pub fn key(&self) -> Option<DatasetKey> {
        match self {
            Self::Changed(dataset) => dataset_key(dataset),
            Self::Deleted(key) => Some(key.clone()),
        }
    }
}

/// A classified server frame.
#[derive(Clone, Debug, PartialEq)]
pub enum Incoming {
    Response { seq: usize, response: StoreResponse },
    Push(Notification),
}

impl ServerFrame {
    pub fn response(seq: usize, response: &StoreResponse) -> Self {
        Self {
            callback: Some(seq),
            data: response.to_json(),
            del: None,
        }
    }

    pub fn changed(dataset: Dataset) -> Self {
        Self {
            callback: None,
            data: Value::Object(dataset),
            del: None,
        }
    }

    pub fn deleted(key: DatasetKey) -> Self {
        Self {
            callback: None,
            data: Value::Null,
            del: Some(key),
        }
    }

    pub fn classify(self) -> ProtocolResult<Incoming> {
        if let Some(seq) = self.callback {
            let response = StoreResponse::from_json(self.data)?;
            return Ok(Incoming::Response { seq, response });
        }
        if let Some(key) = self.del {
            return Ok(Incoming::Push(Notification::Deleted(key)));
        }
        match self.data {
            Value::Object(dataset) => Ok(Incoming::Push(Notification::Changed(dataset))),
            other => Err(ProtocolError::UnexpectedResponse(format!(
                "push notification without dataset: {other}"
            ))),
        }
    }
}

impl From<Notification> for ServerFrame {
    fn from(notification: Notification) -> Self {
        match notification {
            Notification::Changed(dataset) => Self::changed(dataset),
            Notification::Deleted(key) => Self::deleted(key),
        }
    }
}
