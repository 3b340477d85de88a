use serde::{Deserialize, Serialize};
use serde_json::Value;
use trellis_types::{Dataset, DatasetKey, Query, TypeError};

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// The operation a request asks the remote to perform.
///
/// Variants are distinguished by which field is present, so the order
/// matters: `Read` has only optional fields and must come last.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Operation {
    Write {
        dataset: Dataset,
    },
    Delete {
        del: DatasetKey,
    },
    Read {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<Value>,
    },
}

/// A request to a remote datastore.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreRequest {
    #[serde(flatten)]
    pub operation: Operation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl StoreRequest {
    fn with_operation(operation: Operation) -> Self {
        Self {
            operation,
            store_name: None,
            db_name: None,
            user: None,
            token: None,
        }
    }

    pub fn read(query: &Query) -> Self {
        Self::with_operation(Operation::Read {
            key: query.to_json(),
        })
    }

    pub fn write(dataset: Dataset) -> Self {
        Self::with_operation(Operation::Write { dataset })
    }

    pub fn delete(key: DatasetKey) -> Self {
        Self::with_operation(Operation::Delete { del: key })
    }

    pub fn in_store(mut self, store_name: Option<String>, db_name: Option<String>) -> Self {
        self.store_name = store_name;
        self.db_name = db_name;
        self
    }

    pub fn with_credentials(mut self, user: impl Into<String>, token: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.token = Some(token.into());
        self
    }

    /// The query of a read request.
    pub fn query(&self) -> Option<Result<Query, TypeError>> {
        match &self.operation {
            Operation::Read { key } => Some(Query::from_json(key.as_ref())),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self.operation {
            Operation::Read { .. } => "read",
            Operation::Write { .. } => "write",
            Operation::Delete { .. } => "delete",
        }
    }
}

/// A remote datastore's answer.
///
/// A bare string is the remote's error sentinel: the operation was refused
/// and the local cache must not be updated.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoreResponse {
    Empty,
    Error(String),
    Record(Dataset),
    Records(Vec<Dataset>),
}

impl StoreResponse {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Interpret a JSON body as a response.
    pub fn from_json(value: Value) -> crate::ProtocolResult<Self> {
        serde_json::from_value(value.clone())
            .map_err(|_| crate::ProtocolError::UnexpectedResponse(value.to_string()))
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Empty => Value::Null,
            Self::Error(message) => Value::String(message.clone()),
            Self::Record(dataset) => Value::Object(dataset.clone()),
            Self::Records(datasets) => {
                Value::Array(datasets.iter().cloned().map(Value::Object).collect())
            }
        }
    }

    /// Flatten into a list of records. `None` for the error sentinel.
    pub fn into_records(self) -> Option<Vec<Dataset>> {
        match self {
            Self::Empty => Some(Vec::new()),
            Self::Error(_) => None,
            Self::Record(dataset) => Some(vec![dataset]),
            Self::Records(datasets) => Some(datasets),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: Value) -> Dataset {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn read_request_wire_shape() {
        let req = StoreRequest::read(&Query::from("alice"))
            .in_store(Some("users".into()), Some("main".into()));
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({"key": "alice", "storeName": "users", "dbName": "main"})
        );
    }

    #[test]
    fn query_all_omits_key() {
        let req = StoreRequest::read(&Query::All);
        assert_eq!(serde_json::to_value(&req).unwrap(), json!({}));
        let back: StoreRequest = serde_json::from_value(json!({"storeName": "s"})).unwrap();
        assert_eq!(back.query().unwrap().unwrap(), Query::All);
        assert_eq!(back.store_name.as_deref(), Some("s"));
    }

    #[test]
    fn write_and_delete_wire_shape() {
        let write = StoreRequest::write(obj(json!({"key": "k", "v": 1})))
            .with_credentials("ada", "t0k3n");
        assert_eq!(
            serde_json::to_value(&write).unwrap(),
            json!({"dataset": {"key": "k", "v": 1}, "user": "ada", "token": "t0k3n"})
        );
        let del = StoreRequest::delete(DatasetKey::from("k"));
        assert_eq!(serde_json::to_value(&del).unwrap(), json!({"del": "k"}));
    }

    #[test]
    fn requests_parse_back() {
        let write: StoreRequest =
            serde_json::from_value(json!({"dataset": {"key": 1}, "storeName": "s"})).unwrap();
        assert_eq!(write.kind(), "write");
        assert_eq!(write.store_name.as_deref(), Some("s"));

        let del: StoreRequest = serde_json::from_value(json!({"del": ["a", 2]})).unwrap();
        assert_eq!(del.kind(), "delete");

        let read: StoreRequest = serde_json::from_value(json!({"key": {"a": 1}})).unwrap();
        assert!(matches!(read.query(), Some(Ok(Query::Match(_)))));
        assert!(del.query().is_none());
    }

    #[test]
    fn response_forms() {
        assert_eq!(StoreResponse::from_json(json!(null)).unwrap(), StoreResponse::Empty);
        assert_eq!(
            StoreResponse::from_json(json!("denied")).unwrap(),
            StoreResponse::Error("denied".into())
        );
        assert!(matches!(
            StoreResponse::from_json(json!({"key": "a"})).unwrap(),
            StoreResponse::Record(_)
        ));
        assert!(matches!(
            StoreResponse::from_json(json!([{"key": "a"}, {"key": "b"}])).unwrap(),
            StoreResponse::Records(ref r) if r.len() == 2
        ));
        assert!(StoreResponse::from_json(json!(42)).is_err());
    }

    #[test]
    fn response_to_json_round_trips_shape() {
        let records = StoreResponse::Records(vec![obj(json!({"key": "a"}))]);
        assert_eq!(records.to_json(), json!([{"key": "a"}]));
        assert_eq!(StoreResponse::Empty.to_json(), json!(null));
        assert!(StoreResponse::Error("x".into()).is_error());
    }

    #[test]
    fn into_records() {
        assert_eq!(StoreResponse::Empty.into_records(), Some(vec![]));
        assert_eq!(StoreResponse::Error("no".into()).into_records(), None);
        assert_eq!(
            StoreResponse::Record(obj(json!({"key": 1}))).into_records().unwrap().len(),
            1
        );
    }
}
