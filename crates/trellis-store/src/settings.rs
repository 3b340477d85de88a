use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use trellis_protocol::Notification;

use crate::error::{StoreError, StoreResult};
use crate::local::StoreLocation;

/// Credentials attached to remote requests.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub token: String,
}

/// Supplies credentials for remote requests, e.g. after a login flow.
#[async_trait]
pub trait AuthHook: Send + Sync {
    async fn credentials(&self) -> StoreResult<Option<Credentials>>;
}

/// An [`AuthHook`] that always answers with the same credentials.
#[derive(Clone, Debug)]
pub struct StaticCredentials(pub Credentials);

#[async_trait]
impl AuthHook for StaticCredentials {
    async fn credentials(&self) -> StoreResult<Option<Credentials>> {
        Ok(Some(self.0.clone()))
    }
}

/// Called for every push notification a realtime store applies.
pub type ChangeHook = Arc<dyn Fn(&Notification) + Send + Sync>;

/// Seed data for a store's cache: inline datasets, or a URL to load them
/// from. Either form is an array of datasets or an object mapping keys to
/// datasets.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LocalData {
    Url(String),
    Inline(Value),
}

/// Data-access level of a datastore.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Tier {
    Memory = 1,
    Local = 2,
    Remote = 3,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => write!(f, "memory"),
            Self::Local => write!(f, "local"),
            Self::Remote => write!(f, "remote"),
        }
    }
}

/// Registry identity of a datastore: canonical JSON of its `url`, `dbName`
/// and `storeName`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Signature(String);

impl Signature {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Settings describing a datastore.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local: Option<LocalData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_name: Option<String>,
    #[serde(default)]
    pub realtime: bool,
    #[serde(skip)]
    pub auth: Option<Arc<dyn AuthHook>>,
    #[serde(skip)]
    pub on_change: Option<ChangeHook>,
}

/// Field order of the signature is fixed here, not by the settings.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SignatureFields<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    db_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    store_name: Option<&'a str>,
}

impl StoreSettings {
    /// Settings for an in-memory store seeded with `data`.
    pub fn memory(data: Value) -> Self {
        Self {
            local: Some(LocalData::Inline(data)),
            ..Self::default()
        }
    }

    /// Settings for a named store in the local tier.
    pub fn local(store_name: impl Into<String>) -> Self {
        Self {
            store_name: Some(store_name.into()),
            ..Self::default()
        }
    }

    /// Settings for a named store on a remote service.
    pub fn remote(url: impl Into<String>, store_name: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            store_name: Some(store_name.into()),
            ..Self::default()
        }
    }

    pub fn in_db(mut self, db_name: impl Into<String>) -> Self {
        self.db_name = Some(db_name.into());
        self
    }

    pub fn realtime(mut self) -> Self {
        self.realtime = true;
        self
    }

    pub fn seeded(mut self, local: LocalData) -> Self {
        self.local = Some(local);
        self
    }

    pub fn with_auth(mut self, auth: Arc<dyn AuthHook>) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn on_change(mut self, hook: ChangeHook) -> Self {
        self.on_change = Some(hook);
        self
    }

    /// Parse settings from JSON. A bare string is shorthand for an
    /// in-memory store seeded from that URL.
    pub fn from_json(value: &Value) -> StoreResult<Self> {
        match value {
            Value::String(url) => Ok(Self {
                local: Some(LocalData::Url(url.clone())),
                ..Self::default()
            }),
            Value::Object(_) => serde_json::from_value(value.clone())
                .map_err(|e| StoreError::InvalidSettings(e.to_string())),
            other => Err(StoreError::InvalidSettings(other.to_string())),
        }
    }

    /// Tier derived from which fields are present.
    pub fn tier(&self) -> Tier {
        if self.url.is_some() {
            Tier::Remote
        } else if self.store_name.is_some() {
            Tier::Local
        } else {
            Tier::Memory
        }
    }

    pub fn signature(&self) -> Signature {
        let fields = SignatureFields {
            url: self.url.as_deref(),
            db_name: self.db_name.as_deref(),
            store_name: self.store_name.as_deref(),
        };
        // Serializing a struct of optional strings cannot fail.
        Signature(serde_json::to_string(&fields).unwrap_or_default())
    }

    pub(crate) fn location(&self) -> Option<StoreLocation> {
        self.store_name
            .as_ref()
            .map(|name| StoreLocation::new(self.db_name.clone(), name.clone()))
    }
}

impl fmt::Debug for StoreSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreSettings")
            .field("local", &self.local)
            .field("store_name", &self.store_name)
            .field("url", &self.url)
            .field("db_name", &self.db_name)
            .field("realtime", &self.realtime)
            .field("auth", &self.auth.is_some())
            .field("on_change", &self.on_change.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tier_selection_priority() {
        assert_eq!(StoreSettings::default().tier(), Tier::Memory);
        assert_eq!(StoreSettings::local("users").tier(), Tier::Local);
        assert_eq!(StoreSettings::remote("http://h", "users").tier(), Tier::Remote);
        let url_only = StoreSettings {
            url: Some("http://h".into()),
            ..StoreSettings::default()
        };
        assert_eq!(url_only.tier(), Tier::Remote);
    }

    #[test]
    fn signature_ignores_other_fields() {
        let a = StoreSettings::remote("http://h", "users").in_db("main");
        let b = StoreSettings::remote("http://h", "users")
            .in_db("main")
            .realtime()
            .seeded(LocalData::Inline(json!([])));
        assert_eq!(a.signature(), b.signature());
        assert_eq!(
            a.signature().as_str(),
            r#"{"url":"http://h","dbName":"main","storeName":"users"}"#
        );
    }

    #[test]
    fn signature_distinguishes_identity_fields() {
        let a = StoreSettings::local("users");
        let b = StoreSettings::local("users").in_db("other");
        let c = StoreSettings::local("posts");
        assert_ne!(a.signature(), b.signature());
        assert_ne!(a.signature(), c.signature());
        assert_eq!(a.signature().as_str(), r#"{"storeName":"users"}"#);
    }

    #[test]
    fn memory_tier_signature_is_empty() {
        let seeded = StoreSettings::memory(json!([{"key": "a"}]));
        assert_eq!(seeded.tier(), Tier::Memory);
        assert_eq!(seeded.signature().as_str(), "{}");
        assert_eq!(seeded.signature(), StoreSettings::default().signature());
    }

    #[test]
    fn from_json_object_and_string() {
        let s = StoreSettings::from_json(&json!({
            "storeName": "chat", "url": "ws://h", "dbName": "d", "realtime": true,
            "local": {"a": {"v": 1}}
        }))
        .unwrap();
        assert_eq!(s.store_name.as_deref(), Some("chat"));
        assert!(s.realtime);
        assert!(matches!(s.local, Some(LocalData::Inline(_))));

        let url = StoreSettings::from_json(&json!("seed.json")).unwrap();
        assert_eq!(url.local, Some(LocalData::Url("seed.json".into())));
        assert_eq!(url.tier(), Tier::Memory);

        assert!(StoreSettings::from_json(&json!(3)).is_err());
    }

    #[test]
    fn debug_hides_hooks() {
        let s = StoreSettings::local("x").on_change(Arc::new(|_| {}));
        let debug = format!("{s:?}");
        assert!(debug.contains("on_change: true"));
    }
}
