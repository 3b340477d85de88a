use std::collections::HashMap;

use async_trait::async_trait;
use trellis_protocol::StoreRequest;

use crate::error::{ServerError, ServerResult};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    pub anonymous: bool,
}

impl Identity {
    pub fn anonymous() -> Self {
        Self {
            name: "anonymous".into(),
            anonymous: true,
        }
    }

    pub fn user(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            anonymous: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Credentials {
    Token { user: String, token: String },
    Anonymous,
}

impl Credentials {
    /// The `user`/`token` pair a request carries, if both are present.
    pub fn of(request: &StoreRequest) -> Self {
        match (&request.user, &request.token) {
            (Some(user), Some(token)) => Self::Token {
                user: user.clone(),
                token: token.clone(),
            },
            _ => Self::Anonymous,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    Read { store: String },
    Write { store: String },
    Delete { store: String },
}

impl Action {
    pub fn of(request: &StoreRequest) -> Self {
        let store = request.store_name.clone().unwrap_or_default();
        match request.kind() {
            "write" => Self::Write { store },
            "delete" => Self::Delete { store },
            _ => Self::Read { store },
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read { store } => write!(f, "read:{store}"),
            Self::Write { store } => write!(f, "write:{store}"),
            Self::Delete { store } => write!(f, "delete:{store}"),
        }
    }
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn authenticate(&self, credentials: &Credentials) -> ServerResult<Identity>;
    async fn authorize(&self, identity: &Identity, action: &Action) -> ServerResult<bool>;
}

pub struct AllowAllAuth;

#[async_trait]
impl AuthProvider for AllowAllAuth {
    async fn authenticate(&self, credentials: &Credentials) -> ServerResult<Identity> {
        match credentials {
            Credentials::Token { user, .. } => Ok(Identity::user(user.clone())),
            Credentials::Anonymous => Ok(Identity::anonymous()),
        }
    }

    async fn authorize(&self, _identity: &Identity, _action: &Action) -> ServerResult<bool> {
        Ok(true)
    }
}

/// Fixed `user -> token` table. Anonymous callers may only read, and only
/// when `anonymous_read` is set.
pub struct TokenAuth {
    users: HashMap<String, String>,
    anonymous_read: bool,
}

impl TokenAuth {
    pub fn new(users: HashMap<String, String>, anonymous_read: bool) -> Self {
        Self { users, anonymous_read }
    }
}

#[async_trait]
impl AuthProvider for TokenAuth {
    async fn authenticate(&self, credentials: &Credentials) -> ServerResult<Identity> {
        match credentials {
            Credentials::Token { user, token } if self.users.get(user) == Some(token) => Ok(Identity::user(user.clone())),
            Credentials::Token { user, .. } => Err(ServerError::AuthFailed(user.clone())),
            Credentials::Anonymous => Ok(Identity::anonymous()),
        }
    }

    async fn authorize(&self, identity: &Identity, action: &Action) -> ServerResult<bool> {
        Ok(!identity.anonymous || (self.anonymous_read && matches!(action, Action::Read { .. })))
    }
}
