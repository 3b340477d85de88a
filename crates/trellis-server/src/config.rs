use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ServerError, ServerResult};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address of the HTTP endpoint.
    pub bind_addr: SocketAddr,
    /// Address of the realtime line protocol. `None` disables it.
    pub realtime_addr: Option<SocketAddr>,
    /// Accepted `user = "token"` pairs. Empty disables authentication.
    pub users: HashMap<String, String>,
    /// Allow reads without credentials when authentication is enabled.
    pub allow_anonymous_read: bool,
    /// Capacity of the push notification channel per realtime connection.
    pub push_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8420)),
            realtime_addr: Some(SocketAddr::from(([127, 0, 0, 1], 8421))),
            users: HashMap::new(),
            allow_anonymous_read: true,
            push_buffer: 256,
        }
    }
}

impl ServerConfig {
    pub fn from_file(path: impl AsRef<Path>) -> ServerResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| ServerError::Config(format!("{}: {e}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = ServerConfig::default();
        assert_eq!(c.bind_addr, "127.0.0.1:8420".parse::<SocketAddr>().unwrap());
        assert_eq!(c.realtime_addr, Some("127.0.0.1:8421".parse().unwrap()));
        assert!(c.users.is_empty());
        assert!(c.allow_anonymous_read);
    }

    #[test]
    fn parses_toml() {
        let c: ServerConfig = toml::from_str(
            r#"
            bind_addr = "0.0.0.0:9000"
            allow_anonymous_read = false

            [users]
            ada = "t0k3n"
            "#,
        )
        .unwrap();
        assert_eq!(c.bind_addr.port(), 9000);
        assert_eq!(c.users.get("ada").map(String::as_str), Some("t0k3n"));
        assert!(!c.allow_anonymous_read);
        assert_eq!(c.push_buffer, 256);
    }
}
