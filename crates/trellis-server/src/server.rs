use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info};

use crate::auth::{AllowAllAuth, AuthProvider, TokenAuth};
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::hub::StoreHub;
use crate::realtime::serve_realtime;
use crate::router::build_router;

/// Reference remote datastore server.
pub struct TrellisServer {
    config: ServerConfig,
    hub: Arc<StoreHub>,
}

impl TrellisServer {
    /// Create a server with an empty hub and the auth provider `config` asks for.
    pub fn new(config: ServerConfig) -> Self {
        let auth: Arc<dyn AuthProvider> = if config.users.is_empty() {
            Arc::new(AllowAllAuth)
        } else {
            Arc::new(TokenAuth::new(config.users.clone(), config.allow_anonymous_read))
        };
        let hub = Arc::new(StoreHub::new(auth, config.push_buffer));
        Self { config, hub }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Hub holding every hosted store.
    pub fn hub(&self) -> &Arc<StoreHub> {
        &self.hub
    }

    /// Build the router (useful for testing).
    pub fn router(&self) -> axum::Router {
        build_router(Arc::clone(&self.hub))
    }

    /// Bind the configured addresses and serve until an error occurs.
    pub async fn serve(self) -> ServerResult<()> {
        let http = TcpListener::bind(&self.config.bind_addr).await?;
        let realtime = match self.config.realtime_addr {
            Some(addr) => Some(TcpListener::bind(addr).await?),
            None => None,
        };
        self.serve_on(http, realtime).await
    }

    /// Serve on already bound listeners.
    pub async fn serve_on(self, http: TcpListener, realtime: Option<TcpListener>) -> ServerResult<()> {
        if let Some(listener) = realtime {
            let hub = Arc::clone(&self.hub);
            tokio::spawn(async move {
                if let Err(e) = serve_realtime(listener, hub).await {
                    error!(error = %e, "realtime listener stopped");
                }
            });
        }
        info!(addr = ?http.local_addr().ok(), "trellis server listening");
        axum::serve(http, self.router())
            .await
            .map_err(|e| ServerError::Internal(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn server_construction() {
        let server = TrellisServer::new(ServerConfig::default());
        assert_eq!(server.config().bind_addr, "127.0.0.1:8420".parse().unwrap());
    }

    #[tokio::test]
    async fn token_auth_when_users_configured() {
        use trellis_protocol::StoreRequest;
        use trellis_types::Query;

        let config = ServerConfig {
            users: HashMap::from([("ada".to_string(), "t".to_string())]),
            allow_anonymous_read: false,
            ..ServerConfig::default()
        };
        let server = TrellisServer::new(config);
        let anonymous = StoreRequest::read(&Query::All).in_store(Some("s".into()), None);
        assert!(server.hub().handle(anonymous.clone()).await.is_error());
        let ada = anonymous.with_credentials("ada", "t");
        assert!(!server.hub().handle(ada).await.is_error());
    }
}
