use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;
use trellis_protocol::{endpoints, ProtocolError, ProtocolResult, StoreRequest, StoreResponse};

/// One-shot request/response channel to a remote datastore service.
///
/// A returned [`StoreResponse::Error`] is the remote refusing the operation;
/// `Err` means the exchange itself failed.
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    async fn send(&self, url: &str, request: &StoreRequest) -> ProtocolResult<StoreResponse>;
}

/// HTTP transport: `POST <url>/v1/store` with a JSON body.
///
/// A body that is not JSON is taken as the remote's error text.
#[derive(Clone, Debug, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
    timeout: Option<Duration>,
}

impl HttpTransport {
    /// Create a transport with its own client and an optional request timeout.
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }

    pub fn with_client(client: reqwest::Client, timeout: Option<Duration>) -> Self {
        Self { client, timeout }
    }

    /// The store endpoint under a server base URL.
    pub fn endpoint(url: &str) -> String {
        let base = url.trim_end_matches('/');
        if base.ends_with(endpoints::STORE) {
            base.to_string()
        } else {
            format!("{base}{}", endpoints::STORE)
        }
    }
}

#[async_trait]
impl RemoteTransport for HttpTransport {
    async fn send(&self, url: &str, request: &StoreRequest) -> ProtocolResult<StoreResponse> {
        let endpoint = Self::endpoint(url);
        let mut builder = self.client.post(&endpoint).json(request);
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| ProtocolError::Transport(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ProtocolError::Transport(e.to_string()))?;
        debug!(url = %endpoint, kind = request.kind(), %status, bytes = body.len(), "remote exchange");

        if body.trim().is_empty() {
            return Ok(StoreResponse::Empty);
        }
        match serde_json::from_str::<Value>(&body) {
            Ok(value) => StoreResponse::from_json(value),
            Err(_) => Ok(StoreResponse::Error(body)),
        }
    }
}
