use std::time::Duration;

use serde::{Deserialize, Serialize};
use trellis_types::ReplayOrder;

/// Configuration for the [`ResourceLoader`](crate::ResourceLoader).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Replay order of requests coalesced behind an in-flight load.
    pub replay_order: ReplayOrder,
    /// Give up on a fetch after this many milliseconds. `None` waits forever.
    pub stall_timeout_ms: Option<u64>,
    /// Prefix for relative resource URLs.
    pub base_url: Option<String>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            replay_order: ReplayOrder::Lifo,
            stall_timeout_ms: Some(30_000),
            base_url: None,
        }
    }
}

impl LoaderConfig {
    pub fn stall_timeout(&self) -> Option<Duration> {
        self.stall_timeout_ms.map(Duration::from_millis)
    }

    /// Resolve `url` against [`base_url`](Self::base_url) unless it is
    /// already absolute.
    pub fn resolve_url(&self, url: &str) -> String {
        match &self.base_url {
            Some(base) if !url.contains("://") => {
                format!("{}/{}", base.trim_end_matches('/'), url.trim_start_matches('/'))
            }
            _ => url.to_string(),
        }
    }
}
