use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use trellis_types::ReplayOrder;

/// Configuration for the datastore layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Replay order of requests queued behind a store that is being opened.
    pub replay_order: ReplayOrder,
    /// Directory for the file-backed local tier. `None` keeps the local
    /// tier in memory.
    pub data_dir: Option<PathBuf>,
    /// Timeout for one-shot remote requests. `None` waits forever.
    pub request_timeout_ms: Option<u64>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            replay_order: ReplayOrder::Lifo,
            data_dir: None,
            request_timeout_ms: Some(10_000),
        }
    }
}

impl StoreConfig {
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = StoreConfig::default();
        assert_eq!(c.replay_order, ReplayOrder::Lifo);
        assert!(c.data_dir.is_none());
        assert_eq!(c.request_timeout(), Some(Duration::from_secs(10)));
    }
}
