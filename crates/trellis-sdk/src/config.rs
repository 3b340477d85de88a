use std::path::Path;

use serde::{Deserialize, Serialize};
use trellis_loader::LoaderConfig;
use trellis_store::StoreConfig;
use trellis_types::ReplayOrder;

use crate::error::{SdkError, SdkResult};

/// Top-level Trellis configuration, usually read from `trellis.toml`.
///
/// ```toml
/// [loader]
/// base_url = "https://cdn.example.org/components"
/// stall_timeout_ms = 5000
///
/// [store]
/// data_dir = "/var/lib/trellis"
///
/// [components]
/// manifests = ["chat.json", "profile.json"]
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrellisConfig {
    pub loader: LoaderConfig,
    pub store: StoreConfig,
    pub components: ComponentConfig,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComponentConfig {
    /// Replay order of resolutions queued behind a manifest load.
    pub replay_order: ReplayOrder,
    /// Component manifests loaded by [`Trellis::preload`](crate::Trellis::preload).
    pub manifests: Vec<String>,
}

impl TrellisConfig {
    pub fn from_toml_str(s: &str) -> SdkResult<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> SdkResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| SdkError::ConfigRead {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&text)
    }
}
