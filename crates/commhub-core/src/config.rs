//! Engine configuration

use crate::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Environment variable overriding [`HubConfig::base_url`]
pub const ENV_BASE_URL: &str = "COMMHUB_BASE_URL";
/// Environment variable overriding [`HubConfig::access_token`]
pub const ENV_TOKEN: &str = "COMMHUB_TOKEN";

/// Communications Hub engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct HubConfig {
    /// Backend root URL
    pub base_url: String,
    /// Bearer token, if the backend requires one
    pub access_token: Option<String>,
    /// Row limit for each inbox list request
    pub page_size: u32,
    /// Background refresh cadence
    pub poll_interval_secs: u64,
    /// Quiet period before a compose buffer is persisted
    pub autosave_debounce_ms: u64,
    /// Maximum characters kept in an item preview
    pub preview_chars: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000/api/v1/".to_string(),
            access_token: None,
            page_size: 50,
            poll_interval_secs: 10,
            autosave_debounce_ms: 2000,
            preview_chars: 140,
        }
    }
}

impl HubConfig {
    /// Load configuration from a JSON file, then apply environment overrides
    pub fn load(path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref();
        info!("Loading configuration from {}", path.display());

        let raw = std::fs::read_to_string(path)?;
        let mut config: HubConfig = serde_json::from_str(&raw)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides
    pub fn from_env() -> CoreResult<Self> {
        let mut config = HubConfig::default();
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(ENV_BASE_URL) {
            self.base_url = url;
        }
        if let Ok(token) = std::env::var(ENV_TOKEN) {
            self.access_token = Some(token);
        }
    }

    fn validate(&self) -> CoreResult<()> {
        if self.poll_interval_secs == 0 {
            return Err(CoreError::Config("poll_interval_secs must be positive".to_string()));
        }
        if self.page_size == 0 {
            return Err(CoreError::Config("page_size must be positive".to_string()));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn autosave_debounce(&self) -> Duration {
        Duration::from_millis(self.autosave_debounce_ms)
    }
}
