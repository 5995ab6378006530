use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::utils::error::{PipelineError, PipelineResult};

/// Pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// WebSocket endpoint of the interception backend
    pub endpoint: String,

    /// Maximum number of buffered flow records
    pub capacity: usize,

    /// Quick-filter debounce window in milliseconds
    pub debounce_ms: u64,

    /// Delay before the first reconnect attempt in milliseconds
    pub reconnect_base_delay_ms: u64,

    /// Automatic reconnect attempts before giving up
    pub max_reconnect_attempts: u32,

    /// Optional ceiling on a single reconnect delay
    pub reconnect_max_delay_ms: Option<u64>,

    /// Keep-alive ping interval while connected; `None` disables pings
    pub ping_interval_secs: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://127.0.0.1:8000/ws".to_string(),
            capacity: 1000,
            debounce_ms: 300,
            reconnect_base_delay_ms: 1000,
            max_reconnect_attempts: 5,
            reconnect_max_delay_ms: None,
            ping_interval_secs: Some(30),
        }
    }
}

impl PipelineConfig {
    /// Load a configuration from a JSON file. Missing keys take defaults.
    pub fn load(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: PipelineConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> PipelineResult<()> {
        if self.endpoint.trim().is_empty() {
            return Err(PipelineError::InvalidConfig("endpoint must not be empty".to_string()));
        }
        if !(self.endpoint.starts_with("ws://") || self.endpoint.starts_with("wss://")) {
            return Err(PipelineError::InvalidConfig(format!(
                "endpoint '{}' is not a ws:// or wss:// address",
                self.endpoint
            )));
        }
        if self.capacity == 0 {
            return Err(PipelineError::InvalidConfig("capacity must be at least 1".to_string()));
        }
        if self.reconnect_base_delay_ms == 0 {
            return Err(PipelineError::InvalidConfig(
                "reconnect_base_delay_ms must be at least 1".to_string(),
            ));
        }
        if self.ping_interval_secs == Some(0) {
            return Err(PipelineError::InvalidConfig(
                "ping_interval_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn reconnect_base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms)
    }

    pub fn reconnect_max_delay(&self) -> Option<Duration> {
        self.reconnect_max_delay_ms.map(Duration::from_millis)
    }

    pub fn ping_interval(&self) -> Option<Duration> {
        self.ping_interval_secs.map(Duration::from_secs)
    }
}
