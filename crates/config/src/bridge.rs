//! Configuration for the in-page provider bridge

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings of the page-side provider bridge
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Name of the channel shared with the background
    pub channel_name: String,
    /// Interval between keep-alive requests, in milliseconds
    pub keep_alive_interval_ms: u64,
    /// How long a dispatched request may wait for its response, in milliseconds
    pub request_timeout_ms: u64,
    /// Number of event listeners above which a possible leak is logged
    pub max_listeners: usize,
    /// Name of the read-only global the provider is installed under
    pub global_name: String,
    /// Additional names installed after `legacy_alias_delay_ms`, only if still undefined
    pub legacy_aliases: Vec<String>,
    /// Delay before legacy aliases are installed, in milliseconds
    pub legacy_alias_delay_ms: u64,
}

impl BridgeConfig {
    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_millis(self.keep_alive_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn legacy_alias_delay(&self) -> Duration {
        Duration::from_millis(self.legacy_alias_delay_ms)
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            channel_name: "OPNET".to_string(),
            keep_alive_interval_ms: 1_000,
            request_timeout_ms: 60_000,
            max_listeners: 100,
            global_name: "opnet".to_string(),
            legacy_aliases: vec!["unisat".to_string()],
            legacy_alias_delay_ms: 2_000,
        }
    }
}
