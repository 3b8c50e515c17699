//! Configuration for transaction review

use bitcoin::Network;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings of the transaction review engine
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewConfig {
    /// Network used to attribute output scripts to addresses
    pub network: Network,
    /// A fee rate below `recommended * fee_rate_low_ratio` is flagged as too low
    pub fee_rate_low_ratio: f64,
    /// A fee rate above `recommended * fee_rate_high_ratio` is flagged as too high
    pub fee_rate_high_ratio: f64,
    /// Upper bound for best-effort price lookups, in milliseconds
    pub price_timeout_ms: u64,
}

impl ReviewConfig {
    pub fn price_timeout(&self) -> Duration {
        Duration::from_millis(self.price_timeout_ms)
    }
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            network: Network::Bitcoin,
            fee_rate_low_ratio: 0.5,
            fee_rate_high_ratio: 5.0,
            price_timeout_ms: 3_000,
        }
    }
}
