//! # opwallet-config
//!
//! Wallet bridge and review configuration.
//!
//! Values are layered: built-in defaults, then `opwallet.toml`, then `OPWALLET_` prefixed
//! environment variables where nested keys are separated by `__`, e.g.
//! `OPWALLET_BRIDGE__CHANNEL_NAME=OPNET`.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

#[macro_use]
extern crate tracing;

use figment::{
    Figment, Provider,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::Path;

// reexport so callers can layer their own providers on top
pub use figment;

mod bridge;
pub use bridge::BridgeConfig;

mod error;
pub use error::ConfigError;

mod review;
pub use review::ReviewConfig;

/// Top level configuration
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Page-side provider bridge
    pub bridge: BridgeConfig,
    /// Transaction review engine
    pub review: ReviewConfig,
}

impl Config {
    /// The name of the file the config is read from
    pub const FILE_NAME: &'static str = "opwallet.toml";

    /// The prefix of environment variables that override config values
    pub const ENV_PREFIX: &'static str = "OPWALLET_";

    /// Loads the config from the current directory and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_root(".")
    }

    /// Loads the config from `root/opwallet.toml` and the environment.
    pub fn load_with_root(root: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_provider(Self::figment_with_root(root))
    }

    /// Extracts a config from any figment `Provider`.
    ///
    /// ```
    /// use opwallet_config::{Config, figment::providers::Serialized};
    ///
    /// let config = Config::from_provider(Serialized::defaults(Config::default())).unwrap();
    /// assert_eq!(config.bridge.channel_name, "OPNET");
    /// ```
    pub fn from_provider<T: Provider>(provider: T) -> Result<Self, ConfigError> {
        let figment = Figment::from(provider);
        let config = figment.extract::<Self>().map_err(ConfigError::new)?;
        trace!(target: "config", ?config, "extracted config");
        Ok(config)
    }

    /// Returns the default figment rooted at the current directory.
    pub fn figment() -> Figment {
        Self::figment_with_root(".")
    }

    /// Returns the default figment: defaults, `root/opwallet.toml`, then the environment.
    pub fn figment_with_root(root: impl AsRef<Path>) -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(root.as_ref().join(Self::FILE_NAME)))
            .merge(Env::prefixed(Self::ENV_PREFIX).split("__"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::Network;
    use figment::Jail;
    use similar_asserts::assert_eq;
    use std::time::Duration;

    #[test]
    fn figment_is_default() {
        Jail::expect_with(|_| {
            let config = Config::load().unwrap();
            assert_eq!(config, Config::default());
            assert_eq!(config.bridge.keep_alive_interval(), Duration::from_secs(1));
            assert_eq!(config.bridge.legacy_aliases, vec!["unisat".to_string()]);
            Ok(())
        });
    }

    #[test]
    fn toml_overrides_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "opwallet.toml",
                r#"
                [bridge]
                channel_name = "OPNET_TEST"
                keep_alive_interval_ms = 250

                [review]
                network = "regtest"
                fee_rate_high_ratio = 3.0
            "#,
            )?;
            let config = Config::load().unwrap();
            assert_eq!(config.bridge.channel_name, "OPNET_TEST");
            assert_eq!(config.bridge.keep_alive_interval(), Duration::from_millis(250));
            assert_eq!(config.bridge.request_timeout_ms, 60_000);
            assert_eq!(config.review.network, Network::Regtest);
            assert_eq!(config.review.fee_rate_high_ratio, 3.0);
            assert_eq!(config.review.fee_rate_low_ratio, 0.5);
            Ok(())
        });
    }

    #[test]
    fn env_overrides_toml() {
        Jail::expect_with(|jail| {
            jail.create_file("opwallet.toml", "[bridge]\nglobal_name = \"fromtoml\"\n")?;
            jail.set_env("OPWALLET_BRIDGE__GLOBAL_NAME", "fromenv");
            jail.set_env("OPWALLET_REVIEW__PRICE_TIMEOUT_MS", "10");
            let config = Config::load().unwrap();
            assert_eq!(config.bridge.global_name, "fromenv");
            assert_eq!(config.review.price_timeout(), Duration::from_millis(10));
            Ok(())
        });
    }

    #[test]
    fn reports_invalid_values() {
        Jail::expect_with(|jail| {
            jail.create_file("opwallet.toml", "[bridge]\nkeep_alive_interval_ms = \"soon\"\n")?;
            let err = Config::load().unwrap_err();
            let msg = err.to_string();
            assert!(msg.contains("failed to extract opwallet config"), "{msg}");
            assert!(msg.contains("keep_alive_interval_ms"), "{msg}");
            Ok(())
        });
    }
}
