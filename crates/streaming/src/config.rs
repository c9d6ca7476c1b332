//! Streaming engine settings
//!
//! Every field has a serde default so a partial JSON section is enough:
//!
//! ```json
//! { "max_resources": 8, "poll_interval_ms": 250 }
//! ```

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use ticker_core::{Price, PriceRange};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid streaming config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// Upper bound on pooled source contexts
    #[serde(default = "default_max_resources")]
    pub max_resources: usize,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Pause between the immediate first read and the polling loop
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    #[serde(default = "default_validation_timeout_ms")]
    pub validation_timeout_ms: u64,

    #[serde(default = "default_validation_attempts")]
    pub validation_attempts: u32,

    /// How long `stop` waits for a reader task before aborting it
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,

    /// Delay before an empty symbol is torn down. Zero tears down immediately.
    #[serde(default)]
    pub cleanup_grace_ms: u64,

    #[serde(default = "default_min_price")]
    pub min_price: Price,

    #[serde(default = "default_max_price")]
    pub max_price: Price,

    /// Structured locators, highest priority first
    #[serde(default = "default_locators")]
    pub locators: Vec<String>,
}

fn default_max_resources() -> usize {
    16
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_settle_delay_ms() -> u64 {
    500
}

fn default_validation_timeout_ms() -> u64 {
    5000
}

fn default_validation_attempts() -> u32 {
    5
}

fn default_stop_timeout_ms() -> u64 {
    5000
}

fn default_min_price() -> Price {
    Decimal::new(1, 2)
}

fn default_max_price() -> Price {
    Decimal::new(1_000_000, 0)
}

fn default_locators() -> Vec<String> {
    [
        "/price",
        "/lastPrice",
        "/last",
        "/data/price",
        "/data/amount",
        "/result/price",
        "/ticker/last",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            max_resources: default_max_resources(),
            poll_interval_ms: default_poll_interval_ms(),
            settle_delay_ms: default_settle_delay_ms(),
            validation_timeout_ms: default_validation_timeout_ms(),
            validation_attempts: default_validation_attempts(),
            stop_timeout_ms: default_stop_timeout_ms(),
            cleanup_grace_ms: 0,
            min_price: default_min_price(),
            max_price: default_max_price(),
            locators: default_locators(),
        }
    }
}

impl StreamingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_resources == 0 {
            return Err(ConfigError::Invalid(
                "max_resources must be at least 1".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_ms must be positive".to_string(),
            ));
        }
        if self.validation_attempts == 0 {
            return Err(ConfigError::Invalid(
                "validation_attempts must be at least 1".to_string(),
            ));
        }
        if self.locators.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one locator is required".to_string(),
            ));
        }
        self.price_range().map(|_| ())
    }

    pub fn price_range(&self) -> Result<PriceRange, ConfigError> {
        PriceRange::new(self.min_price, self.max_price)
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn validation_timeout(&self) -> Duration {
        Duration::from_millis(self.validation_timeout_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn cleanup_grace(&self) -> Duration {
        Duration::from_millis(self.cleanup_grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: StreamingConfig =
            serde_json::from_str(r#"{ "max_resources": 4, "min_price": "1.5" }"#).unwrap();

        assert_eq!(config.max_resources, 4);
        assert_eq!(config.min_price, dec!(1.5));
        assert_eq!(config.max_price, dec!(1000000));
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.cleanup_grace(), Duration::ZERO);
        assert_eq!(config.locators[0], "/price");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_inverted_range_rejected() {
        let config = StreamingConfig {
            min_price: dec!(10),
            max_price: dec!(5),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config = StreamingConfig {
            max_resources: 0,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::Invalid(
                "max_resources must be at least 1".to_string()
            ))
        );
    }
}
