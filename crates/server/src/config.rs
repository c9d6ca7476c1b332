//! Configuration loading for the ticker server
//!
//! A JSON file supplies any subset of the settings; everything else falls
//! back to defaults. Environment variables are applied last:
//!
//! ```json
//! {
//!   "server": { "port": 4000 },
//!   "streaming": { "max_resources": 8, "poll_interval_ms": 500 },
//!   "source": { "kind": "http", "url_template": "https://prices.example/{symbol}" }
//! }
//! ```

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use ticker_streaming::{HttpSourceConfig, SimulatedSourceConfig, StreamingConfig};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {error}")]
    Io { path: String, error: String },

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid value for {key}: {reason}")]
    Env { key: &'static str, reason: String },

    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error(transparent)]
    Streaming(#[from] ticker_streaming::ConfigError),
}

/// Root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub streaming: StreamingConfig,

    #[serde(default)]
    pub source: SourceConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    4000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Where prices come from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    Http(HttpSourceConfig),
    Simulated(SimulatedSourceConfig),
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig::Simulated(SimulatedSourceConfig::default())
    }
}

impl AppConfig {
    /// Load configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            error: e.to_string(),
        })?;

        Self::from_json(&content)
    }

    /// Parse configuration from JSON string
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Apply overrides from the process environment
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Apply overrides looked up through `lookup`
    ///
    /// Recognized keys: `HOST`, `PORT`, `POLL_INTERVAL` (ms),
    /// `MIN_PRICE_RANGE`, `MAX_PRICE_RANGE`, `MAX_RESOURCES` and
    /// `PRICE_SOURCE_URL` (switches the source to HTTP).
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("PORT") {
            self.server.port = parse_env("PORT", &port)?;
        }
        if let Some(interval) = lookup("POLL_INTERVAL") {
            self.streaming.poll_interval_ms = parse_env("POLL_INTERVAL", &interval)?;
        }
        if let Some(min) = lookup("MIN_PRICE_RANGE") {
            self.streaming.min_price = parse_env::<Decimal>("MIN_PRICE_RANGE", &min)?;
        }
        if let Some(max) = lookup("MAX_PRICE_RANGE") {
            self.streaming.max_price = parse_env::<Decimal>("MAX_PRICE_RANGE", &max)?;
        }
        if let Some(max) = lookup("MAX_RESOURCES") {
            self.streaming.max_resources = parse_env("MAX_RESOURCES", &max)?;
        }
        if let Some(url) = lookup("PRICE_SOURCE_URL") {
            match &mut self.source {
                SourceConfig::Http(http) => http.url_template = url,
                SourceConfig::Simulated(_) => {
                    self.source = SourceConfig::Http(HttpSourceConfig::new(url));
                }
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.streaming.validate()?;
        if let SourceConfig::Http(http) = &self.source {
            if http.url_template.trim().is_empty() {
                return Err(ConfigError::Invalid("source url_template is empty".into()));
            }
            if http.request_timeout_ms == 0 {
                return Err(ConfigError::Invalid(
                    "source request_timeout_ms must be positive".into(),
                ));
            }
        }
        Ok(())
    }
}

fn parse_env<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Env {
        key,
        reason: e.to_string(),
    })
}
