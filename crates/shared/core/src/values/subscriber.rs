use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identity of one logical client stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriberId(String);

impl SubscriberId {
    /// Accept a caller-supplied id. Blank input yields `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(SubscriberId(trimmed.to_string()))
        }
    }

    /// Generate a fresh id of the form `client-<millis>-<random>`.
    pub fn generate() -> Self {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        SubscriberId(format!(
            "client-{}-{}",
            Utc::now().timestamp_millis(),
            &suffix[..9]
        ))
    }

    /// Use the supplied id when present, otherwise generate one.
    pub fn parse_or_generate(raw: Option<&str>) -> Self {
        raw.and_then(Self::parse).unwrap_or_else(Self::generate)
    }

    /// Derive a per-stream id from a connection-level client id.
    pub fn for_stream(client: &str, symbol: &crate::Symbol) -> Self {
        SubscriberId(format!("{}:{}", client.trim(), symbol))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for SubscriberId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
