use serde::{Deserialize, Serialize};
use ticker_streaming::{ErrorKind, RegistryStats, UnsubscribeAck};

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Service counters
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    /// Open WebSocket connections
    pub connections: usize,
    /// Logical subscriber streams across all symbols
    pub connected_clients: usize,
    /// Symbols with at least one subscriber
    pub active_subscriptions: usize,
    pub active_readers: usize,
    pub readers_started: u64,
    pub pooled_resources: usize,
    pub pool_capacity: usize,
    pub symbols: Vec<String>,
}

impl StatsResponse {
    pub fn new(stats: RegistryStats, connections: usize) -> Self {
        StatsResponse {
            connections,
            connected_clients: stats.subscribers,
            active_subscriptions: stats.active_symbols,
            active_readers: stats.active_readers,
            readers_started: stats.readers_started,
            pooled_resources: stats.pooled_resources,
            pool_capacity: stats.pool_capacity,
            symbols: stats.symbols,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UnsubscribeRequest {
    pub symbol: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsubscribeResponse {
    pub symbol: String,
    pub subscriber: String,
    pub removed: bool,
    pub iso_timestamp: String,
}

impl From<UnsubscribeAck> for UnsubscribeResponse {
    fn from(ack: UnsubscribeAck) -> Self {
        UnsubscribeResponse {
            symbol: ack.symbol.to_string(),
            subscriber: ack.subscriber.to_string(),
            removed: ack.removed,
            iso_timestamp: ack.acknowledged_at.to_rfc3339(),
        }
    }
}

/// Error response
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub code: i32,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
}

impl ErrorResponse {
    pub fn new(code: i32, msg: impl Into<String>) -> Self {
        ErrorResponse {
            code,
            msg: msg.into(),
            kind: None,
        }
    }
}
