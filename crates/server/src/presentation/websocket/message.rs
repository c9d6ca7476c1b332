use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ticker_core::{PriceSample, Symbol, SymbolError};
use ticker_streaming::{ErrorKind, StreamError};

use crate::presentation::rest::ApiError;

const PRICE_STREAM_SUFFIX: &str = "@price";

/// WebSocket incoming message
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "method", rename_all = "UPPERCASE")]
pub enum WsRequest {
    /// Subscribe to streams
    Subscribe { id: u64, params: Vec<String> },
    /// Unsubscribe from streams
    Unsubscribe { id: u64, params: Vec<String> },
    /// List current subscriptions
    #[serde(rename = "LIST_SUBSCRIPTIONS")]
    ListSubscriptions { id: u64 },
}

/// WebSocket response message
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum WsResponse {
    /// Response to subscribe/unsubscribe
    Result {
        id: u64,
        result: Option<serde_json::Value>,
    },
    /// Stream data
    Stream { stream: String, data: PriceUpdate },
    /// Error response
    Error {
        id: Option<u64>,
        code: i32,
        msg: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        kind: Option<ErrorKind>,
        #[serde(skip_serializing_if = "Option::is_none")]
        symbol: Option<String>,
    },
}

impl WsResponse {
    pub fn ok(id: u64) -> Self {
        WsResponse::Result { id, result: None }
    }

    pub fn subscriptions(id: u64, subs: Vec<String>) -> Self {
        WsResponse::Result {
            id,
            result: Some(serde_json::json!(subs)),
        }
    }

    pub fn price(sample: &PriceSample) -> Self {
        WsResponse::Stream {
            stream: stream_name(&sample.symbol),
            data: PriceUpdate::from(sample),
        }
    }

    pub fn error(id: Option<u64>, code: i32, msg: impl Into<String>) -> Self {
        WsResponse::Error {
            id,
            code,
            msg: msg.into(),
            kind: None,
            symbol: None,
        }
    }

    /// Error frame for a failed or terminated stream
    pub fn stream_error(id: Option<u64>, err: &StreamError) -> Self {
        let kind = err.kind();
        WsResponse::Error {
            id,
            code: ApiError::code_for(kind),
            msg: err.to_string(),
            kind: Some(kind),
            symbol: err.symbol().map(Symbol::to_string),
        }
    }

    pub fn invalid_param(id: u64, param: &str, err: &SymbolError) -> Self {
        WsResponse::Error {
            id: Some(id),
            code: ApiError::code_for(ErrorKind::InvalidRequest),
            msg: format!("Illegal stream '{}': {}", param, err),
            kind: Some(ErrorKind::InvalidRequest),
            symbol: None,
        }
    }
}

/// Price payload of a stream frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceUpdate {
    pub symbol: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    pub iso_timestamp: String,
}

impl From<&PriceSample> for PriceUpdate {
    fn from(sample: &PriceSample) -> Self {
        PriceUpdate {
            symbol: sample.symbol.to_string(),
            price: sample.price,
            iso_timestamp: sample
                .observed_at
                .to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        }
    }
}

/// `BTCUSD` -> `BTCUSD@price`
pub fn stream_name(symbol: &Symbol) -> String {
    format!("{}{}", symbol, PRICE_STREAM_SUFFIX)
}

/// Accept `btcusd`, `btc-usd` or `btcusd@price`
pub fn parse_stream_param(param: &str) -> Result<Symbol, SymbolError> {
    let trimmed = param.trim();
    let raw = match trimmed.rfind('@') {
        Some(at) if trimmed[at..].eq_ignore_ascii_case(PRICE_STREAM_SUFFIX) => &trimmed[..at],
        _ => trimmed,
    };
    Symbol::new(raw)
}
