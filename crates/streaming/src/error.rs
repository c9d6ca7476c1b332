use serde::Serialize;
use thiserror::Error;
use ticker_core::Symbol;
use ticker_ports::SourceError;

/// Coarse classification callers use to decide what to do next
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The request itself was malformed
    InvalidRequest,
    /// The source has no price signal for the symbol
    InvalidSymbol,
    /// Resources were short; subscribing again may succeed
    Transient,
    /// The source went away while streaming
    Unavailable,
    /// The service is shutting down
    Closed,
}

/// Errors surfaced to subscribers
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Could not acquire a source context for {symbol}: {reason}")]
    Acquisition { symbol: Symbol, reason: String },

    #[error("Invalid symbol {symbol}: {reason}")]
    InvalidSymbol { symbol: Symbol, reason: String },

    #[error("Price source unavailable for {symbol}: {reason}")]
    SourceUnavailable { symbol: Symbol, reason: String },

    #[error("Subscriber {subscriber} is already streaming {symbol}")]
    AlreadySubscribed { subscriber: String, symbol: Symbol },

    #[error("Streaming service is shutting down")]
    ShuttingDown,
}

impl StreamError {
    /// Map a source failure reported while streaming `symbol`
    pub fn from_source(symbol: &Symbol, error: SourceError) -> Self {
        let symbol = symbol.clone();
        match error {
            SourceError::Acquisition(reason) | SourceError::Transient(reason) => {
                StreamError::Acquisition { symbol, reason }
            }
            SourceError::InvalidSymbol(reason) => StreamError::InvalidSymbol { symbol, reason },
            SourceError::Unavailable(reason) => StreamError::SourceUnavailable { symbol, reason },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            StreamError::InvalidRequest(_) | StreamError::AlreadySubscribed { .. } => {
                ErrorKind::InvalidRequest
            }
            StreamError::Acquisition { .. } => ErrorKind::Transient,
            StreamError::InvalidSymbol { .. } => ErrorKind::InvalidSymbol,
            StreamError::SourceUnavailable { .. } => ErrorKind::Unavailable,
            StreamError::ShuttingDown => ErrorKind::Closed,
        }
    }

    /// Whether a fresh subscribe to the same symbol may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transient | ErrorKind::Unavailable)
    }

    pub fn symbol(&self) -> Option<&Symbol> {
        match self {
            StreamError::Acquisition { symbol, .. }
            | StreamError::InvalidSymbol { symbol, .. }
            | StreamError::SourceUnavailable { symbol, .. }
            | StreamError::AlreadySubscribed { symbol, .. } => Some(symbol),
            StreamError::InvalidRequest(_) | StreamError::ShuttingDown => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_errors_map_to_kinds() {
        let symbol = Symbol::new("BTCUSD").unwrap();

        let err = StreamError::from_source(&symbol, SourceError::InvalidSymbol("404".into()));
        assert_eq!(err.kind(), ErrorKind::InvalidSymbol);
        assert!(!err.is_retryable());

        let err = StreamError::from_source(&symbol, SourceError::Unavailable("gone".into()));
        assert_eq!(err.kind(), ErrorKind::Unavailable);
        assert!(err.is_retryable());

        let err = StreamError::from_source(&symbol, SourceError::Acquisition("full".into()));
        assert_eq!(err.kind(), ErrorKind::Transient);
        assert_eq!(err.symbol(), Some(&symbol));
    }

    #[test]
    fn test_display_names_symbol() {
        let err = StreamError::InvalidSymbol {
            symbol: Symbol::new("NOPE").unwrap(),
            reason: "no price signal".into(),
        };
        assert_eq!(err.to_string(), "Invalid symbol NOPE: no price signal");
    }
}
