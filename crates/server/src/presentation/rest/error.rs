use crate::presentation::rest::dto::ErrorResponse;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use ticker_streaming::{ErrorKind, StreamError};

/// API error type
#[derive(Debug)]
pub struct ApiError {
    pub code: i32,
    pub message: String,
    pub status: StatusCode,
    pub kind: Option<ErrorKind>,
}

impl ApiError {
    pub fn bad_request(code: i32, message: impl Into<String>) -> Self {
        ApiError {
            code,
            message: message.into(),
            status: StatusCode::BAD_REQUEST,
            kind: Some(ErrorKind::InvalidRequest),
        }
    }

    pub fn invalid_symbol(symbol: &str) -> Self {
        Self::bad_request(-1121, format!("Invalid symbol: {}", symbol))
    }

    pub fn missing_parameter(param: &str) -> Self {
        Self::bad_request(
            -1102,
            format!("Mandatory parameter '{}' was not sent", param),
        )
    }

    /// Numeric code shared by REST and WebSocket error frames
    pub fn code_for(kind: ErrorKind) -> i32 {
        match kind {
            ErrorKind::InvalidRequest => -1100,
            ErrorKind::InvalidSymbol => -1121,
            ErrorKind::Transient => -1003,
            ErrorKind::Unavailable => -1001,
            ErrorKind::Closed => -1000,
        }
    }
}

impl From<StreamError> for ApiError {
    fn from(err: StreamError) -> Self {
        let kind = err.kind();
        let status = match kind {
            ErrorKind::InvalidRequest | ErrorKind::InvalidSymbol => StatusCode::BAD_REQUEST,
            ErrorKind::Transient | ErrorKind::Unavailable | ErrorKind::Closed => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        };
        ApiError {
            code: Self::code_for(kind),
            message: err.to_string(),
            status,
            kind: Some(kind),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            kind: self.kind,
            ..ErrorResponse::new(self.code, self.message)
        });
        (self.status, body).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "API Error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

#[cfg(test)]
mod tests {
    use super::*;
    use ticker_core::Symbol;

    #[test]
    fn test_stream_errors_map_to_status() {
        let symbol = Symbol::new("BTCUSD").unwrap();

        let invalid: ApiError = StreamError::InvalidSymbol {
            symbol: symbol.clone(),
            reason: "no price".into(),
        }
        .into();
        assert_eq!(invalid.status, StatusCode::BAD_REQUEST);
        assert_eq!(invalid.code, -1121);

        let outage: ApiError = StreamError::SourceUnavailable {
            symbol,
            reason: "gone".into(),
        }
        .into();
        assert_eq!(outage.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(outage.kind, Some(ErrorKind::Unavailable));

        let closed: ApiError = StreamError::ShuttingDown.into();
        assert_eq!(closed.code, -1000);
    }
}
