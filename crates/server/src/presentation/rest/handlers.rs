use axum::{Json, extract::State, http::HeaderMap};
use std::sync::Arc;
use ticker_core::{SubscriberId, Symbol};

use crate::presentation::rest::{ApiError, dto::*};

use super::AppState;

pub(crate) const CLIENT_ID_HEADER: &str = "x-client-id";

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// GET /api/stats
pub async fn stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    Json(StatsResponse::new(state.service.stats(), state.connections()))
}

/// POST /api/unsubscribe
///
/// Stops the stream the `x-client-id` client holds on `symbol`, whichever
/// transport opened it.
pub async fn unsubscribe(
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
    Json(request): Json<UnsubscribeRequest>,
) -> Result<Json<UnsubscribeResponse>, ApiError> {
    let client =
        client_id(&headers).ok_or_else(|| ApiError::missing_parameter(CLIENT_ID_HEADER))?;
    let symbol =
        Symbol::new(&request.symbol).map_err(|_| ApiError::invalid_symbol(&request.symbol))?;
    let subscriber = SubscriberId::for_stream(&client, &symbol);

    let ack = state
        .service
        .unsubscribe(symbol.as_str(), subscriber.as_str())
        .await?;
    Ok(Json(ack.into()))
}

/// Non-blank `x-client-id` header value
pub(crate) fn client_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(CLIENT_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
