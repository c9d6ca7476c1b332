use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use ticker_streaming::StreamingService;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::handlers;
use crate::presentation::websocket::ws_handler;

/// Application state shared by REST handlers and WebSocket connections
pub struct AppState {
    pub service: Arc<StreamingService>,
    connections: AtomicUsize,
}

impl AppState {
    pub fn new(service: Arc<StreamingService>) -> Self {
        AppState {
            service,
            connections: AtomicUsize::new(0),
        }
    }

    /// Open WebSocket connections
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    pub(crate) fn connection_opened(&self) -> usize {
        self.connections.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn connection_closed(&self) -> usize {
        self.connections.fetch_sub(1, Ordering::Relaxed).saturating_sub(1)
    }
}

/// Create the HTTP router (REST endpoints plus the `/ws` upgrade)
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/stats", get(handlers::stats))
        .route("/api/unsubscribe", post(handlers::unsubscribe))
        .route("/ws", get(ws_handler))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
