//! Ticker Server
//!
//! WebSocket and REST front end for the ticker streaming service.
//!
//! # Endpoints
//!
//! - `GET /health` liveness probe
//! - `GET /api/stats` subscription and pool counters
//! - `POST /api/unsubscribe` stop a client's stream (`x-client-id` header)
//! - `GET /ws` price streams
//!
//! # Example
//!
//! ```ignore
//! use ticker_server::{AppConfig, TickerServer};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let server = TickerServer::new(AppConfig::default())?;
//!     server.run().await
//! }
//! ```

pub mod config;
pub mod presentation;

pub use config::{AppConfig, ConfigError, ServerConfig, SourceConfig};
pub use presentation::{ApiError, AppState, create_router};

use axum::Router;
use std::future::Future;
use std::sync::Arc;
use ticker_ports::PriceSource;
use ticker_streaming::{HttpPriceSource, SimulatedPriceSource, StreamingService};
use tokio::net::TcpListener;

/// Build the price source described by `config`
pub fn build_source(config: &SourceConfig) -> Arc<dyn PriceSource> {
    match config {
        SourceConfig::Http(http) => {
            tracing::info!(url_template = %http.url_template, "Using HTTP price source");
            Arc::new(HttpPriceSource::new(http.clone()))
        }
        SourceConfig::Simulated(sim) => {
            tracing::info!(
                initial_price = %sim.initial_price,
                volatility_bps = sim.volatility_bps,
                "Using simulated price source"
            );
            Arc::new(SimulatedPriceSource::new(sim.clone()))
        }
    }
}

/// The ticker server
pub struct TickerServer {
    pub config: AppConfig,
    state: Arc<AppState>,
}

impl TickerServer {
    /// Validate `config` and build the configured source
    pub fn new(config: AppConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let source = build_source(&config.source);
        Self::with_source(config, source)
    }

    /// Serve prices from an explicit source instead of `config.source`
    pub fn with_source(
        config: AppConfig,
        source: Arc<dyn PriceSource>,
    ) -> Result<Self, ConfigError> {
        let service = StreamingService::with_system_clock(source, config.streaming.clone())?;
        let state = Arc::new(AppState::new(Arc::new(service)));
        Ok(TickerServer { config, state })
    }

    pub fn service(&self) -> &Arc<StreamingService> {
        &self.state.service
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Create the HTTP router
    pub fn router(&self) -> Router {
        create_router(Arc::clone(&self.state))
    }

    /// Bind the configured address and serve until Ctrl-C
    pub async fn run(self) -> anyhow::Result<()> {
        let addr = self.config.server.addr();
        let listener = TcpListener::bind(&addr).await?;
        tracing::info!("Ticker server listening on {}", addr);

        self.serve(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            }
            tracing::info!("Shutdown signal received");
        })
        .await
    }

    /// Serve on `listener` until `shutdown` resolves, then stop every reader
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let service = Arc::clone(self.service());
        let result = axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                shutdown.await;
                // Ends every open stream so WebSocket connections can drain
                service.shutdown().await;
            })
            .await;

        // Idempotent when the shutdown future already ran
        self.service().shutdown().await;
        tracing::info!("Ticker server stopped");
        Ok(result?)
    }
}
