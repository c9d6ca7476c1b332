//! Streaming Service
//!
//! Entry point for transports: validates raw input, assigns subscriber ids
//! and wires a fresh delivery queue into the registry.

use serde::Serialize;
use std::sync::Arc;
use ticker_clock::SystemClock;
use ticker_core::{SubscriberId, Symbol, Timestamp};
use ticker_ports::{Clock, PriceSource};
use tokio::sync::mpsc;

use crate::config::{ConfigError, StreamingConfig};
use crate::error::StreamError;
use crate::extract::PriceExtractor;
use crate::multiplexer::PriceStream;
use crate::pool::ResourcePool;
use crate::reader::{ReaderDeps, ReaderMetrics, ReaderTiming};
use crate::registry::{RegistryStats, SubscribeOutcome, SubscriptionRegistry};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsubscribeAck {
    pub symbol: Symbol,
    pub subscriber: SubscriberId,
    /// Whether the subscriber was streaming anything
    pub removed: bool,
    pub acknowledged_at: Timestamp,
}

pub struct StreamingService {
    registry: Arc<SubscriptionRegistry>,
    clock: Arc<dyn Clock>,
    config: StreamingConfig,
}

impl StreamingService {
    pub fn new(
        source: Arc<dyn PriceSource>,
        clock: Arc<dyn Clock>,
        config: StreamingConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let range = config.price_range()?;

        let pool = Arc::new(ResourcePool::new(
            Arc::clone(&source),
            Arc::clone(&clock),
            config.max_resources,
        ));
        let deps = ReaderDeps {
            pool,
            source,
            clock: Arc::clone(&clock),
            extractor: Arc::new(PriceExtractor::new(config.locators.clone(), range)),
            metrics: Arc::new(ReaderMetrics::default()),
            timing: ReaderTiming::from(&config),
        };
        let registry = Arc::new(SubscriptionRegistry::new(deps, config.cleanup_grace()));

        tracing::info!(
            max_resources = config.max_resources,
            poll_interval_ms = config.poll_interval_ms,
            min_price = %config.min_price,
            max_price = %config.max_price,
            "Streaming service ready"
        );

        Ok(Self {
            registry,
            clock,
            config,
        })
    }

    pub fn with_system_clock(
        source: Arc<dyn PriceSource>,
        config: StreamingConfig,
    ) -> Result<Self, ConfigError> {
        Self::new(source, Arc::new(SystemClock::new()), config)
    }

    /// Start streaming `raw_symbol` to `subscriber`
    ///
    /// The symbol is normalized first (`"btc-usd"` becomes `"BTCUSD"`). A
    /// missing subscriber id is generated. If a price is already cached for
    /// the symbol, it is the first item the returned stream yields.
    pub async fn subscribe(
        &self,
        raw_symbol: &str,
        subscriber: Option<&str>,
    ) -> Result<PriceStream, StreamError> {
        let symbol =
            Symbol::new(raw_symbol).map_err(|e| StreamError::InvalidRequest(e.to_string()))?;
        let subscriber = SubscriberId::parse_or_generate(subscriber);
        let (outlet, inbox) = mpsc::unbounded_channel();

        let subscription = self.registry.subscribe(&symbol, &subscriber, outlet).await?;
        match subscription.outcome {
            SubscribeOutcome::AlreadySubscribed => Err(StreamError::AlreadySubscribed {
                subscriber: subscriber.to_string(),
                symbol,
            }),
            _ => Ok(PriceStream::new(
                symbol,
                subscriber,
                subscription.ticket,
                inbox,
                Arc::clone(&self.registry),
            )),
        }
    }

    /// Stop whatever `subscriber` is streaming
    pub async fn unsubscribe(
        &self,
        raw_symbol: &str,
        subscriber: &str,
    ) -> Result<UnsubscribeAck, StreamError> {
        let symbol =
            Symbol::new(raw_symbol).map_err(|e| StreamError::InvalidRequest(e.to_string()))?;
        let subscriber = SubscriberId::parse(subscriber)
            .ok_or_else(|| StreamError::InvalidRequest("Missing subscriber id".to_string()))?;

        let removed = self.registry.unsubscribe(&subscriber).await;
        tracing::info!(%symbol, %subscriber, removed, "Unsubscribe requested");

        Ok(UnsubscribeAck {
            symbol,
            subscriber,
            removed,
            acknowledged_at: self.clock.now(),
        })
    }

    pub fn stats(&self) -> RegistryStats {
        self.registry.stats()
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &StreamingConfig {
        &self.config
    }

    pub async fn shutdown(&self) {
        self.registry.shutdown().await;
    }
}
