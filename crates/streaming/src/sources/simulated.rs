//! Simulated Price Source
//!
//! A seeded random walk per symbol. Useful for demos and load tests without
//! network access.

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use ticker_core::{Price, Symbol};
use ticker_ports::{PriceSource, SourceContext, SourceError, SourceResult, SourceSession};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatedSourceConfig {
    /// Starting price before the per-symbol offset
    #[serde(default = "default_initial_price")]
    pub initial_price: Price,

    /// Largest single-step move in basis points
    #[serde(default = "default_volatility_bps")]
    pub volatility_bps: u32,

    /// Random seed (for reproducibility)
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_initial_price() -> Price {
    Decimal::new(50_000, 0)
}

fn default_volatility_bps() -> u32 {
    10
}

impl Default for SimulatedSourceConfig {
    fn default() -> Self {
        Self {
            initial_price: default_initial_price(),
            volatility_bps: default_volatility_bps(),
            seed: None,
        }
    }
}

impl SimulatedSourceConfig {
    pub fn deterministic(seed: u64) -> Self {
        Self {
            seed: Some(seed),
            ..Default::default()
        }
    }
}

pub struct SimulatedPriceSource {
    config: SimulatedSourceConfig,
}

impl SimulatedPriceSource {
    pub fn new(config: SimulatedSourceConfig) -> Self {
        Self { config }
    }

    fn rng_for(&self, symbol: &Symbol) -> StdRng {
        // Distinct but reproducible streams per symbol
        let salt = symbol
            .as_str()
            .bytes()
            .fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64));
        match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed ^ salt),
            None => StdRng::from_entropy(),
        }
    }
}

#[async_trait]
impl PriceSource for SimulatedPriceSource {
    async fn provision(&self, _symbol: &Symbol) -> SourceResult<Arc<dyn SourceContext>> {
        Ok(Arc::new(SimulatedContext {
            closed: AtomicBool::new(false),
        }))
    }

    async fn open(
        &self,
        symbol: &Symbol,
        context: Arc<dyn SourceContext>,
    ) -> SourceResult<Box<dyn SourceSession>> {
        if !context.is_usable() {
            return Err(SourceError::Acquisition("context already closed".into()));
        }
        let mut rng = self.rng_for(symbol);
        // Spread symbols over +/-50% of the configured start
        let offset = Decimal::new(rng.gen_range(-5000..=5000), 4);
        let start = (self.config.initial_price * (Decimal::ONE + offset)).round_dp(2);

        Ok(Box::new(SimulatedSession {
            walk: Mutex::new(Walk { price: start, rng }),
            volatility_bps: i64::from(self.config.volatility_bps),
            closed: AtomicBool::new(false),
            context,
        }))
    }

    fn name(&self) -> &str {
        "SimulatedPriceSource"
    }
}

struct SimulatedContext {
    closed: AtomicBool,
}

#[async_trait]
impl SourceContext for SimulatedContext {
    fn is_usable(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

struct Walk {
    price: Price,
    rng: StdRng,
}

struct SimulatedSession {
    walk: Mutex<Walk>,
    volatility_bps: i64,
    closed: AtomicBool,
    context: Arc<dyn SourceContext>,
}

impl SimulatedSession {
    fn quote(&self) -> SourceResult<String> {
        if self.is_closed() {
            return Err(SourceError::Unavailable("session closed".into()));
        }
        Ok(self.walk.lock().price.to_string())
    }
}

#[async_trait]
impl SourceSession for SimulatedSession {
    async fn refresh(&self) -> SourceResult<()> {
        if self.is_closed() {
            return Err(SourceError::Unavailable("session closed".into()));
        }
        let mut walk = self.walk.lock();
        // Quiet ticks keep the change filter honest
        if walk.rng.gen_bool(0.3) {
            return Ok(());
        }
        let bps = walk.rng.gen_range(-self.volatility_bps..=self.volatility_bps);
        let next = (walk.price * (Decimal::ONE + Decimal::new(bps, 4))).round_dp(2);
        if next > Decimal::ZERO {
            walk.price = next;
        }
        Ok(())
    }

    async fn probe(&self, _locator: &str) -> SourceResult<Option<String>> {
        self.quote().map(Some)
    }

    async fn text_fragments(&self) -> SourceResult<Vec<String>> {
        self.quote().map(|q| vec![q])
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || !self.context.is_usable()
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
