//! Ticker Streaming
//!
//! Subscription bookkeeping and fan-out for near-real-time instrument prices.
//!
//! # Architecture
//!
//! ```text
//!   subscribe("btc-usd")          subscribe("BTCUSD")
//!          │                              │
//!          ▼                              ▼
//! ┌──────────────────────────────────────────────────────┐
//! │                  StreamingService                    │
//! │     (normalizes symbols, assigns subscriber ids)     │
//! └──────────────────────────┬───────────────────────────┘
//!                            ▼
//! ┌──────────────────────────────────────────────────────┐
//! │               SubscriptionRegistry                   │
//! │  ┌──────────────┐  ┌──────────────┐                  │
//! │  │ SymbolActor  │  │ SymbolActor  │  one per symbol, │
//! │  │   BTCUSD     │  │   ETHUSD     │  sole owner of   │
//! │  └──────┬───────┘  └──────┬───────┘  its SymbolState │
//! └─────────┼─────────────────┼──────────────────────────┘
//!           │ mailbox         │
//!   ┌───────┴──────┐   ┌──────┴───────┐
//!   │ PriceReader  │   │ PriceReader  │ ◄── ResourcePool (LRU-bounded
//!   │ (poll loop)  │   │ (poll loop)  │     source contexts)
//!   └──────────────┘   └──────────────┘
//!           │ fan-out
//!   ┌───────┴──────┬──────────────┐
//!   ▼              ▼              ▼
//! PriceStream  PriceStream   PriceStream   (one unbounded queue each)
//! ```
//!
//! - At most one [`PriceReader`] runs per symbol.
//! - A reader only emits when the price changes.
//! - The last emitted sample is cached and replayed to late joiners.
//! - The last subscriber leaving stops the reader and releases its context.

pub mod config;
pub mod error;
pub mod extract;
pub mod multiplexer;
pub mod pool;
pub mod reader;
pub mod registry;
pub mod service;
pub mod sources;

pub use config::{ConfigError, StreamingConfig};
pub use error::{ErrorKind, StreamError};
pub use extract::PriceExtractor;
pub use multiplexer::{Delivery, PriceStream};
pub use pool::{PooledResource, ResourcePool};
pub use reader::{
    PriceReader, ReaderDeps, ReaderEvent, ReaderMetrics, ReaderSink, ReaderState, ReaderTiming,
};
pub use registry::{
    RegistryStats, SubscribeOutcome, Subscription, SubscriptionRegistry, SymbolSnapshot, Ticket,
};
pub use service::{StreamingService, UnsubscribeAck};
pub use sources::{
    HttpPriceSource, HttpSourceConfig, ScriptStep, ScriptedSource, SimulatedPriceSource,
    SimulatedSourceConfig,
};
