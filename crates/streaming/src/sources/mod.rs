//! Price source adapters
//!
//! - [`HttpPriceSource`]: polls a JSON or text quote endpoint
//! - [`SimulatedPriceSource`]: seeded random walk, no network
//! - [`ScriptedSource`]: fixed per-symbol playback for tests and demos

mod http;
mod scripted;
mod simulated;

pub use http::{FetchError, HttpPriceSource, HttpSourceConfig};
pub use scripted::{SCRIPTED_LOCATOR, ScriptStep, ScriptedSource};
pub use simulated::{SimulatedPriceSource, SimulatedSourceConfig};
