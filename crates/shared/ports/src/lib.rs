//! Ticker Ports
//!
//! Port definitions (traits) for the ticker streaming service.
//! These define the boundaries between the streaming engine and the
//! infrastructure that actually produces prices.

mod clock;
mod error;
mod source;

pub use clock::Clock;
pub use error::{SourceError, SourceResult};
pub use source::{PriceSource, SourceContext, SourceSession};
