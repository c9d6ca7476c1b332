use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

mod range;
mod sample;
mod subscriber;
mod symbol;

pub use range::PriceRange;
pub use sample::PriceSample;
pub use subscriber::SubscriberId;
pub use symbol::{Symbol, SymbolError};

/// Price value - uses Decimal for precision
pub type Price = Decimal;

/// Timestamp in UTC
pub type Timestamp = DateTime<Utc>;
