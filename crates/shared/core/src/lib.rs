//! Ticker Core Domain
//!
//! Pure domain types for the ticker streaming service.
//! This crate contains no async, no I/O, and is 100% unit testable.

pub mod values;

// Re-export commonly used types at crate root
pub use values::{
    Price, PriceRange, PriceSample, SubscriberId, Symbol, SymbolError, Timestamp,
};
