//! Ticker Clock Infrastructure
//!
//! Provides time sources for the streaming engine:
//!
//! - [`SystemClock`]: wall-clock time for production
//! - [`ManualClock`]: frozen time that only moves when a test says so
//!
//! ## Usage
//!
//! ```ignore
//! use ticker_clock::{ManualClock, SystemClock};
//! use chrono::Duration;
//!
//! let clock = ManualClock::starting_now();
//! let before = clock.now();
//! clock.advance(Duration::seconds(5));
//! assert_eq!(clock.now() - before, Duration::seconds(5));
//! ```

mod manual;
mod system;

pub use manual::ManualClock;
pub use system::SystemClock;

// Re-export the Clock trait for convenience
pub use ticker_ports::Clock;
