use chrono::{Duration, Utc};
use parking_lot::RwLock;
use std::sync::Arc;
use ticker_core::Timestamp;
use ticker_ports::Clock;

/// Clock frozen at a given instant
///
/// Cloned handles share the same time, so a test can keep one handle and
/// move time forward for every component holding another.
#[derive(Debug, Clone)]
pub struct ManualClock {
    current: Arc<RwLock<Timestamp>>,
}

impl ManualClock {
    pub fn at(time: Timestamp) -> Self {
        ManualClock {
            current: Arc::new(RwLock::new(time)),
        }
    }

    pub fn starting_now() -> Self {
        Self::at(Utc::now())
    }

    /// Move time forward by `delta`
    pub fn advance(&self, delta: Duration) {
        let mut current = self.current.write();
        *current += delta;
    }

    /// Jump to an absolute time
    pub fn set(&self, time: Timestamp) {
        *self.current.write() = time;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::starting_now()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.current.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_is_frozen() {
        let clock = ManualClock::starting_now();
        let t1 = clock.now();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert_eq!(clock.now(), t1);
    }

    #[test]
    fn test_advance_is_shared_between_clones() {
        let clock = ManualClock::starting_now();
        let other = clock.clone();
        let start = clock.now();

        other.advance(Duration::milliseconds(250));

        assert_eq!(clock.now() - start, Duration::milliseconds(250));
    }

    #[test]
    fn test_set() {
        let clock = ManualClock::starting_now();
        let target = Utc::now() + Duration::days(1);
        clock.set(target);
        assert_eq!(clock.now(), target);
    }
}
