use ticker_core::Timestamp;

/// Source of "now" for sample timestamps and pool recency
///
/// Tests substitute a clock they can move by hand, which makes LRU order
/// deterministic without sleeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}
