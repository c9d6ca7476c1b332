use serde::{Deserialize, Serialize};

use super::{Price, PriceRange, Symbol, Timestamp};

/// One observed price for one symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceSample {
    pub symbol: Symbol,
    pub price: Price,
    pub observed_at: Timestamp,
}

impl PriceSample {
    /// Build a sample, rejecting prices outside `range`.
    pub fn new(
        symbol: Symbol,
        price: Price,
        observed_at: Timestamp,
        range: &PriceRange,
    ) -> Option<Self> {
        if !range.contains(price) {
            return None;
        }
        Some(PriceSample {
            symbol,
            price,
            observed_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    #[test]
    fn test_out_of_range_rejected() {
        let symbol = Symbol::new("BTCUSD").unwrap();
        let range = PriceRange::default();

        assert!(PriceSample::new(symbol.clone(), dec!(61234.5), Utc::now(), &range).is_some());
        assert!(PriceSample::new(symbol.clone(), dec!(0), Utc::now(), &range).is_none());
        assert!(PriceSample::new(symbol, dec!(2000000), Utc::now(), &range).is_none());
    }
}
