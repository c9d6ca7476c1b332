use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Price;

/// Open price interval `(min, max)`. Both bounds are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceRange {
    pub min: Price,
    pub max: Price,
}

impl PriceRange {
    pub fn new(min: Price, max: Price) -> Result<Self, &'static str> {
        if min < Decimal::ZERO {
            return Err("Minimum price cannot be negative");
        }
        if min >= max {
            return Err("Minimum price must be below maximum price");
        }
        Ok(PriceRange { min, max })
    }

    pub fn contains(&self, price: Price) -> bool {
        price > self.min && price < self.max
    }
}

impl Default for PriceRange {
    fn default() -> Self {
        // 0.01 .. 1_000_000
        PriceRange {
            min: Decimal::new(1, 2),
            max: Decimal::from(1_000_000),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_bounds_are_exclusive() {
        let range = PriceRange::default();
        assert!(!range.contains(dec!(0.01)));
        assert!(range.contains(dec!(0.011)));
        assert!(range.contains(dec!(61234.5)));
        assert!(!range.contains(dec!(1000000)));
        assert!(!range.contains(dec!(-5)));
    }

    #[test]
    fn test_new_validates() {
        assert!(PriceRange::new(dec!(10), dec!(5)).is_err());
        assert!(PriceRange::new(dec!(5), dec!(5)).is_err());
        assert!(PriceRange::new(dec!(-1), dec!(5)).is_err());
        assert!(PriceRange::new(dec!(1), dec!(5)).is_ok());
    }
}
