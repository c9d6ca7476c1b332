use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SymbolError {
    #[error("Symbol '{0}' has no alphanumeric characters")]
    Empty(String),
}

/// Normalized instrument identifier.
///
/// Every lookup in the system goes through the normalized form, so two raw
/// inputs that normalize equal address the same subscription target.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol(String);

impl Symbol {
    /// Normalize a raw input: trim, upper-case, keep only `A-Z0-9`.
    pub fn normalize(raw: &str) -> String {
        raw.trim()
            .to_uppercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect()
    }

    pub fn new(raw: impl AsRef<str>) -> Result<Self, SymbolError> {
        let raw = raw.as_ref();
        let normalized = Self::normalize(raw);
        if normalized.is_empty() {
            return Err(SymbolError::Empty(raw.to_string()));
        }
        Ok(Symbol(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for Symbol {
    type Error = SymbolError;
    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Symbol::new(value)
    }
}

impl TryFrom<String> for Symbol {
    type Error = SymbolError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Symbol::new(value)
    }
}

impl From<Symbol> for String {
    fn from(symbol: Symbol) -> String {
        symbol.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_and_uppercases() {
        assert_eq!(Symbol::normalize("  btc-usd "), Symbol::normalize("BTCUSD"));
        assert_eq!(Symbol::normalize("eth/usdt"), "ETHUSDT");
        assert_eq!(Symbol::normalize("sol_usd.p"), "SOLUSDP");
    }

    #[test]
    fn test_equal_after_normalization() {
        let a = Symbol::new("  btc-usd ").unwrap();
        let b = Symbol::new("BTCUSD").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "BTCUSD");
    }

    #[test]
    fn test_non_ascii_is_stripped() {
        assert_eq!(Symbol::normalize("btc€usd"), "BTCUSD");
    }

    #[test]
    fn test_empty_rejected() {
        assert!(Symbol::new("").is_err());
        assert!(Symbol::new("  -/- ").is_err());
    }

    #[test]
    fn test_deserialize_normalizes() {
        let symbol: Symbol = serde_json::from_str("\"btc-usd\"").unwrap();
        assert_eq!(symbol.as_str(), "BTCUSD");
        assert!(serde_json::from_str::<Symbol>("\"--\"").is_err());
    }
}
