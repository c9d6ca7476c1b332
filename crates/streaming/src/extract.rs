//! Price extraction from a source session
//!
//! Structured locators are probed concurrently and the first in-range value
//! in priority order wins. When none yields a price, the session's text
//! fragments are scanned for the first price-looking token.

use futures_util::future::join_all;
use regex::Regex;
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;
use ticker_core::{Price, PriceRange};
use ticker_ports::{SourceError, SourceResult, SourceSession};

/// Optional `$`, up to four leading digits with comma groups, up to eight decimals
static PRICE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$?(\d{1,4}(?:,\d{3})*(?:\.\d{1,8})?)").expect("price pattern is valid")
});

/// Leading numeric prefix of an already comma-stripped string
static LEADING_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[+-]?(?:\d+(?:\.\d*)?|\.\d+)").expect("number pattern is valid")
});

pub struct PriceExtractor {
    locators: Vec<String>,
    range: PriceRange,
}

impl PriceExtractor {
    pub fn new(locators: Vec<String>, range: PriceRange) -> Self {
        Self { locators, range }
    }

    pub fn range(&self) -> &PriceRange {
        &self.range
    }

    pub fn locators(&self) -> &[String] {
        &self.locators
    }

    /// Parse raw locator text such as `"61,234.50 USD"` into an in-range price
    pub fn parse_price(&self, text: &str) -> Option<Price> {
        let cleaned = text.replace(',', "");
        let cleaned = cleaned.trim().trim_start_matches('$');
        let number = LEADING_NUMBER.find(cleaned)?.as_str();
        let price = Price::from_str(number).ok()?;
        self.range.contains(price).then_some(price)
    }

    /// First price-looking token in a free-text fragment, if in range
    pub fn scan(&self, fragment: &str) -> Option<Price> {
        let token = PRICE_PATTERN.captures(fragment)?.get(1)?.as_str();
        let price = Price::from_str(&token.replace(',', "")).ok()?;
        self.range.contains(price).then_some(price)
    }

    /// Locator pass only
    ///
    /// Transient probe failures are skipped. `Unavailable` is only reported
    /// when no locator produced a price.
    pub async fn read_structured(&self, session: &dyn SourceSession) -> SourceResult<Option<Price>> {
        let probes = join_all(self.locators.iter().map(|l| session.probe(l))).await;

        let mut unavailable = None;
        for (locator, result) in self.locators.iter().zip(probes) {
            match result {
                Ok(Some(text)) => {
                    if let Some(price) = self.parse_price(&text) {
                        return Ok(Some(price));
                    }
                    tracing::trace!(%locator, %text, "Locator text is not an in-range price");
                }
                Ok(None) => {}
                Err(err @ SourceError::Unavailable(_)) => {
                    unavailable.get_or_insert(err);
                }
                Err(err) => {
                    tracing::trace!(%locator, error = %err, "Probe failed");
                }
            }
        }

        match unavailable {
            Some(err) => Err(err),
            None => Ok(None),
        }
    }

    /// Locators first, then the fallback text scan
    pub async fn read(&self, session: &dyn SourceSession) -> SourceResult<Option<Price>> {
        if let Some(price) = self.read_structured(session).await? {
            return Ok(Some(price));
        }
        let fragments = session.text_fragments().await?;
        Ok(fragments.iter().find_map(|fragment| self.scan(fragment)))
    }

    /// Whether any locator currently resolves to some text, in range or not
    pub async fn has_signal(&self, session: &dyn SourceSession) -> SourceResult<bool> {
        let probes = join_all(self.locators.iter().map(|l| session.probe(l))).await;
        let mut found = false;
        for result in probes {
            match result {
                Ok(Some(_)) => found = true,
                Ok(None) => {}
                Err(err @ SourceError::Unavailable(_)) => return Err(err),
                Err(_) => {}
            }
        }
        Ok(found)
    }

    /// Check that the session exposes a price signal
    ///
    /// Makes up to `attempts` probes spread evenly over `timeout`. The first
    /// probe reads the document as opened; later ones refresh it first.
    pub async fn validate(
        &self,
        session: &dyn SourceSession,
        attempts: u32,
        timeout: Duration,
    ) -> SourceResult<bool> {
        let attempts = attempts.max(1);
        let spacing = timeout / attempts;

        let probing = async {
            for attempt in 0..attempts {
                if attempt > 0 {
                    tokio::time::sleep(spacing).await;
                    match session.refresh().await {
                        Ok(()) => {}
                        Err(err @ SourceError::Unavailable(_)) => return Err(err),
                        Err(err) => {
                            tracing::debug!(attempt, error = %err, "Refresh failed during validation");
                            continue;
                        }
                    }
                }
                if self.has_signal(session).await? {
                    return Ok(true);
                }
            }
            Ok::<_, SourceError>(false)
        };

        match tokio::time::timeout(timeout, probing).await {
            Ok(result) => result,
            Err(_) => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::{ScriptStep, ScriptedSource};
    use rust_decimal_macros::dec;
    use ticker_core::Symbol;
    use ticker_ports::PriceSource;

    fn extractor() -> PriceExtractor {
        PriceExtractor::new(
            vec!["/price".to_string(), "/last".to_string()],
            PriceRange::default(),
        )
    }

    async fn session(source: &ScriptedSource, symbol: &str) -> Box<dyn SourceSession> {
        let symbol = Symbol::new(symbol).unwrap();
        let context = source.provision(&symbol).await.unwrap();
        source.open(&symbol, context).await.unwrap()
    }

    #[test]
    fn test_parse_price_strips_formatting() {
        let ex = extractor();
        assert_eq!(ex.parse_price("61,234.50"), Some(dec!(61234.50)));
        assert_eq!(ex.parse_price("  $1,000 USD"), Some(dec!(1000)));
        assert_eq!(ex.parse_price("0.5"), Some(dec!(0.5)));
        assert_eq!(ex.parse_price("n/a"), None);
        assert_eq!(ex.parse_price(""), None);
    }

    #[test]
    fn test_parse_price_enforces_open_range() {
        let ex = extractor();
        assert_eq!(ex.parse_price("0.01"), None);
        assert_eq!(ex.parse_price("1000000"), None);
        assert_eq!(ex.parse_price("999999.99"), Some(dec!(999999.99)));
        assert_eq!(ex.parse_price("-5"), None);
    }

    #[test]
    fn test_scan_takes_first_match_only() {
        let ex = extractor();
        assert_eq!(ex.scan("Last trade $61,234.50 (24h high 62,000)"), Some(dec!(61234.50)));
        assert_eq!(ex.scan("Volume: 0 contracts, price 45.10"), None);
        assert_eq!(ex.scan("no digits here"), None);
    }

    #[tokio::test]
    async fn test_read_prefers_structured() {
        let source = ScriptedSource::new().with_quotes("BTCUSD", &["61,234.50"]);
        let session = session(&source, "BTCUSD").await;
        assert_eq!(extractor().read(session.as_ref()).await.unwrap(), Some(dec!(61234.50)));
    }

    #[tokio::test]
    async fn test_read_falls_back_to_text() {
        let source = ScriptedSource::new()
            .with_script("ETHUSD", vec![ScriptStep::Text("ETH now at $3,120.75".into())]);
        let session = session(&source, "ETHUSD").await;
        let ex = extractor();

        assert_eq!(ex.read_structured(session.as_ref()).await.unwrap(), None);
        assert_eq!(ex.read(session.as_ref()).await.unwrap(), Some(dec!(3120.75)));
    }

    #[tokio::test]
    async fn test_out_of_range_structured_value_ignored() {
        let source = ScriptedSource::new().with_quotes("BIG", &["5000000"]);
        let session = session(&source, "BIG").await;
        assert_eq!(extractor().read(session.as_ref()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_closed_session_reports_unavailable() {
        let source = ScriptedSource::new().with_quotes("BTCUSD", &["1"]);
        let session = session(&source, "BTCUSD").await;
        session.close().await;
        assert!(matches!(
            extractor().read(session.as_ref()).await,
            Err(SourceError::Unavailable(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_validate_succeeds_after_late_signal() {
        let source = ScriptedSource::new().with_script(
            "LATE",
            vec![
                ScriptStep::Blank,
                ScriptStep::Blank,
                ScriptStep::Quote("12.5".into()),
            ],
        );
        let session = session(&source, "LATE").await;
        let valid = extractor()
            .validate(session.as_ref(), 5, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(valid);
    }

    #[tokio::test(start_paused = true)]
    async fn test_validate_fails_without_signal() {
        let source = ScriptedSource::new();
        let session = session(&source, "NOPE").await;
        let valid = extractor()
            .validate(session.as_ref(), 3, Duration::from_secs(3))
            .await
            .unwrap();
        assert!(!valid);
    }
}
