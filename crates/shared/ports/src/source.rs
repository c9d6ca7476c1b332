use async_trait::async_trait;
use std::any::Any;
use std::sync::Arc;
use ticker_core::Symbol;

use crate::error::SourceResult;

/// Port for an external price source
///
/// A source hands out two kinds of objects:
/// - a [`SourceContext`], the expensive per-symbol resource the pool tracks
///   (a browser context, an HTTP client, a socket)
/// - a [`SourceSession`], the symbol-bound view opened inside a context
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Allocate a fresh context for `symbol`
    async fn provision(&self, symbol: &Symbol) -> SourceResult<Arc<dyn SourceContext>>;

    /// Open the symbol inside an existing context
    ///
    /// Fails with `Acquisition` or `InvalidSymbol`.
    async fn open(
        &self,
        symbol: &Symbol,
        context: Arc<dyn SourceContext>,
    ) -> SourceResult<Box<dyn SourceSession>>;

    /// Get the source's name for logging
    fn name(&self) -> &str {
        "PriceSource"
    }
}

/// Pooled resource backing one or more sessions
#[async_trait]
pub trait SourceContext: Send + Sync {
    /// Whether the context can still open and serve sessions
    fn is_usable(&self) -> bool;

    /// Lets a source recover its own concrete context type in `open`
    fn as_any(&self) -> &dyn Any;

    /// Tear the context down. Must be safe to call more than once.
    async fn close(&self);
}

/// Symbol-bound session used by a reader's polling loop
#[async_trait]
pub trait SourceSession: Send + Sync {
    /// Pull a fresh document from the source before probing
    async fn refresh(&self) -> SourceResult<()> {
        Ok(())
    }

    /// Structured lookup: the raw text found at `locator`, if any
    async fn probe(&self, locator: &str) -> SourceResult<Option<String>>;

    /// Unstructured view of the current document, one entry per text node
    async fn text_fragments(&self) -> SourceResult<Vec<String>>;

    /// Whether the session has been closed, by us or by the source
    fn is_closed(&self) -> bool;

    /// Close the session. Must be safe to call more than once.
    async fn close(&self);
}
