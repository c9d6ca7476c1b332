//! Per-subscriber delivery
//!
//! Each subscriber gets its own unbounded queue fed by the symbol actor, so
//! a slow consumer never delays the reader or other subscribers. A
//! [`PriceStream`] is the consuming end: it yields samples until the
//! subscriber disconnects, unsubscribes, or the symbol terminates. On any of
//! those it unsubscribes exactly once.

use futures_util::Stream;
use std::sync::Arc;
use ticker_core::{PriceSample, SubscriberId, Symbol};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::StreamError;
use crate::registry::{SubscriptionRegistry, Ticket};

/// What a symbol actor pushes into a subscriber queue
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Sample(PriceSample),
    /// Terminal: the symbol was torn down because of `StreamError`
    Closed(StreamError),
}

pub struct PriceStream {
    symbol: Symbol,
    subscriber: SubscriberId,
    ticket: Ticket,
    inbox: mpsc::UnboundedReceiver<Delivery>,
    disconnect: CancellationToken,
    registry: Arc<SubscriptionRegistry>,
    finalized: bool,
}

impl PriceStream {
    pub(crate) fn new(
        symbol: Symbol,
        subscriber: SubscriberId,
        ticket: Ticket,
        inbox: mpsc::UnboundedReceiver<Delivery>,
        registry: Arc<SubscriptionRegistry>,
    ) -> Self {
        Self {
            symbol,
            subscriber,
            ticket,
            inbox,
            disconnect: CancellationToken::new(),
            registry,
            finalized: false,
        }
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn subscriber(&self) -> &SubscriberId {
        &self.subscriber
    }

    pub fn ticket(&self) -> Ticket {
        self.ticket
    }

    /// Token that ends this stream when cancelled, e.g. on socket close
    pub fn disconnect_handle(&self) -> CancellationToken {
        self.disconnect.clone()
    }

    /// Next sample, or the terminal error, or `None` once the stream is over
    ///
    /// A disconnect wins over queued samples.
    pub async fn next(&mut self) -> Option<Result<PriceSample, StreamError>> {
        if self.finalized {
            return None;
        }

        let delivery = tokio::select! {
            biased;
            _ = self.disconnect.cancelled() => None,
            delivery = self.inbox.recv() => delivery,
        };

        match delivery {
            Some(Delivery::Sample(sample)) => Some(Ok(sample)),
            Some(Delivery::Closed(err)) => {
                self.finalize().await;
                Some(Err(err))
            }
            None => {
                self.finalize().await;
                None
            }
        }
    }

    /// Unsubscribe and end the stream
    pub async fn close(mut self) {
        self.finalize().await;
    }

    /// Adapt into a `futures` stream
    pub fn into_stream(self) -> impl Stream<Item = Result<PriceSample, StreamError>> + Send {
        futures_util::stream::unfold(self, |mut stream| async move {
            let item = stream.next().await?;
            Some((item, stream))
        })
    }

    async fn finalize(&mut self) {
        if self.finalized {
            return;
        }
        self.finalized = true;
        self.inbox.close();
        self.registry
            .unsubscribe_from(&self.subscriber, &self.symbol, self.ticket)
            .await;
        tracing::debug!(symbol = %self.symbol, subscriber = %self.subscriber, "Stream finalized");
    }
}

impl Drop for PriceStream {
    fn drop(&mut self) {
        if self.finalized {
            return;
        }
        self.finalized = true;
        let registry = Arc::clone(&self.registry);
        let subscriber = self.subscriber.clone();
        let symbol = self.symbol.clone();
        let ticket = self.ticket;
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                registry.unsubscribe_from(&subscriber, &symbol, ticket).await;
            });
        }
    }
}

impl std::fmt::Debug for PriceStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriceStream")
            .field("symbol", &self.symbol)
            .field("subscriber", &self.subscriber)
            .field("ticket", &self.ticket)
            .field("finalized", &self.finalized)
            .finish()
    }
}
