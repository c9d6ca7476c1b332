//! Subscription Registry
//!
//! Maps symbols to their actors and subscribers to the symbol they stream.
//!
//! ```text
//!  subscribe(S, X) ──► directory[S] ──► SymbolActor(S) mailbox
//!                          │ missing or retiring
//!                          └──► spawn a fresh actor and retry
//! ```
//!
//! A subscriber is bound to at most one symbol. Subscribing it to another
//! symbol first detaches it from the old one.
//!
//! Every accepted subscribe is issued a fresh [`Ticket`]. Teardown that comes
//! from a stream (drop, disconnect, end of queue) names its ticket, so a
//! stream that finishes late never detaches a newer subscription reusing the
//! same subscriber id.

mod actor;
mod command;

pub use command::{SubscribeOutcome, Subscription, SymbolSnapshot, Ticket};
pub(crate) use command::Outlet;

use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use ticker_core::{PriceSample, SubscriberId, Symbol};
use tokio::sync::{mpsc, oneshot};

use crate::error::StreamError;
use crate::pool::ResourcePool;
use crate::reader::ReaderDeps;
use actor::SymbolActor;
use command::{SubscribeReply, SymbolCommand};

/// Directory entry for a live symbol actor
#[derive(Clone)]
pub(crate) struct SymbolHandle {
    actor_id: u64,
    sender: mpsc::UnboundedSender<SymbolCommand>,
}

/// The symbol a subscriber streams and the subscription doing it
#[derive(Debug, Clone)]
struct Binding {
    symbol: Symbol,
    ticket: Ticket,
}

/// Point-in-time counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStats {
    pub subscribers: usize,
    pub active_symbols: usize,
    pub active_readers: usize,
    pub readers_started: u64,
    pub pooled_resources: usize,
    pub pool_capacity: usize,
    pub symbols: Vec<String>,
}

pub struct SubscriptionRegistry {
    directory: Arc<DashMap<Symbol, SymbolHandle>>,
    bindings: DashMap<SubscriberId, Binding>,
    deps: ReaderDeps,
    cleanup_grace: Duration,
    next_actor: AtomicU64,
    next_ticket: AtomicU64,
    closed: AtomicBool,
}

impl SubscriptionRegistry {
    pub fn new(deps: ReaderDeps, cleanup_grace: Duration) -> Self {
        Self {
            directory: Arc::new(DashMap::new()),
            bindings: DashMap::new(),
            deps,
            cleanup_grace,
            next_actor: AtomicU64::new(1),
            next_ticket: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    pub fn pool(&self) -> &Arc<ResourcePool> {
        &self.deps.pool
    }

    /// Attach `subscriber` to `symbol`, delivering through `outlet`
    ///
    /// Starts a reader if the symbol has none. A cached price, if any, is
    /// sent to `outlet` before this returns. A subscriber whose previous
    /// stream was dropped without unsubscribing is attached afresh.
    pub(crate) async fn subscribe(
        &self,
        symbol: &Symbol,
        subscriber: &SubscriberId,
        outlet: Outlet,
    ) -> Result<Subscription, StreamError> {
        if self.is_closed() {
            return Err(StreamError::ShuttingDown);
        }

        let previous = self.bindings.get(subscriber).map(|b| b.value().clone());
        if let Some(previous) = previous
            && previous.symbol != *symbol
        {
            tracing::info!(%subscriber, from = %previous.symbol, to = %symbol, "Moving subscriber");
            self.unsubscribe_from(subscriber, &previous.symbol, previous.ticket)
                .await;
        }

        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let outcome = loop {
            let handle = self.handle_for(symbol);
            let (response, reply) = oneshot::channel();
            let command = SymbolCommand::Subscribe {
                subscriber: subscriber.clone(),
                ticket,
                outlet: outlet.clone(),
                response,
            };
            if handle.sender.send(command).is_err() {
                self.forget(symbol, &handle);
                continue;
            }

            match reply.await {
                Ok(SubscribeReply::Added { cache_hit: true }) => break SubscribeOutcome::CacheHit,
                Ok(SubscribeReply::Added { cache_hit: false }) => break SubscribeOutcome::Joined,
                Ok(SubscribeReply::AlreadySubscribed) => {
                    return Ok(Subscription {
                        outcome: SubscribeOutcome::AlreadySubscribed,
                        ticket,
                    });
                }
                Ok(SubscribeReply::Retry) => {
                    tracing::debug!(%symbol, %subscriber, "Symbol was retiring, retrying");
                    tokio::task::yield_now().await;
                }
                Err(_) => self.forget(symbol, &handle),
            }
        };

        self.bindings.insert(
            subscriber.clone(),
            Binding {
                symbol: symbol.clone(),
                ticket,
            },
        );
        Ok(Subscription { outcome, ticket })
    }

    /// Detach `subscriber` from whatever symbol it streams
    pub async fn unsubscribe(&self, subscriber: &SubscriberId) -> bool {
        let Some((_, binding)) = self.bindings.remove(subscriber) else {
            return false;
        };
        self.detach(&binding.symbol, subscriber, binding.ticket).await
    }

    /// Detach the subscription `ticket` of `subscriber` on `symbol` only
    ///
    /// A newer subscription under the same id, on any symbol, is left alone.
    pub async fn unsubscribe_from(
        &self,
        subscriber: &SubscriberId,
        symbol: &Symbol,
        ticket: Ticket,
    ) -> bool {
        let unbound = self
            .bindings
            .remove_if(subscriber, |_, bound| {
                bound.symbol == *symbol && bound.ticket == ticket
            })
            .is_some();
        let detached = self.detach(symbol, subscriber, ticket).await;
        unbound || detached
    }

    /// Symbol currently bound to `subscriber`
    pub fn binding(&self, subscriber: &SubscriberId) -> Option<Symbol> {
        self.bindings.get(subscriber).map(|b| b.value().symbol.clone())
    }

    pub fn is_active(&self, symbol: &Symbol) -> bool {
        self.directory.contains_key(symbol)
    }

    /// Ask the symbol's actor for its state
    pub async fn snapshot(&self, symbol: &Symbol) -> Option<SymbolSnapshot> {
        let handle = self.directory.get(symbol).map(|h| h.value().clone())?;
        let (response, reply) = oneshot::channel();
        handle
            .sender
            .send(SymbolCommand::Snapshot { response })
            .ok()?;
        reply.await.ok()
    }

    /// Cached last price for `symbol`, if a reader has produced one
    pub async fn cached_sample(&self, symbol: &Symbol) -> Option<PriceSample> {
        self.snapshot(symbol).await.and_then(|s| s.last_sample)
    }

    pub fn stats(&self) -> RegistryStats {
        let mut symbols: Vec<String> = self
            .directory
            .iter()
            .map(|entry| entry.key().to_string())
            .collect();
        symbols.sort();

        RegistryStats {
            subscribers: self.bindings.len(),
            active_symbols: symbols.len(),
            active_readers: self.deps.metrics.active(),
            readers_started: self.deps.metrics.started(),
            pooled_resources: self.deps.pool.len(),
            pool_capacity: self.deps.pool.capacity(),
            symbols,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stop every reader, end every stream, close every pooled context
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let handles: Vec<SymbolHandle> = self
            .directory
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        tracing::info!(symbols = handles.len(), "Shutting down subscription registry");

        for handle in handles {
            let (response, reply) = oneshot::channel();
            if handle
                .sender
                .send(SymbolCommand::Shutdown { response })
                .is_ok()
            {
                let _ = reply.await;
            }
        }

        self.bindings.clear();
        self.deps.pool.shutdown().await;
        tracing::info!("Subscription registry shutdown complete");
    }

    async fn detach(&self, symbol: &Symbol, subscriber: &SubscriberId, ticket: Ticket) -> bool {
        let Some(handle) = self.directory.get(symbol).map(|h| h.value().clone()) else {
            return false;
        };
        let (response, reply) = oneshot::channel();
        let command = SymbolCommand::Unsubscribe {
            subscriber: subscriber.clone(),
            ticket,
            response,
        };
        if handle.sender.send(command).is_err() {
            return false;
        }
        reply.await.unwrap_or(false)
    }

    fn handle_for(&self, symbol: &Symbol) -> SymbolHandle {
        self.directory
            .entry(symbol.clone())
            .or_insert_with(|| {
                let id = self.next_actor.fetch_add(1, Ordering::Relaxed);
                SymbolActor::spawn(
                    id,
                    symbol.clone(),
                    Arc::clone(&self.directory),
                    self.deps.clone(),
                    self.cleanup_grace,
                )
            })
            .value()
            .clone()
    }

    /// Drop a directory entry whose actor is gone
    fn forget(&self, symbol: &Symbol, handle: &SymbolHandle) {
        self.directory
            .remove_if(symbol, |_, listed| listed.actor_id == handle.actor_id);
    }
}
