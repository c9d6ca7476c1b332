//! Symbol actor
//!
//! Sole owner of one symbol's state. Subscribe, unsubscribe and reader output
//! are all serialized through its mailbox, so readers start at most once per
//! symbol and teardown never interleaves with a new subscriber.
//!
//! Retirement order:
//! 1. stop the reader and drop the cached sample
//! 2. remove this actor from the directory (only if it is still the one listed)
//! 3. close the mailbox and answer whatever is left with `Retry`

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use ticker_core::{PriceSample, SubscriberId, Symbol};
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::SymbolHandle;
use super::command::{Outlet, SubscribeReply, SymbolCommand, SymbolSnapshot, Ticket};
use crate::error::StreamError;
use crate::multiplexer::Delivery;
use crate::reader::{PriceReader, ReaderDeps, ReaderEvent, ReaderSink};

/// Forwards reader output into the owning actor's mailbox
struct MailboxSink {
    epoch: u64,
    mailbox: mpsc::WeakUnboundedSender<SymbolCommand>,
}

impl ReaderSink for MailboxSink {
    fn emit(&self, event: ReaderEvent) {
        if let Some(mailbox) = self.mailbox.upgrade() {
            let _ = mailbox.send(SymbolCommand::Reader {
                epoch: self.epoch,
                event,
            });
        }
    }
}

/// One attached subscription
struct Attached {
    ticket: Ticket,
    outlet: Outlet,
}

#[derive(Default)]
struct SymbolState {
    reader: Option<PriceReader>,
    subscribers: HashMap<SubscriberId, Attached>,
    last_sample: Option<PriceSample>,
    cleanup_at: Option<Instant>,
    epoch: u64,
}

enum Flow {
    Continue,
    /// Tear down, then retire
    Retire,
    /// Already torn down and unlisted
    Exit,
}

pub(crate) struct SymbolActor {
    id: u64,
    symbol: Symbol,
    receiver: mpsc::UnboundedReceiver<SymbolCommand>,
    mailbox: mpsc::WeakUnboundedSender<SymbolCommand>,
    directory: Arc<DashMap<Symbol, SymbolHandle>>,
    deps: ReaderDeps,
    cleanup_grace: Duration,
    state: SymbolState,
}

impl SymbolActor {
    /// Spawn the actor task and return the handle to list in the directory
    pub(crate) fn spawn(
        id: u64,
        symbol: Symbol,
        directory: Arc<DashMap<Symbol, SymbolHandle>>,
        deps: ReaderDeps,
        cleanup_grace: Duration,
    ) -> SymbolHandle {
        let (sender, receiver) = mpsc::unbounded_channel();
        let actor = SymbolActor {
            id,
            symbol,
            receiver,
            mailbox: sender.downgrade(),
            directory,
            deps,
            cleanup_grace,
            state: SymbolState::default(),
        };
        tokio::spawn(actor.run());
        SymbolHandle { actor_id: id, sender }
    }

    async fn run(mut self) {
        tracing::debug!(symbol = %self.symbol, actor = self.id, "Symbol actor started");

        loop {
            let cleanup_at = self.state.cleanup_at;
            let command = tokio::select! {
                command = self.receiver.recv() => command,
                _ = sleep_until(cleanup_at), if cleanup_at.is_some() => {
                    tracing::info!(symbol = %self.symbol, "Cleanup grace elapsed");
                    self.teardown().await;
                    break;
                }
            };

            let Some(command) = command else {
                // Every handle dropped: nobody can reach us anymore
                self.teardown().await;
                break;
            };

            match self.process_command(command).await {
                Flow::Continue => {}
                Flow::Retire => {
                    self.teardown().await;
                    break;
                }
                Flow::Exit => break,
            }
        }

        self.retire().await;
        tracing::debug!(symbol = %self.symbol, actor = self.id, "Symbol actor finished");
    }

    async fn process_command(&mut self, command: SymbolCommand) -> Flow {
        match command {
            SymbolCommand::Subscribe {
                subscriber,
                ticket,
                outlet,
                response,
            } => {
                let reply = self.subscribe(subscriber, ticket, outlet);
                let _ = response.send(reply);
                Flow::Continue
            }
            SymbolCommand::Unsubscribe {
                subscriber,
                ticket,
                response,
            } => {
                // A stale ticket belongs to an earlier subscription under the same id
                let removed = self
                    .state
                    .subscribers
                    .get(&subscriber)
                    .is_some_and(|attached| attached.ticket == ticket)
                    && self.state.subscribers.remove(&subscriber).is_some();
                let _ = response.send(removed);
                if removed {
                    tracing::info!(
                        symbol = %self.symbol,
                        %subscriber,
                        ticket,
                        remaining = self.state.subscribers.len(),
                        "Subscriber left"
                    );
                    self.after_departure()
                } else {
                    Flow::Continue
                }
            }
            SymbolCommand::Reader { epoch, event } => {
                if epoch != self.state.epoch {
                    tracing::trace!(symbol = %self.symbol, epoch, "Dropping event from stale reader");
                    return Flow::Continue;
                }
                match event {
                    ReaderEvent::Price(sample) => self.broadcast(sample),
                    ReaderEvent::Terminated(err) => {
                        self.terminate(err).await;
                        Flow::Exit
                    }
                }
            }
            SymbolCommand::Snapshot { response } => {
                let _ = response.send(self.snapshot());
                Flow::Continue
            }
            SymbolCommand::Shutdown { response } => {
                // Dropping the outlets ends every open stream
                self.state.subscribers.clear();
                self.teardown().await;
                self.unlist();
                let _ = response.send(());
                Flow::Exit
            }
        }
    }

    fn subscribe(
        &mut self,
        subscriber: SubscriberId,
        ticket: Ticket,
        outlet: Outlet,
    ) -> SubscribeReply {
        if let Some(existing) = self.state.subscribers.get(&subscriber) {
            if !existing.outlet.is_closed() {
                return SubscribeReply::AlreadySubscribed;
            }
            // The previous stream was dropped and its unsubscribe has not landed yet
            tracing::debug!(
                symbol = %self.symbol,
                %subscriber,
                replaced = existing.ticket,
                "Replacing subscription with closed queue"
            );
        }

        let cache_hit = match &self.state.last_sample {
            Some(sample) => outlet.send(Delivery::Sample(sample.clone())).is_ok(),
            None => false,
        };
        self.state
            .subscribers
            .insert(subscriber.clone(), Attached { ticket, outlet });

        if self.state.cleanup_at.take().is_some() {
            tracing::info!(symbol = %self.symbol, "Pending cleanup cancelled");
        }
        if self.state.reader.is_none() {
            self.start_reader();
        }

        tracing::info!(
            symbol = %self.symbol,
            %subscriber,
            ticket,
            subscribers = self.state.subscribers.len(),
            cache_hit,
            "Subscriber joined"
        );
        SubscribeReply::Added { cache_hit }
    }

    fn start_reader(&mut self) {
        self.state.epoch += 1;
        let sink = Arc::new(MailboxSink {
            epoch: self.state.epoch,
            mailbox: self.mailbox.clone(),
        });
        let mut reader = PriceReader::new(self.symbol.clone(), self.deps.clone());
        reader.start(sink);
        self.state.reader = Some(reader);
        tracing::info!(symbol = %self.symbol, epoch = self.state.epoch, "Reader launched");
    }

    fn broadcast(&mut self, sample: PriceSample) -> Flow {
        self.state.last_sample = Some(sample.clone());

        let mut gone = Vec::new();
        for (subscriber, attached) in &self.state.subscribers {
            if attached.outlet.send(Delivery::Sample(sample.clone())).is_err() {
                gone.push(subscriber.clone());
            }
        }
        if gone.is_empty() {
            return Flow::Continue;
        }
        for subscriber in gone {
            tracing::debug!(symbol = %self.symbol, %subscriber, "Dropping subscriber with closed queue");
            self.state.subscribers.remove(&subscriber);
        }
        self.after_departure()
    }

    /// Decide what happens once a subscriber is gone
    fn after_departure(&mut self) -> Flow {
        if !self.state.subscribers.is_empty() {
            return Flow::Continue;
        }
        if self.cleanup_grace.is_zero() {
            return Flow::Retire;
        }
        self.state.cleanup_at = Some(Instant::now() + self.cleanup_grace);
        tracing::info!(
            symbol = %self.symbol,
            grace_ms = self.cleanup_grace.as_millis() as u64,
            "Last subscriber left, cleanup scheduled"
        );
        Flow::Continue
    }

    /// Clean up fully, then tell every subscriber why their stream ended
    async fn terminate(&mut self, err: StreamError) {
        tracing::warn!(
            symbol = %self.symbol,
            error = %err,
            subscribers = self.state.subscribers.len(),
            "Stream terminated by reader"
        );
        let outlets: Vec<Outlet> = self
            .state
            .subscribers
            .drain()
            .map(|(_, attached)| attached.outlet)
            .collect();
        self.teardown().await;
        self.unlist();
        for outlet in outlets {
            let _ = outlet.send(Delivery::Closed(err.clone()));
        }
    }

    async fn teardown(&mut self) {
        if let Some(mut reader) = self.state.reader.take() {
            reader.stop().await;
        }
        self.state.last_sample = None;
        self.state.cleanup_at = None;
        tracing::info!(symbol = %self.symbol, "Symbol torn down");
    }

    fn unlist(&self) {
        self.directory
            .remove_if(&self.symbol, |_, handle| handle.actor_id == self.id);
    }

    async fn retire(&mut self) {
        self.unlist();
        self.receiver.close();
        while let Some(command) = self.receiver.recv().await {
            match command {
                SymbolCommand::Subscribe { response, .. } => {
                    let _ = response.send(SubscribeReply::Retry);
                }
                SymbolCommand::Unsubscribe { response, .. } => {
                    let _ = response.send(false);
                }
                SymbolCommand::Snapshot { response } => {
                    let _ = response.send(SymbolSnapshot::empty(self.symbol.clone()));
                }
                SymbolCommand::Shutdown { response } => {
                    let _ = response.send(());
                }
                SymbolCommand::Reader { .. } => {}
            }
        }
    }

    fn snapshot(&self) -> SymbolSnapshot {
        SymbolSnapshot {
            symbol: self.symbol.clone(),
            subscribers: self.state.subscribers.len(),
            reader: self.state.reader.as_ref().map(PriceReader::state),
            last_sample: self.state.last_sample.clone(),
            cleanup_pending: self.state.cleanup_at.is_some(),
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
