//! Per-symbol price reader
//!
//! ```text
//! Created ──start──► Loading ──validated──► Polling ──stop/unavailable──► Stopped
//!                       │
//!                       └── acquisition / invalid symbol ──► Failed
//! ```
//!
//! The reader runs as its own task. It owns one session opened on a pooled
//! context and reports through a [`ReaderSink`]; it never touches subscriber
//! state directly.

use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use ticker_core::{Price, PriceSample, Symbol};
use ticker_ports::{Clock, PriceSource, SourceError, SourceSession};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::StreamingConfig;
use crate::error::StreamError;
use crate::extract::PriceExtractor;
use crate::pool::{PooledResource, ResourcePool};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReaderState {
    Created,
    Loading,
    Polling,
    Stopped,
    Failed,
}

impl ReaderState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ReaderState::Stopped | ReaderState::Failed)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReaderEvent {
    /// A price that differs from the previous one
    Price(PriceSample),
    /// The reader gave up; no further events follow
    Terminated(StreamError),
}

/// Receiver of reader output. Must not block.
pub trait ReaderSink: Send + Sync + 'static {
    fn emit(&self, event: ReaderEvent);
}

/// Counters shared by every reader of one registry
#[derive(Debug, Default)]
pub struct ReaderMetrics {
    started: AtomicU64,
    active: AtomicUsize,
}

impl ReaderMetrics {
    pub fn started(&self) -> u64 {
        self.started.load(Ordering::Relaxed)
    }

    /// Readers whose task is still running
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }
}

/// Decrements the active count however the task ends, abort included
struct ActiveGuard(Arc<ReaderMetrics>);

impl ActiveGuard {
    fn enter(metrics: &Arc<ReaderMetrics>) -> Self {
        metrics.started.fetch_add(1, Ordering::Relaxed);
        metrics.active.fetch_add(1, Ordering::Relaxed);
        Self(Arc::clone(metrics))
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ReaderTiming {
    pub poll_interval: Duration,
    pub settle_delay: Duration,
    pub validation_timeout: Duration,
    pub validation_attempts: u32,
    pub stop_timeout: Duration,
}

impl From<&StreamingConfig> for ReaderTiming {
    fn from(config: &StreamingConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            settle_delay: config.settle_delay(),
            validation_timeout: config.validation_timeout(),
            validation_attempts: config.validation_attempts,
            stop_timeout: config.stop_timeout(),
        }
    }
}

/// Everything a reader needs besides its symbol and sink
#[derive(Clone)]
pub struct ReaderDeps {
    pub pool: Arc<ResourcePool>,
    pub source: Arc<dyn PriceSource>,
    pub clock: Arc<dyn Clock>,
    pub extractor: Arc<PriceExtractor>,
    pub metrics: Arc<ReaderMetrics>,
    pub timing: ReaderTiming,
}

/// What the task currently holds, so an aborted task can still be cleaned up
#[derive(Default)]
struct Holdings {
    lease: Option<PooledResource>,
    session: Option<Arc<dyn SourceSession>>,
}

pub struct PriceReader {
    symbol: Symbol,
    deps: ReaderDeps,
    state: Arc<RwLock<ReaderState>>,
    holdings: Arc<Mutex<Holdings>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl PriceReader {
    pub fn new(symbol: Symbol, deps: ReaderDeps) -> Self {
        Self {
            symbol,
            deps,
            state: Arc::new(RwLock::new(ReaderState::Created)),
            holdings: Arc::new(Mutex::new(Holdings::default())),
            cancel: CancellationToken::new(),
            task: None,
        }
    }

    /// Spawn the reader task. Only the first call has any effect.
    pub fn start(&mut self, sink: Arc<dyn ReaderSink>) {
        {
            let mut state = self.state.write();
            if *state != ReaderState::Created {
                return;
            }
            *state = ReaderState::Loading;
        }

        let task = ReaderTask {
            symbol: self.symbol.clone(),
            deps: self.deps.clone(),
            sink,
            state: Arc::clone(&self.state),
            holdings: Arc::clone(&self.holdings),
            cancel: self.cancel.clone(),
        };
        self.task = Some(tokio::spawn(task.run()));
        tracing::debug!(symbol = %self.symbol, "Reader started");
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn state(&self) -> ReaderState {
        *self.state.read()
    }

    /// Cancel the task and wait for it to release its resources
    ///
    /// Safe to call repeatedly. If the task does not finish within the stop
    /// timeout it is aborted, and whatever session and lease it still held
    /// are closed here instead.
    pub async fn stop(&mut self) {
        self.cancel.cancel();

        let Some(mut task) = self.task.take() else {
            let mut state = self.state.write();
            if *state == ReaderState::Created {
                *state = ReaderState::Stopped;
            }
            return;
        };

        if tokio::time::timeout(self.deps.timing.stop_timeout, &mut task)
            .await
            .is_err()
        {
            tracing::warn!(symbol = %self.symbol, "Reader did not stop in time, aborting");
            task.abort();
            let held = std::mem::take(&mut *self.holdings.lock());
            if let Some(session) = held.session {
                let timeout = self.deps.timing.stop_timeout;
                if tokio::time::timeout(timeout, session.close()).await.is_err() {
                    tracing::warn!(symbol = %self.symbol, "Session close timed out after abort");
                }
            }
            if let Some(lease) = held.lease {
                self.deps.pool.release_lease(&lease).await;
            }
            *self.state.write() = ReaderState::Stopped;
        }
        tracing::debug!(symbol = %self.symbol, state = ?self.state(), "Reader stopped");
    }
}

impl Drop for PriceReader {
    fn drop(&mut self) {
        // The task cleans up after itself once cancelled
        self.cancel.cancel();
    }
}

struct ReaderTask {
    symbol: Symbol,
    deps: ReaderDeps,
    sink: Arc<dyn ReaderSink>,
    state: Arc<RwLock<ReaderState>>,
    holdings: Arc<Mutex<Holdings>>,
    cancel: CancellationToken,
}

/// How the polling loop ended
enum PollExit {
    Cancelled,
    Terminated(StreamError),
}

impl ReaderTask {
    async fn run(self) {
        let _active = ActiveGuard::enter(&self.deps.metrics);

        let lease = match self.until_cancelled(self.deps.pool.acquire(&self.symbol)).await {
            None => return self.set_state(ReaderState::Stopped),
            Some(Err(err)) => return self.fail(err),
            Some(Ok(lease)) => lease,
        };
        self.holdings.lock().lease = Some(lease.clone());

        let session = match self
            .until_cancelled(self.deps.source.open(&self.symbol, lease.context()))
            .await
        {
            None => {
                self.release(&lease).await;
                return self.set_state(ReaderState::Stopped);
            }
            Some(Err(err)) => {
                self.release(&lease).await;
                return self.fail(StreamError::from_source(&self.symbol, err));
            }
            Some(Ok(session)) => Arc::<dyn SourceSession>::from(session),
        };
        self.holdings.lock().session = Some(Arc::clone(&session));

        let timing = self.deps.timing;
        let validation = self.until_cancelled(self.deps.extractor.validate(
            session.as_ref(),
            timing.validation_attempts,
            timing.validation_timeout,
        ));
        let rejection = match validation.await {
            None => {
                self.finish(session.as_ref(), &lease).await;
                return self.set_state(ReaderState::Stopped);
            }
            Some(Ok(true)) => None,
            Some(Ok(false)) => Some(StreamError::InvalidSymbol {
                symbol: self.symbol.clone(),
                reason: format!(
                    "no price signal after {} probes",
                    timing.validation_attempts
                ),
            }),
            Some(Err(err)) => Some(StreamError::from_source(&self.symbol, err)),
        };
        if let Some(err) = rejection {
            self.finish(session.as_ref(), &lease).await;
            return self.fail(err);
        }

        self.set_state(ReaderState::Polling);
        tracing::info!(symbol = %self.symbol, lease = lease.lease_id(), "Reader polling");

        let exit = self.poll(session.as_ref(), &lease).await;
        self.finish(session.as_ref(), &lease).await;
        self.set_state(ReaderState::Stopped);

        if let PollExit::Terminated(err) = exit {
            tracing::warn!(symbol = %self.symbol, error = %err, "Reader terminated");
            self.sink.emit(ReaderEvent::Terminated(err));
        }
    }

    async fn poll(&self, session: &dyn SourceSession, lease: &PooledResource) -> PollExit {
        let revoked = lease.revoked();
        let mut last: Option<Price> = None;

        // Immediate read so the first subscriber is not kept waiting
        match self.deps.extractor.read_structured(session).await {
            Ok(Some(price)) => {
                self.publish(price);
                last = Some(price);
            }
            Ok(None) => tracing::debug!(symbol = %self.symbol, "No price on first read"),
            Err(SourceError::Unavailable(reason)) => return self.unavailable(reason),
            Err(err) => tracing::debug!(symbol = %self.symbol, error = %err, "First read failed"),
        }

        let mut delay = self.deps.timing.settle_delay;
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return PollExit::Cancelled,
                _ = revoked.cancelled() => return self.unavailable("context evicted".to_string()),
                _ = tokio::time::sleep(delay) => {}
            }
            delay = self.deps.timing.poll_interval;

            if session.is_closed() {
                return self.unavailable("session closed".to_string());
            }

            let read = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return PollExit::Cancelled,
                _ = revoked.cancelled() => return self.unavailable("context evicted".to_string()),
                read = self.tick(session) => read,
            };

            match read {
                Ok(Some(price)) => {
                    self.deps.pool.touch(&self.symbol);
                    if last != Some(price) {
                        self.publish(price);
                        last = Some(price);
                    }
                }
                Ok(None) => {}
                Err(SourceError::Unavailable(reason)) => return self.unavailable(reason),
                Err(err) => {
                    tracing::warn!(symbol = %self.symbol, error = %err, "Price read failed, will retry");
                }
            }
        }
    }

    async fn tick(&self, session: &dyn SourceSession) -> Result<Option<Price>, SourceError> {
        session.refresh().await?;
        self.deps.extractor.read(session).await
    }

    fn publish(&self, price: Price) {
        let sample = PriceSample::new(
            self.symbol.clone(),
            price,
            self.deps.clock.now(),
            self.deps.extractor.range(),
        );
        match sample {
            Some(sample) => {
                tracing::debug!(symbol = %self.symbol, %price, "Price changed");
                self.sink.emit(ReaderEvent::Price(sample));
            }
            None => tracing::debug!(symbol = %self.symbol, %price, "Discarded out-of-range price"),
        }
    }

    fn unavailable(&self, reason: String) -> PollExit {
        PollExit::Terminated(StreamError::SourceUnavailable {
            symbol: self.symbol.clone(),
            reason,
        })
    }

    async fn until_cancelled<F: std::future::Future>(&self, fut: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            out = fut => Some(out),
        }
    }

    async fn finish(&self, session: &dyn SourceSession, lease: &PooledResource) {
        session.close().await;
        self.release(lease).await;
    }

    async fn release(&self, lease: &PooledResource) {
        self.deps.pool.release_lease(lease).await;
        *self.holdings.lock() = Holdings::default();
    }

    fn fail(&self, err: StreamError) {
        tracing::warn!(symbol = %self.symbol, error = %err, "Reader failed");
        self.set_state(ReaderState::Failed);
        self.sink.emit(ReaderEvent::Terminated(err));
    }

    fn set_state(&self, state: ReaderState) {
        *self.state.write() = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::{ScriptStep, ScriptedSource};
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;
    use ticker_clock::ManualClock;
    use ticker_core::PriceRange;

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<ReaderEvent>>,
    }

    impl ReaderSink for RecordingSink {
        fn emit(&self, event: ReaderEvent) {
            self.events.lock().push(event);
        }
    }

    impl RecordingSink {
        fn prices(&self) -> Vec<Price> {
            self.events
                .lock()
                .iter()
                .filter_map(|e| match e {
                    ReaderEvent::Price(s) => Some(s.price),
                    ReaderEvent::Terminated(_) => None,
                })
                .collect()
        }

        fn terminal(&self) -> Option<StreamError> {
            self.events.lock().iter().find_map(|e| match e {
                ReaderEvent::Terminated(err) => Some(err.clone()),
                ReaderEvent::Price(_) => None,
            })
        }
    }

    fn deps(source: Arc<ScriptedSource>, capacity: usize) -> ReaderDeps {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::starting_now());
        let pool = Arc::new(ResourcePool::new(source.clone(), clock.clone(), capacity));
        ReaderDeps {
            pool,
            source,
            clock,
            extractor: Arc::new(PriceExtractor::new(
                vec!["/price".to_string()],
                PriceRange::default(),
            )),
            metrics: Arc::new(ReaderMetrics::default()),
            timing: ReaderTiming {
                poll_interval: Duration::from_millis(100),
                settle_delay: Duration::from_millis(50),
                validation_timeout: Duration::from_millis(500),
                validation_attempts: 5,
                stop_timeout: Duration::from_secs(1),
            },
        }
    }

    fn sym(s: &str) -> Symbol {
        Symbol::new(s).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_emits_only_on_change() {
        let source = Arc::new(ScriptedSource::new().with_quotes(
            "BTCUSD",
            &["61234.5", "61234.5", "61300.0", "61300.0"],
        ));
        let deps = deps(Arc::clone(&source), 4);
        let sink = Arc::new(RecordingSink::default());
        let mut reader = PriceReader::new(sym("BTCUSD"), deps.clone());

        reader.start(sink.clone());
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(reader.state(), ReaderState::Polling);
        assert_eq!(sink.prices(), vec![dec!(61234.5), dec!(61300.0)]);
        assert_eq!(deps.metrics.active(), 1);

        reader.stop().await;
        assert_eq!(reader.state(), ReaderState::Stopped);
        assert_eq!(deps.metrics.active(), 0);
        assert!(deps.pool.is_empty());
        assert_eq!(source.live_sessions(), 0);
        assert_eq!(source.contexts_closed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_symbol_fails() {
        let source = Arc::new(ScriptedSource::new());
        let deps = deps(Arc::clone(&source), 4);
        let sink = Arc::new(RecordingSink::default());
        let mut reader = PriceReader::new(sym("NOPE"), deps.clone());

        reader.start(sink.clone());
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(reader.state(), ReaderState::Failed);
        assert!(matches!(sink.terminal(), Some(StreamError::InvalidSymbol { .. })));
        assert!(sink.prices().is_empty());
        assert!(deps.pool.is_empty());
        assert_eq!(source.live_sessions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_open_fails() {
        let source = Arc::new(ScriptedSource::new().rejecting("DELISTED"));
        let deps = deps(Arc::clone(&source), 4);
        let sink = Arc::new(RecordingSink::default());
        let mut reader = PriceReader::new(sym("DELISTED"), deps.clone());

        reader.start(sink.clone());
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(reader.state(), ReaderState::Failed);
        assert!(matches!(sink.terminal(), Some(StreamError::InvalidSymbol { .. })));
        assert!(deps.pool.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquisition_failure() {
        let source = Arc::new(ScriptedSource::new().failing_provision("BTCUSD"));
        let deps = deps(source, 4);
        let sink = Arc::new(RecordingSink::default());
        let mut reader = PriceReader::new(sym("BTCUSD"), deps);

        reader.start(sink.clone());
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(reader.state(), ReaderState::Failed);
        assert!(matches!(sink.terminal(), Some(StreamError::Acquisition { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_keep_polling() {
        let source = Arc::new(ScriptedSource::new().with_script(
            "ETHUSD",
            vec![
                ScriptStep::Quote("3000".into()),
                ScriptStep::Transient,
                ScriptStep::Quote("3001".into()),
            ],
        ));
        let deps = deps(source, 4);
        let sink = Arc::new(RecordingSink::default());
        let mut reader = PriceReader::new(sym("ETHUSD"), deps);

        reader.start(sink.clone());
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(reader.state(), ReaderState::Polling);
        assert_eq!(sink.prices(), vec![dec!(3000), dec!(3001)]);
        reader.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unavailable_source_terminates() {
        let source = Arc::new(ScriptedSource::new().with_script(
            "SOLUSD",
            vec![ScriptStep::Quote("150".into()), ScriptStep::Unavailable],
        ));
        let deps = deps(Arc::clone(&source), 4);
        let sink = Arc::new(RecordingSink::default());
        let mut reader = PriceReader::new(sym("SOLUSD"), deps.clone());

        reader.start(sink.clone());
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(reader.state(), ReaderState::Stopped);
        assert_eq!(sink.prices(), vec![dec!(150)]);
        assert!(matches!(
            sink.terminal(),
            Some(StreamError::SourceUnavailable { .. })
        ));
        assert!(deps.pool.is_empty());
        assert_eq!(source.live_sessions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_eviction_terminates_reader() {
        let source = Arc::new(
            ScriptedSource::new()
                .with_quotes("AAA", &["1.5"])
                .with_quotes("BBB", &["2.5"]),
        );
        let deps = deps(Arc::clone(&source), 1);
        let sink = Arc::new(RecordingSink::default());
        let mut reader = PriceReader::new(sym("AAA"), deps.clone());

        reader.start(sink.clone());
        tokio::time::sleep(Duration::from_millis(200)).await;
        deps.pool.acquire(&sym("BBB")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(reader.state(), ReaderState::Stopped);
        assert!(matches!(
            sink.terminal(),
            Some(StreamError::SourceUnavailable { .. })
        ));
        assert!(deps.pool.contains(&sym("BBB")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_stop_aborts_and_releases_only_its_lease() {
        let source = Arc::new(
            ScriptedSource::new()
                .with_quotes("AAA", &["1.5"])
                .with_close_stall(Duration::from_secs(30)),
        );
        let deps = deps(Arc::clone(&source), 4);
        let sink = Arc::new(RecordingSink::default());
        let mut reader = PriceReader::new(sym("AAA"), deps.clone());

        reader.start(sink.clone());
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(reader.state(), ReaderState::Polling);

        // While the reader is stuck closing its session, the pool replaces
        // the symbol's context with a fresh one
        let replace = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            source.invalidate_contexts("AAA");
            deps.pool.acquire(&sym("AAA")).await.unwrap()
        };
        let started = tokio::time::Instant::now();
        let ((), fresh) = tokio::join!(reader.stop(), replace);

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(reader.state(), ReaderState::Stopped);
        assert_eq!(source.live_sessions(), 0);
        assert!(deps.pool.contains(&sym("AAA")));
        assert!(!fresh.is_revoked());

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(deps.metrics.active(), 0);
    }

    #[tokio::test]
    async fn test_stop_before_start() {
        let source = Arc::new(ScriptedSource::new());
        let mut reader = PriceReader::new(sym("BTCUSD"), deps(source, 4));

        reader.stop().await;
        reader.stop().await;
        assert_eq!(reader.state(), ReaderState::Stopped);
    }
}
