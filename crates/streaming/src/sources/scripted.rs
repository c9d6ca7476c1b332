//! Deterministic in-memory source
//!
//! Each symbol plays back a fixed script. `refresh` advances one step and
//! holds on the last one, so a script of `["1", "1", "2"]` yields two
//! distinct prices no matter how long the reader keeps polling.
//! Unknown symbols open fine but never expose a price.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use ticker_core::Symbol;
use ticker_ports::{PriceSource, SourceContext, SourceError, SourceResult, SourceSession};

/// The only locator a scripted session answers
pub const SCRIPTED_LOCATOR: &str = "/price";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptStep {
    /// Structured price text at [`SCRIPTED_LOCATOR`]
    Quote(String),
    /// Free text only reachable through the fallback scan
    Text(String),
    /// Nothing readable
    Blank,
    /// The refresh leading into this step fails transiently
    Transient,
    /// The refresh leading into this step reports the source gone
    Unavailable,
}

#[derive(Default)]
struct Counters {
    provisioned: AtomicUsize,
    contexts_closed: AtomicUsize,
    sessions_open: AtomicUsize,
    sessions_closed: AtomicUsize,
    opened: Mutex<HashMap<Symbol, usize>>,
}

#[derive(Default)]
pub struct ScriptedSource {
    scripts: HashMap<Symbol, Arc<Vec<ScriptStep>>>,
    rejected: HashSet<Symbol>,
    failing_provision: HashSet<Symbol>,
    provision_delay: Option<Duration>,
    close_stall: Option<Duration>,
    contexts: Mutex<Vec<(Symbol, Arc<ScriptedContext>)>>,
    counters: Arc<Counters>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quotes(self, symbol: &str, quotes: &[&str]) -> Self {
        let steps = quotes
            .iter()
            .map(|q| ScriptStep::Quote(q.to_string()))
            .collect();
        self.with_script(symbol, steps)
    }

    pub fn with_script(mut self, symbol: &str, steps: Vec<ScriptStep>) -> Self {
        if let Ok(symbol) = Symbol::new(symbol) {
            self.scripts.insert(symbol, Arc::new(steps));
        }
        self
    }

    /// `open` fails with `InvalidSymbol` for this symbol
    pub fn rejecting(mut self, symbol: &str) -> Self {
        if let Ok(symbol) = Symbol::new(symbol) {
            self.rejected.insert(symbol);
        }
        self
    }

    /// `provision` fails with `Acquisition` for this symbol
    pub fn failing_provision(mut self, symbol: &str) -> Self {
        if let Ok(symbol) = Symbol::new(symbol) {
            self.failing_provision.insert(symbol);
        }
        self
    }

    pub fn with_provision_delay(mut self, delay: Duration) -> Self {
        self.provision_delay = Some(delay);
        self
    }

    /// The first `close` of every session hangs for `stall` before completing
    pub fn with_close_stall(mut self, stall: Duration) -> Self {
        self.close_stall = Some(stall);
        self
    }

    pub fn provisions(&self) -> usize {
        self.counters.provisioned.load(Ordering::SeqCst)
    }

    pub fn contexts_closed(&self) -> usize {
        self.counters.contexts_closed.load(Ordering::SeqCst)
    }

    pub fn opens_for(&self, symbol: &str) -> usize {
        Symbol::new(symbol)
            .ok()
            .and_then(|s| self.counters.opened.lock().get(&s).copied())
            .unwrap_or(0)
    }

    /// Sessions opened and not yet closed
    pub fn live_sessions(&self) -> usize {
        self.counters.sessions_open.load(Ordering::SeqCst)
            - self.counters.sessions_closed.load(Ordering::SeqCst)
    }

    /// Mark every context handed out for `symbol` as dead
    pub fn invalidate_contexts(&self, symbol: &str) {
        let Ok(symbol) = Symbol::new(symbol) else {
            return;
        };
        for (owner, context) in self.contexts.lock().iter() {
            if *owner == symbol {
                context.usable.store(false, Ordering::SeqCst);
            }
        }
    }
}

#[async_trait]
impl PriceSource for ScriptedSource {
    async fn provision(&self, symbol: &Symbol) -> SourceResult<Arc<dyn SourceContext>> {
        if let Some(delay) = self.provision_delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing_provision.contains(symbol) {
            return Err(SourceError::Acquisition(format!(
                "no capacity left for {symbol}"
            )));
        }
        self.counters.provisioned.fetch_add(1, Ordering::SeqCst);

        let context = Arc::new(ScriptedContext {
            usable: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            counters: Arc::clone(&self.counters),
        });
        self.contexts
            .lock()
            .push((symbol.clone(), Arc::clone(&context)));
        Ok(context)
    }

    async fn open(
        &self,
        symbol: &Symbol,
        context: Arc<dyn SourceContext>,
    ) -> SourceResult<Box<dyn SourceSession>> {
        if !context.is_usable() {
            return Err(SourceError::Acquisition("context already closed".into()));
        }
        if self.rejected.contains(symbol) {
            return Err(SourceError::InvalidSymbol(format!("{symbol} is not listed")));
        }
        *self
            .counters
            .opened
            .lock()
            .entry(symbol.clone())
            .or_insert(0) += 1;
        self.counters.sessions_open.fetch_add(1, Ordering::SeqCst);

        let steps = self.scripts.get(symbol).cloned().unwrap_or_default();
        Ok(Box::new(ScriptedSession {
            steps,
            cursor: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            close_calls: AtomicUsize::new(0),
            close_stall: self.close_stall,
            context,
            counters: Arc::clone(&self.counters),
        }))
    }

    fn name(&self) -> &str {
        "ScriptedSource"
    }
}

pub struct ScriptedContext {
    usable: AtomicBool,
    closed: AtomicBool,
    counters: Arc<Counters>,
}

#[async_trait]
impl SourceContext for ScriptedContext {
    fn is_usable(&self) -> bool {
        self.usable.load(Ordering::SeqCst) && !self.closed.load(Ordering::SeqCst)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.counters.contexts_closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

struct ScriptedSession {
    steps: Arc<Vec<ScriptStep>>,
    cursor: AtomicUsize,
    closed: AtomicBool,
    close_calls: AtomicUsize,
    close_stall: Option<Duration>,
    context: Arc<dyn SourceContext>,
    counters: Arc<Counters>,
}

impl ScriptedSession {
    fn current(&self) -> Option<&ScriptStep> {
        self.steps.get(self.cursor.load(Ordering::SeqCst))
    }

    fn ensure_open(&self) -> SourceResult<()> {
        if self.is_closed() {
            return Err(SourceError::Unavailable("session closed".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl SourceSession for ScriptedSession {
    async fn refresh(&self) -> SourceResult<()> {
        self.ensure_open()?;
        let last = self.steps.len().saturating_sub(1);
        let next = (self.cursor.load(Ordering::SeqCst) + 1).min(last);
        self.cursor.store(next, Ordering::SeqCst);

        match self.current() {
            Some(ScriptStep::Transient) => Err(SourceError::Transient("scripted hiccup".into())),
            Some(ScriptStep::Unavailable) => {
                Err(SourceError::Unavailable("scripted outage".into()))
            }
            _ => Ok(()),
        }
    }

    async fn probe(&self, locator: &str) -> SourceResult<Option<String>> {
        self.ensure_open()?;
        if locator != SCRIPTED_LOCATOR {
            return Ok(None);
        }
        Ok(match self.current() {
            Some(ScriptStep::Quote(text)) => Some(text.clone()),
            _ => None,
        })
    }

    async fn text_fragments(&self) -> SourceResult<Vec<String>> {
        self.ensure_open()?;
        Ok(match self.current() {
            Some(ScriptStep::Text(text)) => vec![text.clone()],
            _ => Vec::new(),
        })
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || !self.context.is_usable()
    }

    async fn close(&self) {
        if self.close_calls.fetch_add(1, Ordering::SeqCst) == 0
            && let Some(stall) = self.close_stall
        {
            tokio::time::sleep(stall).await;
        }
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.counters.sessions_closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}
