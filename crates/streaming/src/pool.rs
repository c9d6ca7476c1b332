//! Bounded pool of per-symbol source contexts
//!
//! At most one context exists per symbol and at most `capacity` in total.
//! When full, the least recently used entry is evicted; ties fall back to
//! insertion order. Evicting an entry cancels its lease token so the reader
//! holding it winds down instead of polling a dead context.
//!
//! Acquisition is single-flight per symbol: concurrent `acquire` calls for
//! the same symbol wait on a per-symbol gate and the later ones reuse the
//! context provisioned by the first.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use ticker_core::{Symbol, Timestamp};
use ticker_ports::{Clock, PriceSource, SourceContext};
use tokio_util::sync::CancellationToken;

use crate::error::StreamError;

/// A context handed out by the pool
#[derive(Clone)]
pub struct PooledResource {
    symbol: Symbol,
    lease_id: u64,
    context: Arc<dyn SourceContext>,
    revoked: CancellationToken,
}

impl PooledResource {
    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn lease_id(&self) -> u64 {
        self.lease_id
    }

    pub fn context(&self) -> Arc<dyn SourceContext> {
        Arc::clone(&self.context)
    }

    /// Cancelled when the pool evicts or shuts down this entry
    pub fn revoked(&self) -> CancellationToken {
        self.revoked.clone()
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked.is_cancelled()
    }
}

struct PoolEntry {
    lease_id: u64,
    context: Arc<dyn SourceContext>,
    last_used_at: Timestamp,
    revoked: CancellationToken,
}

impl PoolEntry {
    fn lease(&self, symbol: &Symbol) -> PooledResource {
        PooledResource {
            symbol: symbol.clone(),
            lease_id: self.lease_id,
            context: Arc::clone(&self.context),
            revoked: self.revoked.clone(),
        }
    }

    fn is_live(&self) -> bool {
        self.context.is_usable() && !self.revoked.is_cancelled()
    }
}

pub struct ResourcePool {
    source: Arc<dyn PriceSource>,
    clock: Arc<dyn Clock>,
    capacity: usize,
    entries: Mutex<HashMap<Symbol, PoolEntry>>,
    gates: DashMap<Symbol, Arc<tokio::sync::Mutex<()>>>,
    next_lease: AtomicU64,
    provisioned: AtomicU64,
    evicted: AtomicU64,
}

impl ResourcePool {
    pub fn new(source: Arc<dyn PriceSource>, clock: Arc<dyn Clock>, capacity: usize) -> Self {
        Self {
            source,
            clock,
            capacity: capacity.max(1),
            entries: Mutex::new(HashMap::new()),
            gates: DashMap::new(),
            next_lease: AtomicU64::new(1),
            provisioned: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
        }
    }

    /// Return the live context for `symbol`, provisioning one if needed
    pub async fn acquire(&self, symbol: &Symbol) -> Result<PooledResource, StreamError> {
        let gate = self.gate(symbol);
        let _guard = gate.lock().await;

        let victims = {
            let mut entries = self.entries.lock();
            let mut victims = Vec::new();
            if let Some(entry) = entries.get_mut(symbol)
                && entry.is_live()
            {
                entry.last_used_at = self.clock.now();
                tracing::debug!(%symbol, lease = entry.lease_id, "Reusing pooled context");
                return Ok(entry.lease(symbol));
            }
            if let Some(stale) = entries.remove(symbol) {
                tracing::debug!(%symbol, "Discarding unusable pooled context");
                victims.push((symbol.clone(), stale));
            }
            victims.extend(self.evict_for(&mut entries, symbol));
            victims
        };
        self.close_entries(victims).await;

        let context = match self.source.provision(symbol).await {
            Ok(context) => context,
            Err(e) => {
                tracing::warn!(%symbol, source = self.source.name(), error = %e, "Provisioning failed");
                // Nothing is pooled for the symbol; keep the gate only for waiters
                self.gates.remove_if(symbol, |_, listed| {
                    Arc::ptr_eq(listed, &gate) && Arc::strong_count(listed) == 2
                });
                return Err(StreamError::Acquisition {
                    symbol: symbol.clone(),
                    reason: e.to_string(),
                });
            }
        };
        self.provisioned.fetch_add(1, Ordering::Relaxed);

        let (lease, overflow) = {
            let mut entries = self.entries.lock();
            // Another symbol may have filled the pool while we were provisioning
            let overflow = self.evict_for(&mut entries, symbol);
            let entry = PoolEntry {
                lease_id: self.next_lease.fetch_add(1, Ordering::Relaxed),
                context,
                last_used_at: self.clock.now(),
                revoked: CancellationToken::new(),
            };
            let lease = entry.lease(symbol);
            entries.insert(symbol.clone(), entry);
            (lease, overflow)
        };
        self.close_entries(overflow).await;

        tracing::info!(%symbol, lease = lease.lease_id, pooled = self.len(), "Provisioned context");
        Ok(lease)
    }

    /// Refresh the recency of `symbol`'s entry
    pub fn touch(&self, symbol: &Symbol) {
        if let Some(entry) = self.entries.lock().get_mut(symbol) {
            entry.last_used_at = self.clock.now();
        }
    }

    /// Remove and close `symbol`'s entry, whoever holds it
    pub async fn release(&self, symbol: &Symbol) -> bool {
        let removed = self.entries.lock().remove(symbol);
        self.finish_release(symbol, removed).await
    }

    /// Remove and close the entry only if it is still the one `lease` refers to
    pub async fn release_lease(&self, lease: &PooledResource) -> bool {
        let removed = {
            let mut entries = self.entries.lock();
            match entries.get(&lease.symbol) {
                Some(entry) if entry.lease_id == lease.lease_id => entries.remove(&lease.symbol),
                _ => None,
            }
        };
        self.finish_release(&lease.symbol, removed).await
    }

    /// Close every pooled context
    pub async fn shutdown(&self) {
        let drained: Vec<_> = self.entries.lock().drain().collect();
        let count = drained.len();
        for (_, entry) in drained {
            entry.revoked.cancel();
            entry.context.close().await;
        }
        self.gates.clear();
        tracing::info!(closed = count, "Resource pool shutdown complete");
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, symbol: &Symbol) -> bool {
        self.entries.lock().contains_key(symbol)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn provisioned_total(&self) -> u64 {
        self.provisioned.load(Ordering::Relaxed)
    }

    pub fn evicted_total(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    fn gate(&self, symbol: &Symbol) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(
            self.gates
                .entry(symbol.clone())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .value(),
        )
    }

    /// Pop least-recently-used entries until there is room for one more
    fn evict_for(
        &self,
        entries: &mut HashMap<Symbol, PoolEntry>,
        keep: &Symbol,
    ) -> Vec<(Symbol, PoolEntry)> {
        let mut victims = Vec::new();
        while entries.len() >= self.capacity {
            let Some(victim) = entries
                .iter()
                .filter(|(symbol, _)| *symbol != keep)
                .min_by_key(|(_, entry)| (entry.last_used_at, entry.lease_id))
                .map(|(symbol, _)| symbol.clone())
            else {
                break;
            };
            if let Some(entry) = entries.remove(&victim) {
                tracing::info!(symbol = %victim, lease = entry.lease_id, "Evicting least recently used context");
                self.evicted.fetch_add(1, Ordering::Relaxed);
                victims.push((victim, entry));
            }
        }
        victims
    }

    async fn close_entries(&self, victims: Vec<(Symbol, PoolEntry)>) {
        for (_, entry) in victims {
            entry.revoked.cancel();
            entry.context.close().await;
        }
    }

    async fn finish_release(&self, symbol: &Symbol, removed: Option<PoolEntry>) -> bool {
        // Only drop the gate when nobody else is waiting on it
        self.gates
            .remove_if(symbol, |_, gate| Arc::strong_count(gate) == 1);
        match removed {
            Some(entry) => {
                entry.revoked.cancel();
                entry.context.close().await;
                tracing::debug!(%symbol, lease = entry.lease_id, "Released pooled context");
                true
            }
            None => false,
        }
    }
}
