//! Ref-counted relay connection sharing
//!
//! One transport per relay set. Every `acquire` hands out the shared
//! transport plus a [`UsageToken`]; the entry can only be evicted once all
//! tokens are released and it has sat idle past `idle_ttl`. A background
//! sweep (see [`RelayConnectionPool::start`]) closes evicted transports.

use crate::config::PoolConfig;
use crate::error::Result;
use crate::relay::{RelayTransport, TransportFactory};
use crate::runtime::TaskScope;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

type TransportCell = Arc<OnceCell<Arc<dyn RelayTransport>>>;

/// Map entry. Mutated only while the map lock is held.
struct Slot {
    generation: u64,
    transport: TransportCell,
    ref_count: usize,
    last_released: Instant,
}

struct PoolInner {
    slots: Mutex<HashMap<String, Slot>>,
    next_generation: Mutex<u64>,
}

impl PoolInner {
    fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn generation(&self) -> u64 {
        let mut next = self.next_generation.lock().unwrap_or_else(|p| p.into_inner());
        *next += 1;
        *next
    }

    /// Drop one reference. Uninitialised slots with no users are removed so
    /// a failed construction leaves nothing behind.
    fn release(&self, key: &str, generation: u64) {
        let mut slots = self.slots();
        let remove = match slots.get_mut(key) {
            Some(slot) if slot.generation == generation => {
                slot.ref_count = slot.ref_count.saturating_sub(1);
                slot.last_released = Instant::now();
                slot.ref_count == 0 && slot.transport.get().is_none()
            }
            _ => {
                warn!(key, "usage token released for an evicted connection");
                false
            }
        };
        if remove {
            slots.remove(key);
        }
    }
}

/// Proof of use for a pooled transport. Releasing it (explicitly or by drop)
/// is the only way the entry's reference count goes down.
pub struct UsageToken {
    key: String,
    generation: u64,
    pool: Weak<PoolInner>,
    released: bool,
}

impl UsageToken {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Some(pool) = self.pool.upgrade() {
            pool.release(&self.key, self.generation);
        }
    }
}

impl Drop for UsageToken {
    fn drop(&mut self) {
        self.release_inner();
    }
}

impl std::fmt::Debug for UsageToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsageToken").field("key", &self.key).field("released", &self.released).finish()
    }
}

/// Snapshot of one pool entry
#[derive(Debug, Clone)]
pub struct PoolEntryStats {
    pub key: String,
    pub ref_count: usize,
    pub connected: bool,
    pub idle_for: Option<Duration>,
}

pub struct RelayConnectionPool {
    inner: Arc<PoolInner>,
    factory: Arc<dyn TransportFactory>,
    config: PoolConfig,
    sweeper: TaskScope,
}

impl RelayConnectionPool {
    pub fn new(factory: Arc<dyn TransportFactory>, config: PoolConfig) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                slots: Mutex::new(HashMap::new()),
                next_generation: Mutex::new(0),
            }),
            factory,
            config,
            sweeper: TaskScope::new("relay-pool-sweep"),
        }
    }

    /// Canonical key for a relay set: sorted, de-duplicated URLs.
    pub fn relay_set_key(relays: &[Url]) -> String {
        let mut urls: Vec<&str> = relays.iter().map(Url::as_str).collect();
        urls.sort_unstable();
        urls.dedup();
        urls.join(",")
    }

    /// Shared transport for `relays`, connecting it on first use.
    pub async fn acquire(&self, relays: &[Url]) -> Result<(Arc<dyn RelayTransport>, UsageToken)> {
        let key = Self::relay_set_key(relays);

        // Register interest first so a sweep cannot evict the slot mid-construction.
        let (cell, token) = {
            let mut slots = self.inner.slots();
            let slot = match slots.get_mut(&key) {
                Some(slot) => slot,
                None => {
                    let generation = self.inner.generation();
                    slots.entry(key.clone()).or_insert(Slot {
                        generation,
                        transport: Arc::new(OnceCell::new()),
                        ref_count: 0,
                        last_released: Instant::now(),
                    })
                }
            };
            slot.ref_count += 1;
            let token = UsageToken {
                key: key.clone(),
                generation: slot.generation,
                pool: Arc::downgrade(&self.inner),
                released: false,
            };
            (slot.transport.clone(), token)
        };

        let factory = self.factory.clone();
        let connect_timeout = self.config.connect_timeout;
        let built = AtomicBool::new(false);
        let init = cell
            .get_or_try_init(|| async {
                debug!(key = %key, "opening relay connection");
                let transport = factory.create(relays)?;
                transport.connect_and_wait(connect_timeout).await?;
                built.store(true, Ordering::SeqCst);
                info!(key = %key, "relay connection ready");
                Ok::<_, crate::error::NwcError>(transport)
            })
            .await;

        let transport = match init {
            Ok(transport) => transport.clone(),
            Err(e) => {
                warn!(key = %key, "relay connection failed: {}", e);
                token.release();
                return Err(e);
            }
        };

        // A reused transport may have lost every link; this is a no-op while one is up.
        if !built.load(Ordering::SeqCst) {
            if let Err(e) = transport.connect_and_wait(connect_timeout).await {
                warn!(key = %key, "relay reconnect failed: {}", e);
                token.release();
                return Err(e);
            }
        }
        Ok((transport, token))
    }

    /// Give a token back. Equivalent to dropping it.
    pub fn release(&self, token: UsageToken) {
        token.release();
    }

    /// Evict idle entries now. Returns how many transports were closed.
    pub async fn sweep(&self) -> usize {
        sweep_idle(&self.inner, self.config.idle_ttl).await
    }

    /// Spawn the periodic sweep.
    pub fn start(&self) {
        let inner = Arc::downgrade(&self.inner);
        let interval = self.config.sweep_interval;
        let idle_ttl = self.config.idle_ttl;
        self.sweeper.spawn(move |token| async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(inner) = inner.upgrade() else { break };
                        let closed = sweep_idle(&inner, idle_ttl).await;
                        if closed > 0 {
                            debug!(closed, "evicted idle relay connections");
                        }
                    }
                }
            }
        });
        info!(?interval, ?idle_ttl, "relay pool sweep started");
    }

    /// Stop the sweep and close every transport, in use or not.
    pub async fn stop(&self) {
        self.sweeper.shutdown().await;
        let drained: Vec<(String, Slot)> = self.inner.slots().drain().collect();
        for (key, slot) in drained {
            if let Some(transport) = slot.transport.get() {
                if slot.ref_count > 0 {
                    warn!(key = %key, refs = slot.ref_count, "closing relay connection still in use");
                }
                transport.disconnect().await;
            }
        }
        info!("relay pool stopped");
    }

    pub fn stats(&self) -> Vec<PoolEntryStats> {
        let slots = self.inner.slots();
        let mut stats: Vec<PoolEntryStats> = slots
            .iter()
            .map(|(key, slot)| PoolEntryStats {
                key: key.clone(),
                ref_count: slot.ref_count,
                connected: slot.transport.initialized(),
                idle_for: (slot.ref_count == 0).then(|| slot.last_released.elapsed()),
            })
            .collect();
        stats.sort_by(|a, b| a.key.cmp(&b.key));
        stats
    }
}

async fn sweep_idle(inner: &PoolInner, idle_ttl: Duration) -> usize {
    let evicted: Vec<(String, Arc<dyn RelayTransport>)> = {
        let mut slots = inner.slots();
        let expired: Vec<String> = slots
            .iter()
            .filter(|(_, s)| s.ref_count == 0 && s.last_released.elapsed() > idle_ttl)
            .map(|(k, _)| k.clone())
            .collect();
        expired
            .into_iter()
            .filter_map(|key| {
                let slot = slots.remove(&key)?;
                slot.transport.get().cloned().map(|t| (key, t))
            })
            .collect()
    };

    let count = evicted.len();
    for (key, transport) in evicted {
        debug!(key = %key, "closing idle relay connection");
        transport.disconnect().await;
    }
    count
}
