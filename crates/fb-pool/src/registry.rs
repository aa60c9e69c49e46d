//! Registry of pools keyed by connection string.
//!
//! The registry creates pools on demand and owns the single reaper task
//! that sweeps every pool with idle-lifetime eviction enabled. The task is
//! spawned when the first such pool appears and exits once none remain.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::lifecycle::ConnectionFactory;
use crate::pool::Pool;

/// Map from connection-string key to pool.
///
/// Cloning a registry is cheap; clones share the same pools.
pub struct PoolRegistry<F: ConnectionFactory> {
    inner: Arc<RegistryInner<F>>,
}

impl<F: ConnectionFactory> Clone for PoolRegistry<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct RegistryInner<F: ConnectionFactory> {
    pools: RwLock<HashMap<String, Pool<F>>>,
    reaper: Mutex<Option<JoinHandle<()>>>,
    reschedule: Arc<Notify>,
}

impl<F: ConnectionFactory> Drop for RegistryInner<F> {
    fn drop(&mut self) {
        if let Some(handle) = self.reaper.get_mut().take() {
            handle.abort();
        }
    }
}

impl<F: ConnectionFactory> Default for PoolRegistry<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: ConnectionFactory> PoolRegistry<F> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                pools: RwLock::new(HashMap::new()),
                reaper: Mutex::new(None),
                reschedule: Arc::new(Notify::new()),
            }),
        }
    }

    /// Look up the open pool for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Pool<F>> {
        self.inner
            .pools
            .read()
            .get(key)
            .filter(|pool| !pool.is_closed())
            .cloned()
    }

    /// Return the pool for `key`, creating it if absent or closed.
    ///
    /// `make_factory` is only called when a new pool is created.
    pub fn get_or_create(
        &self,
        key: &str,
        config: PoolConfig,
        make_factory: impl FnOnce() -> F,
    ) -> Result<Pool<F>, PoolError> {
        if let Some(pool) = self.get(key) {
            return Ok(pool);
        }

        let pool = {
            let mut pools = self.inner.pools.write();
            if let Some(pool) = pools.get(key).filter(|pool| !pool.is_closed()) {
                return Ok(pool.clone());
            }

            let pool = Pool::new(key, config, make_factory())?;
            pool.set_remove_hook(self.remove_hook(key, pool.instance()));
            pools.insert(key.to_owned(), pool.clone());
            pool
        };

        if pool.config().idle_eviction_enabled() {
            self.ensure_reaper();
        }
        Ok(pool)
    }

    fn remove_hook(&self, key: &str, instance: u64) -> Box<dyn Fn() + Send + Sync> {
        let registry = Arc::downgrade(&self.inner);
        let key = key.to_owned();
        Box::new(move || {
            let Some(inner) = registry.upgrade() else {
                return;
            };
            let mut pools = inner.pools.write();
            if pools.get(&key).is_some_and(|p| p.instance() == instance) {
                pools.remove(&key);
                tracing::debug!(pool = %key, "pool removed from registry");
            }
        })
    }

    /// Remove the pool for `key` without closing it.
    pub fn remove(&self, key: &str) -> Option<Pool<F>> {
        self.inner.pools.write().remove(key)
    }

    /// Remove and clear the pool for `key`. Returns whether one existed.
    pub async fn clear_pool(&self, key: &str) -> bool {
        match self.remove(key) {
            Some(pool) => {
                pool.clear().await;
                true
            }
            None => false,
        }
    }

    /// Remove and clear every pool.
    pub async fn clear_all(&self) {
        let pools: Vec<Pool<F>> = self.inner.pools.write().drain().map(|(_, p)| p).collect();
        for pool in pools {
            pool.clear().await;
        }
    }

    /// Number of registered pools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.pools.read().len()
    }

    /// Whether no pools are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.pools.read().is_empty()
    }

    /// Keys of the registered pools.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.inner.pools.read().keys().cloned().collect()
    }

    /// Whether the reaper task is running.
    #[must_use]
    pub fn reaper_running(&self) -> bool {
        self.inner.reaper.lock().is_some()
    }

    fn ensure_reaper(&self) {
        let mut slot = self.inner.reaper.lock();
        if slot.is_some() {
            self.inner.reschedule.notify_one();
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("no async runtime; idle connections will not be reaped");
            return;
        };
        tracing::debug!("starting pool reaper");
        *slot = Some(runtime.spawn(run_reaper(Arc::downgrade(&self.inner))));
    }
}

impl<F: ConnectionFactory> std::fmt::Debug for PoolRegistry<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolRegistry")
            .field("pools", &self.keys())
            .finish()
    }
}

async fn run_reaper<F: ConnectionFactory>(registry: Weak<RegistryInner<F>>) {
    loop {
        let (pools, reschedule) = {
            let Some(inner) = registry.upgrade() else {
                return;
            };
            let mut slot = inner.reaper.lock();
            let pools: Vec<Pool<F>> = inner
                .pools
                .read()
                .values()
                .filter(|p| p.config().idle_eviction_enabled() && !p.is_closed())
                .cloned()
                .collect();
            if pools.is_empty() {
                tracing::debug!("no pools need reaping, stopping reaper");
                *slot = None;
                return;
            }
            (pools, Arc::clone(&inner.reschedule))
        };

        let Some(wake) = pools.iter().map(Pool::next_sweep).min() else {
            continue;
        };

        tokio::select! {
            () = tokio::time::sleep_until(wake) => {}
            () = reschedule.notified() => continue,
        }

        let now = Instant::now();
        for pool in &pools {
            if pool.sweep_due(now) {
                let outcome = pool.reap().await;
                tracing::trace!(
                    pool = %pool.key(),
                    evicted = outcome.evicted,
                    remaining = outcome.remaining,
                    "reaper sweep"
                );
            }
        }
    }
}
