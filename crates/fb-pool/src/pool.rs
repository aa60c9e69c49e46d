//! Connection pool implementation.
//!
//! A pool keeps an idle set and a checked-out set. Moving a connection
//! between them is the only mutation path. Each set lives behind a short
//! `parking_lot` lock; operations that change the pool's size (checkout,
//! reap, clear) additionally hold a pool-wide async mutex so that capacity
//! accounting and set mutation happen atomically with respect to each other.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::lifecycle::{
    ConnectionFactory, ConnectionId, ConnectionLifecycle, ConnectionMetadata, ConnectionState,
    HealthCheckResult,
};

pub(crate) type RemoveHook = Box<dyn Fn() + Send + Sync>;

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

/// A pool of physical connections for one connection string.
///
/// Cloning a `Pool` is cheap; clones share the same sets.
///
/// # Example
///
/// ```rust,ignore
/// let pool = Pool::new("key", PoolConfig::new().max_connections(4), factory)?;
///
/// let conn = pool.checkout().await?;
/// // Use connection...
/// pool.checkin(conn).await;
/// ```
pub struct Pool<F: ConnectionFactory> {
    inner: Arc<PoolInner<F>>,
}

impl<F: ConnectionFactory> Clone for Pool<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct PoolInner<F: ConnectionFactory> {
    /// Distinguishes pools created for the same key.
    instance: u64,

    /// Registry key.
    key: String,

    /// Pool configuration.
    config: PoolConfig,

    /// Opens new connections.
    factory: F,

    /// Held by size-changing operations.
    size_lock: tokio::sync::Mutex<()>,

    /// The idle and checked-out sets.
    sets: Mutex<PoolSets<F::Connection>>,

    /// Signalled whenever capacity may have become available.
    capacity: Notify,

    /// Whether the pool is closed.
    closed: AtomicBool,

    /// When the pool was created.
    created_at: Instant,

    /// When the reaper should next sweep this pool.
    next_sweep: Mutex<Instant>,

    /// Removes the pool from its registry.
    on_remove: Mutex<Option<RemoveHook>>,

    /// Pool metrics.
    metrics: Mutex<PoolMetricsInner>,
}

struct IdleEntry<C> {
    conn: Arc<C>,
    meta: ConnectionMetadata,
}

struct PoolSets<C> {
    /// Most recently added last.
    idle: Vec<IdleEntry<C>>,
    checked_out: HashMap<ConnectionId, (Arc<C>, ConnectionMetadata)>,
}

impl<C> PoolSets<C> {
    fn total(&self) -> usize {
        self.idle.len() + self.checked_out.len()
    }
}

/// Internal metrics tracking.
#[derive(Debug, Default)]
struct PoolMetricsInner {
    connections_created: u64,
    connections_closed: u64,
    checkouts_successful: u64,
    checkouts_failed: u64,
    health_check_evictions: u64,
    lifetime_evictions: u64,
}

/// What a reaper sweep did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReapOutcome {
    /// Idle connections evicted by this sweep.
    pub evicted: usize,
    /// Idle plus checked-out connections left.
    pub remaining: usize,
    /// Whether the sweep left the pool empty and closed it.
    pub closed: bool,
}

impl<F: ConnectionFactory> Pool<F> {
    /// Create an empty pool.
    pub fn new(key: impl Into<String>, config: PoolConfig, factory: F) -> Result<Self, PoolError> {
        config.validate()?;

        let key = key.into();
        let now = Instant::now();
        tracing::info!(
            min = config.min_connections,
            max = config.max_connections,
            lifetime = ?config.connection_lifetime,
            "connection pool created"
        );

        Ok(Self {
            inner: Arc::new(PoolInner {
                instance: NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed),
                next_sweep: Mutex::new(now + config.reap_interval()),
                key,
                config,
                factory,
                size_lock: tokio::sync::Mutex::new(()),
                sets: Mutex::new(PoolSets {
                    idle: Vec::new(),
                    checked_out: HashMap::new(),
                }),
                capacity: Notify::new(),
                closed: AtomicBool::new(false),
                created_at: now,
                on_remove: Mutex::new(None),
                metrics: Mutex::new(PoolMetricsInner::default()),
            }),
        })
    }

    /// Get a connection, waiting up to the acquire timeout for capacity.
    ///
    /// Idle connections are probed before reuse. Dead ones are evicted
    /// immediately; ones past their idle lifetime are evicted unless that
    /// would take the pool below its minimum size. Among the survivors, the
    /// one with the latest expiry is handed out. If none survives, a new
    /// connection is opened.
    pub async fn checkout(&self) -> Result<Arc<F::Connection>, PoolError> {
        let inner = &self.inner;
        let started = Instant::now();
        let timeout = inner.config.acquire_timeout;
        let deadline = (!timeout.is_zero()).then(|| started + timeout);

        loop {
            if self.is_closed() {
                return Err(PoolError::PoolClosed);
            }

            let Some(guard) = until(deadline, inner.size_lock.lock()).await else {
                return Err(self.timed_out(started));
            };
            if self.is_closed() {
                return Err(PoolError::PoolClosed);
            }

            // Register interest before releasing the size lock so a checkin
            // between the capacity check and the wait is not missed.
            let notified = inner.capacity.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let at_capacity = {
                let sets = inner.sets.lock();
                sets.idle.is_empty() && sets.total() >= inner.config.max_connections as usize
            };

            if at_capacity {
                drop(guard);
                tracing::trace!(pool = %inner.key, "pool at capacity, waiting for a checkin");
                if until(deadline, notified).await.is_none() {
                    return Err(self.timed_out(started));
                }
                continue;
            }

            if let Some(conn) = self.take_idle().await {
                drop(guard);
                inner.metrics.lock().checkouts_successful += 1;
                tracing::trace!(
                    pool = %inner.key,
                    connection_id = conn.connection_id(),
                    "reusing idle connection"
                );
                return Ok(conn);
            }

            let conn = match inner.factory.connect().await {
                Ok(conn) => Arc::new(conn),
                Err(e) => {
                    inner.metrics.lock().checkouts_failed += 1;
                    return Err(PoolError::Connect(Box::new(e)));
                }
            };

            let mut meta = ConnectionMetadata::new(conn.connection_id());
            meta.checkouts = 1;
            inner
                .sets
                .lock()
                .checked_out
                .insert(meta.id, (Arc::clone(&conn), meta));
            drop(guard);

            {
                let mut metrics = inner.metrics.lock();
                metrics.connections_created += 1;
                metrics.checkouts_successful += 1;
            }
            tracing::trace!(
                pool = %inner.key,
                connection_id = conn.connection_id(),
                "opened new pooled connection"
            );
            return Ok(conn);
        }
    }

    /// Scan idle entries, most recently added first, and move the freshest
    /// live survivor to the checked-out set. Caller holds the size lock.
    async fn take_idle(&self) -> Option<Arc<F::Connection>> {
        let inner = &self.inner;
        let lifetime = inner.config.connection_lifetime;
        let min = inner.config.min_connections as usize;

        let snapshot: Vec<(Arc<F::Connection>, ConnectionMetadata)> = {
            let sets = inner.sets.lock();
            sets.idle
                .iter()
                .rev()
                .map(|e| (Arc::clone(&e.conn), e.meta.clone()))
                .collect()
        };

        let mut best: Option<(ConnectionId, Instant)> = None;
        for (conn, meta) in snapshot {
            if let HealthCheckResult::Unhealthy(reason) = conn.health_check().await {
                tracing::warn!(
                    pool = %inner.key,
                    connection_id = meta.id,
                    reason = %reason,
                    "evicting dead idle connection"
                );
                self.evict_idle(meta.id).await;
                inner.metrics.lock().health_check_evictions += 1;
                continue;
            }

            if !lifetime.is_zero() && meta.is_expired(lifetime, Instant::now()) {
                let total = inner.sets.lock().total();
                if total > min {
                    tracing::debug!(
                        pool = %inner.key,
                        connection_id = meta.id,
                        "evicting expired idle connection"
                    );
                    self.evict_idle(meta.id).await;
                    inner.metrics.lock().lifetime_evictions += 1;
                    continue;
                }
            }

            let expires = meta.expires_at(lifetime);
            if best.is_none_or(|(_, current)| expires > current) {
                best = Some((meta.id, expires));
            }
        }

        let (id, _) = best?;
        let mut sets = inner.sets.lock();
        let pos = sets.idle.iter().position(|e| e.meta.id == id)?;
        let IdleEntry { conn, mut meta } = sets.idle.remove(pos);
        meta.state = ConnectionState::InUse;
        meta.checkouts += 1;
        sets.checked_out.insert(id, (Arc::clone(&conn), meta));
        Some(conn)
    }

    /// Remove an idle entry and close it.
    async fn evict_idle(&self, id: ConnectionId) {
        let removed = {
            let mut sets = self.inner.sets.lock();
            sets.idle
                .iter()
                .position(|e| e.meta.id == id)
                .map(|pos| sets.idle.remove(pos))
        };
        if let Some(entry) = removed {
            entry.conn.disconnect().await;
            self.inner.metrics.lock().connections_closed += 1;
            self.inner.capacity.notify_waiters();
        }
    }

    /// Return a connection to the idle set, restarting its lifetime clock.
    pub async fn checkin(&self, conn: Arc<F::Connection>) {
        let inner = &self.inner;
        let id = conn.connection_id();

        let owned = {
            let mut sets = inner.sets.lock();
            match sets.checked_out.remove(&id) {
                Some((_, mut meta)) if !self.is_closed() => {
                    meta.created_at = Instant::now();
                    meta.state = ConnectionState::Idle;
                    sets.idle.push(IdleEntry {
                        conn: Arc::clone(&conn),
                        meta,
                    });
                    true
                }
                _ => false,
            }
        };

        if owned {
            tracing::trace!(pool = %inner.key, connection_id = id, "connection returned to pool");
            inner.capacity.notify_waiters();
        } else {
            tracing::debug!(
                pool = %inner.key,
                connection_id = id,
                "closing connection returned to a closed pool"
            );
            conn.disconnect().await;
            inner.metrics.lock().connections_closed += 1;
        }
    }

    /// Remove a checked-out connection from the pool and close it.
    pub async fn discard(&self, conn: Arc<F::Connection>) {
        let id = conn.connection_id();
        self.inner.sets.lock().checked_out.remove(&id);
        conn.disconnect().await;
        self.inner.metrics.lock().connections_closed += 1;
        self.inner.capacity.notify_waiters();
        tracing::debug!(pool = %self.inner.key, connection_id = id, "discarded pooled connection");
    }

    /// Evict idle connections past their lifetime, oldest first, without
    /// going below the minimum size. A sweep that leaves the pool empty
    /// closes it and removes it from its registry.
    pub async fn reap(&self) -> ReapOutcome {
        let inner = &self.inner;
        let guard = inner.size_lock.lock().await;
        let lifetime = inner.config.connection_lifetime;
        let now = Instant::now();

        let (expired, remaining) = {
            let mut sets = inner.sets.lock();
            let mut removable = if lifetime.is_zero() {
                0
            } else {
                sets.total()
                    .saturating_sub(inner.config.min_connections as usize)
            };
            let mut expired = Vec::new();
            sets.idle.retain(|entry| {
                if removable > 0 && entry.meta.is_expired(lifetime, now) {
                    removable -= 1;
                    expired.push(Arc::clone(&entry.conn));
                    false
                } else {
                    true
                }
            });
            (expired, sets.total())
        };

        let evicted = expired.len();
        for conn in expired {
            conn.disconnect().await;
        }

        let closed = remaining == 0 && !self.is_closed();
        if closed {
            inner.closed.store(true, Ordering::Release);
        }
        drop(guard);

        if evicted > 0 {
            let mut metrics = inner.metrics.lock();
            metrics.lifetime_evictions += evicted as u64;
            metrics.connections_closed += evicted as u64;
            drop(metrics);
            inner.capacity.notify_waiters();
            tracing::debug!(pool = %inner.key, evicted, remaining, "reaped idle connections");
        }

        if closed {
            tracing::debug!(pool = %inner.key, "pool is empty, removing it");
            inner.capacity.notify_waiters();
            self.notify_removed();
        }

        ReapOutcome {
            evicted,
            remaining,
            closed,
        }
    }

    /// Close every connection in both sets and close the pool.
    pub async fn clear(&self) {
        let inner = &self.inner;
        let guard = inner.size_lock.lock().await;
        inner.closed.store(true, Ordering::Release);

        let all: Vec<Arc<F::Connection>> = {
            let mut locked = inner.sets.lock();
            let sets = &mut *locked;
            let idle = sets.idle.drain(..).map(|e| e.conn);
            let busy = sets.checked_out.drain().map(|(_, (conn, _))| conn);
            idle.chain(busy).collect()
        };

        let count = all.len();
        for conn in all {
            conn.disconnect().await;
        }
        drop(guard);

        inner.metrics.lock().connections_closed += count as u64;
        inner.capacity.notify_waiters();
        tracing::info!(pool = %inner.key, closed = count, "connection pool cleared");
        self.notify_removed();
    }

    fn notify_removed(&self) {
        if let Some(hook) = self.inner.on_remove.lock().take() {
            hook();
        }
    }

    pub(crate) fn set_remove_hook(&self, hook: RemoveHook) {
        *self.inner.on_remove.lock() = Some(hook);
    }

    /// Whether the reaper should sweep now; advances the schedule if so.
    pub(crate) fn sweep_due(&self, now: Instant) -> bool {
        let mut next = self.inner.next_sweep.lock();
        if now >= *next {
            *next = now + self.inner.config.reap_interval();
            true
        } else {
            false
        }
    }

    pub(crate) fn next_sweep(&self) -> Instant {
        *self.inner.next_sweep.lock()
    }

    pub(crate) fn instance(&self) -> u64 {
        self.inner.instance
    }

    fn timed_out(&self, started: Instant) -> PoolError {
        self.inner.metrics.lock().checkouts_failed += 1;
        tracing::debug!(
            pool = %self.inner.key,
            waited = ?started.elapsed(),
            "timed out waiting for a pooled connection"
        );
        PoolError::Timeout(self.inner.config.acquire_timeout)
    }

    /// Get the current pool status.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let sets = self.inner.sets.lock();
        PoolStatus {
            available: sets.idle.len() as u32,
            in_use: sets.checked_out.len() as u32,
            total: sets.total() as u32,
            max: self.inner.config.max_connections,
        }
    }

    /// Get pool metrics.
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        let inner = self.inner.metrics.lock();
        PoolMetrics {
            connections_created: inner.connections_created,
            connections_closed: inner.connections_closed,
            checkouts_successful: inner.checkouts_successful,
            checkouts_failed: inner.checkouts_failed,
            health_check_evictions: inner.health_check_evictions,
            lifetime_evictions: inner.lifetime_evictions,
            uptime: self.inner.created_at.elapsed(),
        }
    }

    /// Metadata of the idle connections, most recently added last.
    #[must_use]
    pub fn idle_metadata(&self) -> Vec<ConnectionMetadata> {
        self.inner
            .sets
            .lock()
            .idle
            .iter()
            .map(|e| e.meta.clone())
            .collect()
    }

    /// Check if the pool is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Registry key of this pool.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.inner.key
    }

    /// Get the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }
}

impl<F: ConnectionFactory> std::fmt::Debug for Pool<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("key", &self.inner.key)
            .field("status", &self.status())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Status information about the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Number of idle connections available.
    pub available: u32,
    /// Number of connections currently in use.
    pub in_use: u32,
    /// Total number of connections.
    pub total: u32,
    /// Maximum allowed connections.
    pub max: u32,
}

impl PoolStatus {
    /// Calculate the utilization percentage.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.max == 0 {
            return 0.0;
        }
        (self.in_use as f64 / self.max as f64) * 100.0
    }

    /// Check if the pool is at capacity.
    #[must_use]
    pub fn is_at_capacity(&self) -> bool {
        self.total >= self.max
    }
}

/// Metrics collected from the pool.
#[derive(Debug, Clone)]
pub struct PoolMetrics {
    /// Total connections created since pool start.
    pub connections_created: u64,
    /// Total connections closed since pool start.
    pub connections_closed: u64,
    /// Successful connection checkouts.
    pub checkouts_successful: u64,
    /// Failed connection checkouts (timeouts, connect errors).
    pub checkouts_failed: u64,
    /// Idle connections evicted because their probe failed.
    pub health_check_evictions: u64,
    /// Idle connections evicted because they outlived their lifetime.
    pub lifetime_evictions: u64,
    /// Time since pool creation.
    pub uptime: Duration,
}

impl PoolMetrics {
    /// Calculate checkout success rate (0.0 to 1.0).
    #[must_use]
    pub fn checkout_success_rate(&self) -> f64 {
        let total = self.checkouts_successful + self.checkouts_failed;
        if total == 0 {
            return 1.0;
        }
        self.checkouts_successful as f64 / total as f64
    }
}

/// Await `fut`, giving up at `deadline` if there is one.
async fn until<T>(deadline: Option<Instant>, fut: impl Future<Output = T>) -> Option<T> {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, fut).await.ok(),
        None => Some(fut.await),
    }
}
