//! Pool and registry behavior tests against an in-memory connection.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use fb_pool::{
    ConnectionFactory, ConnectionId, ConnectionLifecycle, HealthCheckResult, Pool, PoolConfig,
    PoolError, PoolRegistry,
};
use parking_lot::Mutex;
use tokio::time::Instant;

#[derive(Debug, Default)]
struct FactoryState {
    next_id: AtomicU64,
    connects: AtomicUsize,
    fail: AtomicBool,
    dead: Mutex<HashSet<ConnectionId>>,
    disconnected: Mutex<Vec<ConnectionId>>,
}

#[derive(Clone, Default)]
struct FakeFactory {
    state: Arc<FactoryState>,
}

impl FakeFactory {
    fn kill(&self, id: ConnectionId) {
        self.state.dead.lock().insert(id);
    }

    fn disconnected(&self) -> Vec<ConnectionId> {
        self.state.disconnected.lock().clone()
    }

    fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
struct FakeConnection {
    id: ConnectionId,
    state: Arc<FactoryState>,
}

#[async_trait]
impl ConnectionLifecycle for FakeConnection {
    fn connection_id(&self) -> ConnectionId {
        self.id
    }

    async fn health_check(&self) -> HealthCheckResult {
        if self.state.dead.lock().contains(&self.id) {
            HealthCheckResult::Unhealthy("link reset".into())
        } else {
            HealthCheckResult::Healthy
        }
    }

    async fn disconnect(&self) {
        self.state.disconnected.lock().push(self.id);
    }
}

#[derive(Debug, thiserror::Error)]
#[error("server unreachable")]
struct Unreachable;

#[async_trait]
impl ConnectionFactory for FakeFactory {
    type Connection = FakeConnection;
    type Error = Unreachable;

    async fn connect(&self) -> Result<FakeConnection, Unreachable> {
        if self.state.fail.load(Ordering::SeqCst) {
            return Err(Unreachable);
        }
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        Ok(FakeConnection {
            id: self.state.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            state: Arc::clone(&self.state),
        })
    }
}

fn pool(config: PoolConfig) -> (Pool<FakeFactory>, FakeFactory) {
    let factory = FakeFactory::default();
    let pool = Pool::new("test", config, factory.clone()).unwrap();
    (pool, factory)
}

#[tokio::test]
async fn test_checkin_then_checkout_reuses_connection() {
    let (pool, factory) = pool(PoolConfig::new());

    let conn = pool.checkout().await.unwrap();
    let id = conn.connection_id();
    pool.checkin(conn).await;

    let status = pool.status();
    assert_eq!(status.available, 1);
    assert_eq!(status.in_use, 0);

    let again = pool.checkout().await.unwrap();
    assert_eq!(again.connection_id(), id);
    assert_eq!(factory.connects(), 1);
    assert_eq!(pool.metrics().checkouts_successful, 2);
}

#[tokio::test(start_paused = true)]
async fn test_checkout_times_out_at_capacity() {
    let config = PoolConfig::new()
        .max_connections(2)
        .acquire_timeout(Duration::from_secs(5));
    let (pool, _factory) = pool(config);

    let _a = pool.checkout().await.unwrap();
    let _b = pool.checkout().await.unwrap();
    assert!(pool.status().is_at_capacity());

    let started = Instant::now();
    let err = pool.checkout().await.unwrap_err();
    assert!(matches!(err, PoolError::Timeout(_)));
    assert!(started.elapsed() >= Duration::from_secs(5));
    assert_eq!(pool.metrics().checkouts_failed, 1);
    assert_eq!(pool.status().total, 2);
}

#[tokio::test(start_paused = true)]
async fn test_waiter_is_woken_by_checkin() {
    let config = PoolConfig::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(30));
    let (pool, factory) = pool(config);

    let held = pool.checkout().await.unwrap();
    let held_id = held.connection_id();

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.checkout().await.map(|c| c.connection_id()) })
    };

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(!waiter.is_finished());
    pool.checkin(held).await;

    let got = waiter.await.unwrap().unwrap();
    assert_eq!(got, held_id);
    assert_eq!(factory.connects(), 1);
}

#[tokio::test]
async fn test_checkout_stays_pending_until_checkin() {
    let (pool, factory) = pool(PoolConfig::new().max_connections(1));
    let held = pool.checkout().await.unwrap();
    let held_id = held.connection_id();

    let mut waiting = tokio_test::task::spawn(pool.checkout());
    tokio_test::assert_pending!(waiting.poll());
    tokio_test::assert_pending!(waiting.poll());

    pool.checkin(held).await;
    assert!(waiting.is_woken());
    let conn = tokio_test::assert_ready_ok!(waiting.poll());
    assert_eq!(conn.connection_id(), held_id);
    assert_eq!(factory.connects(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_checkout_prefers_freshest_idle_connection() {
    let (pool, _factory) = pool(PoolConfig::new());

    let a = pool.checkout().await.unwrap();
    let b = pool.checkout().await.unwrap();
    let b_id = b.connection_id();

    pool.checkin(a).await;
    tokio::time::advance(Duration::from_secs(1)).await;
    pool.checkin(b).await;

    let got = pool.checkout().await.unwrap();
    assert_eq!(got.connection_id(), b_id);
    assert_eq!(pool.status().available, 1);
}

#[tokio::test]
async fn test_dead_idle_connection_is_evicted() {
    let (pool, factory) = pool(PoolConfig::new());

    let a = pool.checkout().await.unwrap();
    let b = pool.checkout().await.unwrap();
    let (a_id, b_id) = (a.connection_id(), b.connection_id());
    pool.checkin(a).await;
    pool.checkin(b).await;

    factory.kill(b_id);
    let got = pool.checkout().await.unwrap();

    assert_eq!(got.connection_id(), a_id);
    assert_eq!(factory.disconnected(), vec![b_id]);
    assert_eq!(pool.metrics().health_check_evictions, 1);
    assert_eq!(pool.status().total, 1);
}

#[tokio::test]
async fn test_all_idle_dead_opens_new_connection() {
    let (pool, factory) = pool(PoolConfig::new());

    let a = pool.checkout().await.unwrap();
    let a_id = a.connection_id();
    pool.checkin(a).await;
    factory.kill(a_id);

    let got = pool.checkout().await.unwrap();
    assert_ne!(got.connection_id(), a_id);
    assert_eq!(factory.connects(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_expired_idle_connection_replaced_on_checkout() {
    let config = PoolConfig::new().connection_lifetime(Duration::from_secs(10));
    let (pool, factory) = pool(config);

    let a = pool.checkout().await.unwrap();
    let a_id = a.connection_id();
    pool.checkin(a).await;

    tokio::time::advance(Duration::from_secs(11)).await;
    let got = pool.checkout().await.unwrap();

    assert_ne!(got.connection_id(), a_id);
    assert_eq!(factory.disconnected(), vec![a_id]);
    assert_eq!(pool.metrics().lifetime_evictions, 1);
}

#[tokio::test(start_paused = true)]
async fn test_expired_connection_kept_at_minimum() {
    let config = PoolConfig::new()
        .min_connections(1)
        .connection_lifetime(Duration::from_secs(10));
    let (pool, factory) = pool(config);

    let a = pool.checkout().await.unwrap();
    let a_id = a.connection_id();
    pool.checkin(a).await;

    tokio::time::advance(Duration::from_secs(11)).await;
    let got = pool.checkout().await.unwrap();

    assert_eq!(got.connection_id(), a_id);
    assert!(factory.disconnected().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_reap_evicts_oldest_down_to_minimum() {
    let config = PoolConfig::new()
        .min_connections(1)
        .connection_lifetime(Duration::from_secs(10));
    let (pool, factory) = pool(config);

    let a = pool.checkout().await.unwrap();
    let b = pool.checkout().await.unwrap();
    let (a_id, b_id) = (a.connection_id(), b.connection_id());
    pool.checkin(a).await;
    tokio::time::advance(Duration::from_secs(1)).await;
    pool.checkin(b).await;

    tokio::time::advance(Duration::from_secs(20)).await;
    let outcome = pool.reap().await;

    assert_eq!(outcome.evicted, 1);
    assert_eq!(outcome.remaining, 1);
    assert!(!outcome.closed);
    assert_eq!(factory.disconnected(), vec![a_id]);
    let idle: Vec<_> = pool.idle_metadata().iter().map(|m| m.id).collect();
    assert_eq!(idle, vec![b_id]);
}

#[tokio::test(start_paused = true)]
async fn test_reap_keeps_unexpired_connections() {
    let config = PoolConfig::new().connection_lifetime(Duration::from_secs(10));
    let (pool, _factory) = pool(config);

    let a = pool.checkout().await.unwrap();
    pool.checkin(a).await;

    tokio::time::advance(Duration::from_secs(5)).await;
    let outcome = pool.reap().await;
    assert_eq!(outcome.evicted, 0);
    assert_eq!(outcome.remaining, 1);
}

#[tokio::test]
async fn test_connect_failure_is_reported() {
    let (pool, factory) = pool(PoolConfig::new());
    factory.state.fail.store(true, Ordering::SeqCst);

    let err = pool.checkout().await.unwrap_err();
    assert!(matches!(err, PoolError::Connect(_)));
    assert_eq!(pool.metrics().checkouts_failed, 1);
    assert_eq!(pool.status().total, 0);
}

#[tokio::test]
async fn test_clear_closes_everything() {
    let (pool, factory) = pool(PoolConfig::new());

    let a = pool.checkout().await.unwrap();
    let b = pool.checkout().await.unwrap();
    pool.checkin(a).await;

    pool.clear().await;
    assert!(pool.is_closed());
    assert_eq!(factory.disconnected().len(), 2);
    assert!(matches!(
        pool.checkout().await.unwrap_err(),
        PoolError::PoolClosed
    ));

    // Returning a connection to a closed pool closes it again.
    pool.checkin(b).await;
    assert_eq!(pool.status().total, 0);
}

#[tokio::test]
async fn test_discard_frees_capacity() {
    let config = PoolConfig::new().max_connections(1);
    let (pool, factory) = pool(config);

    let a = pool.checkout().await.unwrap();
    let a_id = a.connection_id();
    pool.discard(a).await;

    assert_eq!(pool.status().total, 0);
    assert_eq!(factory.disconnected(), vec![a_id]);
    let b = pool.checkout().await.unwrap();
    assert_ne!(b.connection_id(), a_id);
}

#[tokio::test]
async fn test_registry_reuses_pool_per_key() {
    let registry = PoolRegistry::new();
    let factory = FakeFactory::default();

    let p1 = registry
        .get_or_create("a", PoolConfig::new(), || factory.clone())
        .unwrap();
    let p2 = registry
        .get_or_create("a", PoolConfig::new(), || panic!("pool should be reused"))
        .unwrap();
    let _p3 = registry
        .get_or_create("b", PoolConfig::new(), || factory.clone())
        .unwrap();

    let conn = p1.checkout().await.unwrap();
    p1.checkin(conn).await;
    assert_eq!(p2.status().available, 1);
    assert_eq!(registry.len(), 2);

    assert!(registry.clear_pool("a").await);
    assert!(p1.is_closed());
    assert!(registry.get("a").is_none());
    assert!(!registry.clear_pool("a").await);

    let fresh = registry
        .get_or_create("a", PoolConfig::new(), || factory.clone())
        .unwrap();
    assert!(!fresh.is_closed());
    assert_eq!(fresh.status().total, 0);
}

#[tokio::test]
async fn test_registry_rejects_invalid_config() {
    let registry: PoolRegistry<FakeFactory> = PoolRegistry::new();
    let config = PoolConfig::new().min_connections(3).max_connections(1);
    let err = registry
        .get_or_create("a", config, FakeFactory::default)
        .unwrap_err();
    assert!(matches!(err, PoolError::Config(_)));
    assert!(registry.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_reaper_removes_emptied_pool() {
    let registry = PoolRegistry::new();
    let factory = FakeFactory::default();
    let config = PoolConfig::new().connection_lifetime(Duration::from_secs(1));

    let pool = registry
        .get_or_create("a", config, || factory.clone())
        .unwrap();
    assert!(registry.reaper_running());

    let conn = pool.checkout().await.unwrap();
    let id = conn.connection_id();
    pool.checkin(conn).await;

    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(factory.disconnected(), vec![id]);
    assert!(pool.is_closed());
    assert!(registry.is_empty());
    assert!(!registry.reaper_running());
}

#[tokio::test(start_paused = true)]
async fn test_reaper_skips_pools_without_lifetime() {
    let registry = PoolRegistry::new();
    let factory = FakeFactory::default();

    let pool = registry
        .get_or_create("a", PoolConfig::new(), || factory.clone())
        .unwrap();
    assert!(!registry.reaper_running());

    let conn = pool.checkout().await.unwrap();
    pool.checkin(conn).await;
    tokio::time::sleep(Duration::from_secs(600)).await;

    assert_eq!(pool.status().available, 1);
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn test_clear_all_empties_registry() {
    let registry = PoolRegistry::new();
    let factory = FakeFactory::default();

    for key in ["a", "b", "c"] {
        let pool = registry
            .get_or_create(key, PoolConfig::new(), || factory.clone())
            .unwrap();
        let conn = pool.checkout().await.unwrap();
        pool.checkin(conn).await;
    }

    registry.clear_all().await;
    assert!(registry.is_empty());
    assert_eq!(factory.disconnected().len(), 3);
}
