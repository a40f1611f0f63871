//! Tests for connection pool functionality

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use leasehold_core::PoolError;
use tokio::time::Instant;

use super::config::PoolConfig;
use super::pool::ConnectionPool;
use super::state::PoolState;
use super::stats::{ConnectionStats, PoolStats};
use crate::test_support::{
    MockConnection, MockFactory, assert_invariants, in_use_ids, settle, wait_for_waiters,
};

async fn pool_with(
    config: PoolConfig,
) -> (ConnectionPool<Arc<MockFactory>>, Arc<MockFactory>) {
    let factory = Arc::new(MockFactory::new());
    let pool = ConnectionPool::new(config, Arc::clone(&factory))
        .await
        .unwrap();
    (pool, factory)
}

// =============================================================================
// PoolConfig tests
// =============================================================================

#[test]
fn test_pool_config_default() {
    let config = PoolConfig::default();
    assert_eq!(config.min_connections(), 2);
    assert_eq!(config.max_connections(), 10);
    assert_eq!(config.acquire_timeout(), Duration::from_millis(30_000));
    assert_eq!(config.idle_timeout(), Duration::from_millis(300_000));
    assert_eq!(config.max_uses(), 1000);
    assert!(config.validate_on_borrow());
    assert!(!config.validate_on_return());
    assert_eq!(config.health_check_interval(), Duration::from_secs(30));
    assert_eq!(config.idle_sweep_interval(), Duration::from_secs(300));
}

#[test]
fn test_pool_config_builder() {
    let config = PoolConfig::new(1, 5)
        .with_acquire_timeout_ms(5000)
        .with_idle_timeout_ms(60000)
        .with_max_uses(3)
        .with_validate_on_borrow(false)
        .with_validate_on_return(true)
        .with_health_check_interval_ms(1000)
        .with_idle_sweep_interval_ms(2000);

    assert_eq!(config.acquire_timeout(), Duration::from_millis(5000));
    assert_eq!(config.idle_timeout(), Duration::from_millis(60000));
    assert_eq!(config.max_uses(), 3);
    assert!(!config.validate_on_borrow());
    assert!(config.validate_on_return());
    assert_eq!(config.health_check_interval(), Duration::from_millis(1000));
    assert_eq!(config.idle_sweep_interval(), Duration::from_millis(2000));
}

#[test]
#[should_panic(expected = "max_connections must be greater than 0")]
fn test_pool_config_zero_max_panics() {
    PoolConfig::new(0, 0);
}

#[test]
#[should_panic(expected = "cannot exceed max_connections")]
fn test_pool_config_min_exceeds_max_panics() {
    PoolConfig::new(5, 2);
}

#[test]
fn test_pool_config_from_toml_partial() {
    let config = PoolConfig::from_toml_str(
        r#"
        max_connections = 4
        acquire_timeout_ms = 250
        validate_on_return = true
        "#,
    )
    .unwrap();

    assert_eq!(config.max_connections(), 4);
    assert_eq!(config.min_connections(), 2);
    assert_eq!(config.acquire_timeout(), Duration::from_millis(250));
    assert!(config.validate_on_return());
    assert_eq!(config.max_uses(), 1000);
}

#[test]
fn test_pool_config_from_toml_rejects_invalid() {
    let err = PoolConfig::from_toml_str("min_connections = 8\nmax_connections = 4").unwrap_err();
    assert!(matches!(err, PoolError::Configuration(msg) if msg.contains("cannot exceed")));

    let err = PoolConfig::from_toml_str("max_uses = 0").unwrap_err();
    assert!(matches!(err, PoolError::Configuration(_)));

    let err = PoolConfig::from_toml_str("max_conections = 4").unwrap_err();
    assert!(matches!(err, PoolError::Configuration(msg) if msg.contains("Invalid pool config")));
}

#[test]
fn test_pool_config_from_missing_file() {
    let err = PoolConfig::from_file("/nonexistent/leasehold.toml").unwrap_err();
    assert!(matches!(err, PoolError::Configuration(msg) if msg.contains("Failed to read")));
}

// =============================================================================
// PoolStats tests
// =============================================================================

#[test]
fn test_pool_stats_utilization() {
    let stats = PoolStats::new(3, 1, 0, Vec::new());
    assert_eq!(stats.total(), 4);
    assert!((stats.utilization() - 0.25).abs() < f64::EPSILON);
    assert!(!stats.is_full());

    let stats = PoolStats::new(0, 2, 5, Vec::new());
    assert!(stats.is_full());
    assert_eq!(stats.waiting(), 5);

    let stats = PoolStats::default();
    assert_eq!(stats.utilization(), 0.0);
    assert!(!stats.is_full());
}

#[test]
fn test_pool_stats_serialization() {
    let stats = PoolStats::new(1, 0, 0, Vec::new());
    let json = serde_json::to_value(&stats).unwrap();
    assert_eq!(json["total"], 1);
    assert_eq!(json["available"], 1);
    assert_eq!(json["in_use"], 0);
}

// =============================================================================
// Initialization tests
// =============================================================================

#[tokio::test]
async fn test_new_creates_min_connections() {
    let (pool, factory) = pool_with(PoolConfig::new(3, 5)).await;

    let stats = pool.stats();
    assert_eq!(stats.total(), 3);
    assert_eq!(stats.available(), 3);
    assert_eq!(stats.in_use(), 0);
    assert_eq!(factory.created(), 3);
    assert!(stats.connections().iter().all(|c: &ConnectionStats| c.is_healthy));
    assert_invariants(&pool);
}

#[tokio::test]
async fn test_new_fails_when_factory_fails() {
    let factory = Arc::new(MockFactory::new());
    factory.set_fail_creates(true);

    let result = ConnectionPool::new(PoolConfig::new(2, 4), Arc::clone(&factory)).await;
    match result {
        Err(PoolError::Creation(msg)) => assert!(msg.contains("backend unreachable")),
        other => panic!("expected creation error, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn test_new_rejects_invalid_config() {
    let factory = Arc::new(MockFactory::new());
    let config = PoolConfig::new(1, 2).with_max_uses(0);

    let result = ConnectionPool::new(config, Arc::clone(&factory)).await;
    assert!(matches!(result, Err(PoolError::Configuration(_))));
    assert_eq!(factory.created(), 0);
}

// =============================================================================
// Acquire / release tests
// =============================================================================

#[tokio::test]
async fn test_acquire_reuses_released_connection() {
    let (pool, factory) = pool_with(PoolConfig::new(1, 3)).await;

    let lease = pool.acquire().await.unwrap();
    let id = lease.id();
    pool.release(lease).await;

    let lease = pool.acquire().await.unwrap();
    assert_eq!(lease.id(), id);
    assert_eq!(factory.created(), 1);

    pool.release(lease).await;
    let stats = pool.stats();
    assert_eq!(stats.connection(id).unwrap().use_count, 2);
    assert_invariants(&pool);
}

#[tokio::test]
async fn test_acquire_creates_up_to_max() {
    let (pool, factory) = pool_with(PoolConfig::new(0, 3)).await;
    assert_eq!(pool.stats().total(), 0);

    let a = pool.acquire().await.unwrap();
    let b = pool.acquire().await.unwrap();
    let c = pool.acquire().await.unwrap();
    assert_eq!(factory.created(), 3);

    let stats = pool.stats();
    assert_eq!(stats.in_use(), 3);
    assert_eq!(stats.available(), 0);
    assert!(stats.is_full());
    assert_invariants(&pool);

    for lease in [a, b, c] {
        pool.release(lease).await;
    }
    assert_eq!(pool.stats().available(), 3);
    assert_invariants(&pool);
}

#[tokio::test]
async fn test_blocked_acquire_resolved_by_release() {
    let (pool, _factory) = pool_with(PoolConfig::new(1, 2)).await;

    let first = pool.acquire().await.unwrap();
    let second = pool.acquire().await.unwrap();

    let waiter = tokio::spawn({
        let pool = pool.clone();
        async move { pool.acquire().await.map(|lease| lease.id()) }
    });
    wait_for_waiters(&pool, 1).await;
    assert!(!waiter.is_finished());

    let released = first.id();
    pool.release(first).await;

    let received = waiter.await.unwrap().unwrap();
    assert_eq!(received, released);
    assert_eq!(pool.stats().waiting(), 0);

    pool.release(second).await;
}

#[tokio::test(start_paused = true)]
async fn test_acquire_times_out() {
    let (pool, _factory) = pool_with(PoolConfig::new(1, 1).with_acquire_timeout_ms(50)).await;
    let _held = pool.acquire().await.unwrap();

    let started = Instant::now();
    let err = pool.acquire().await.unwrap_err();
    let elapsed = started.elapsed();

    assert_eq!(err, PoolError::AcquireTimeout(Duration::from_millis(50)));
    assert!(elapsed >= Duration::from_millis(50));
    assert!(elapsed < Duration::from_millis(60));
    assert_eq!(pool.stats().waiting(), 0);
}

#[tokio::test]
async fn test_connection_recycled_after_max_uses() {
    let (pool, factory) = pool_with(PoolConfig::new(1, 2).with_max_uses(3)).await;

    let mut first_id = None;
    for _ in 0..3 {
        let lease = pool.acquire().await.unwrap();
        first_id.get_or_insert(lease.id());
        assert_eq!(Some(lease.id()), first_id);
        pool.release(lease).await;
    }

    assert_eq!(pool.stats().total(), 0);
    assert_eq!(factory.destroyed(), vec![0]);

    let lease = pool.acquire().await.unwrap();
    assert_ne!(Some(lease.id()), first_id);
    assert_eq!(lease.serial, 1);
    assert_eq!(factory.created(), 2);
}

#[tokio::test]
async fn test_invalid_connection_skipped_on_borrow() {
    let (pool, factory) = pool_with(PoolConfig::new(2, 2)).await;
    factory.invalidate(0);

    // Holding the first lease forces the second acquire onto serial 0.
    let first = pool.acquire().await.unwrap();
    let second = pool.acquire().await.unwrap();
    assert_ne!(first.serial, 0);
    assert_ne!(second.serial, 0);
    assert_eq!(factory.destroyed(), vec![0]);

    pool.release(first).await;
    pool.release(second).await;
    for _ in 0..4 {
        let lease = pool.acquire().await.unwrap();
        assert_ne!(lease.serial, 0);
        pool.release(lease).await;
    }

    assert_eq!(pool.stats().total(), 2);
    assert_invariants(&pool);
}

#[tokio::test]
async fn test_all_invalid_falls_through_to_create() {
    let (pool, factory) = pool_with(PoolConfig::new(2, 3)).await;
    factory.invalidate(0);
    factory.invalidate(1);

    let lease = pool.acquire().await.unwrap();
    assert_eq!(lease.serial, 2);

    let mut destroyed = factory.destroyed();
    destroyed.sort();
    assert_eq!(destroyed, vec![0, 1]);
    assert_eq!(pool.stats().total(), 1);
}

#[tokio::test]
async fn test_validation_skipped_when_disabled() {
    let (pool, factory) = pool_with(PoolConfig::new(1, 1).with_validate_on_borrow(false)).await;
    factory.invalidate(0);

    let lease = pool.acquire().await.unwrap();
    assert_eq!(lease.serial, 0);
    assert!(factory.destroyed().is_empty());
}

#[tokio::test]
async fn test_invalid_connection_destroyed_on_return() {
    let (pool, factory) = pool_with(PoolConfig::new(1, 2).with_validate_on_return(true)).await;

    let lease = pool.acquire().await.unwrap();
    factory.invalidate(lease.serial);
    pool.release(lease).await;

    assert_eq!(pool.stats().total(), 0);
    assert_eq!(factory.destroyed(), vec![0]);
}

#[tokio::test]
async fn test_creation_error_surfaces_and_frees_slot() {
    let (pool, factory) = pool_with(PoolConfig::new(0, 1)).await;
    factory.set_fail_creates(true);

    let err = pool.acquire().await.unwrap_err();
    assert!(matches!(err, PoolError::Creation(_)));
    assert_eq!(pool.stats().total(), 0);

    factory.set_fail_creates(false);
    let lease = pool.acquire().await.unwrap();
    assert_eq!(lease.serial, 0);
}

#[tokio::test]
async fn test_fifo_fairness() {
    let (pool, _factory) = pool_with(PoolConfig::new(1, 1)).await;
    let held = pool.acquire().await.unwrap();
    let (order_tx, mut order_rx) = tokio::sync::mpsc::unbounded_channel();

    let mut waiters = Vec::new();
    for name in ["w1", "w2"] {
        let worker_pool = pool.clone();
        let order_tx = order_tx.clone();
        waiters.push(tokio::spawn(async move {
            let lease = worker_pool.acquire().await.unwrap();
            order_tx.send(name).unwrap();
            worker_pool.release(lease).await;
        }));
        wait_for_waiters(&pool, waiters.len()).await;
    }

    pool.release(held).await;
    for waiter in waiters {
        waiter.await.unwrap();
    }

    assert_eq!(order_rx.recv().await, Some("w1"));
    assert_eq!(order_rx.recv().await, Some("w2"));
}

#[tokio::test]
async fn test_exactly_one_release_serves_oldest_waiter() {
    let (pool, _factory) = pool_with(PoolConfig::new(1, 1)).await;
    let held = pool.acquire().await.unwrap();

    let first = tokio::spawn({
        let pool = pool.clone();
        async move { pool.acquire().await }
    });
    wait_for_waiters(&pool, 1).await;
    let second = tokio::spawn({
        let pool = pool.clone();
        async move { pool.acquire().await }
    });
    wait_for_waiters(&pool, 2).await;

    pool.release(held).await;
    settle().await;

    assert!(first.is_finished());
    assert!(!second.is_finished());
    assert_eq!(pool.stats().waiting(), 1);

    let lease = first.await.unwrap().unwrap();
    pool.release(lease).await;
    let lease = second.await.unwrap().unwrap();
    assert_eq!(in_use_ids(&pool), vec![lease.id()]);
}

#[tokio::test]
async fn test_cancelled_waiter_is_skipped() {
    let (pool, _factory) = pool_with(PoolConfig::new(1, 1)).await;
    let held = pool.acquire().await.unwrap();

    let cancelled = tokio::spawn({
        let pool = pool.clone();
        async move { pool.acquire().await.map(|lease| lease.id()) }
    });
    wait_for_waiters(&pool, 1).await;
    cancelled.abort();
    settle().await;
    assert_eq!(pool.stats().waiting(), 0);

    let live = tokio::spawn({
        let pool = pool.clone();
        async move { pool.acquire().await.map(|lease| lease.id()) }
    });
    wait_for_waiters(&pool, 1).await;

    let id = held.id();
    pool.release(held).await;
    assert_eq!(live.await.unwrap().unwrap(), id);
}

#[tokio::test]
async fn test_recycle_creates_replacement_for_waiter() {
    let (pool, factory) = pool_with(PoolConfig::new(1, 1).with_max_uses(1)).await;
    let held = pool.acquire().await.unwrap();

    let waiter = tokio::spawn({
        let pool = pool.clone();
        async move { pool.acquire().await }
    });
    wait_for_waiters(&pool, 1).await;

    pool.release(held).await;

    let lease = waiter.await.unwrap().unwrap();
    assert_eq!(lease.serial, 1);
    assert_eq!(factory.destroyed(), vec![0]);
    assert_eq!(factory.created(), 2);

    // The replacement is itself worn out after one lease.
    pool.release(lease).await;
    assert_eq!(factory.destroyed(), vec![0, 1]);
    assert_eq!(pool.stats().total(), 0);
}

#[test]
fn test_freed_slot_stays_reserved_for_queued_waiter() {
    let mut state: PoolState<Arc<MockFactory>> = PoolState::new();
    let (id, _) = state.insert(MockConnection { serial: 0 }, Instant::now(), true);
    let (tx, _rx) = tokio::sync::oneshot::channel();
    state.enqueue(tx);

    assert!(state.remove(id).is_some());
    assert!(state.reserve_for_waiter(1));
    // A newcomer cannot take the slot freed for the waiter.
    assert!(!state.reserve(1));

    state.unreserve();
    assert!(state.reserve(1));
}

#[test]
fn test_no_reservation_without_live_waiter() {
    let mut state: PoolState<Arc<MockFactory>> = PoolState::new();
    let (tx, rx) = tokio::sync::oneshot::channel();
    state.enqueue(tx);
    drop(rx);

    assert!(!state.reserve_for_waiter(1));
    assert_eq!(state.available_count(), 0);
}

#[tokio::test]
async fn test_replacement_failure_reaches_waiter() {
    let (pool, factory) = pool_with(PoolConfig::new(1, 1).with_max_uses(1)).await;
    let held = pool.acquire().await.unwrap();

    let waiter = tokio::spawn({
        let pool = pool.clone();
        async move { pool.acquire().await.map(|lease| lease.id()) }
    });
    wait_for_waiters(&pool, 1).await;

    factory.set_fail_creates(true);
    pool.release(held).await;

    let err = waiter.await.unwrap().unwrap_err();
    assert!(matches!(err, PoolError::Creation(_)));
}

#[tokio::test]
async fn test_dropped_lease_is_released() {
    let (pool, _factory) = pool_with(PoolConfig::new(1, 1)).await;

    let lease = pool.acquire().await.unwrap();
    let id = lease.id();
    drop(lease);
    settle().await;

    let stats = pool.stats();
    assert_eq!(stats.available(), 1);
    assert_eq!(stats.connection(id).unwrap().use_count, 1);
    assert_invariants(&pool);
}

#[tokio::test]
async fn test_invariants_hold_under_contention() {
    let (pool, _factory) = pool_with(PoolConfig::new(1, 3).with_max_uses(4)).await;

    let mut workers = Vec::new();
    for worker in 0..8 {
        let pool = pool.clone();
        workers.push(tokio::spawn(async move {
            for round in 0..10 {
                let lease = pool.acquire().await.unwrap();
                for _ in 0..(worker + round) % 3 {
                    tokio::task::yield_now().await;
                }
                assert_invariants(&pool);
                pool.release(lease).await;
            }
        }));
    }

    for _ in 0..200 {
        assert_invariants(&pool);
        let stats = pool.stats();
        assert!(stats.total() <= 3);
        tokio::task::yield_now().await;
    }

    for worker in workers {
        worker.await.unwrap();
    }
    assert_invariants(&pool);
    assert_eq!(pool.stats().in_use(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_leases_exclusive_across_threads() {
    let config = PoolConfig::new(2, 4)
        .with_max_uses(2)
        .with_acquire_timeout_ms(30_000);
    let (pool, factory) = pool_with(config).await;
    let held = Arc::new(parking_lot::Mutex::new(HashSet::new()));

    let mut workers = Vec::new();
    for _ in 0..16 {
        let pool = pool.clone();
        let held = Arc::clone(&held);
        workers.push(tokio::spawn(async move {
            for _ in 0..200 {
                let lease = pool.acquire().await.unwrap();
                assert!(held.lock().insert(lease.id()), "{} leased twice", lease.id());
                assert_invariants(&pool);
                tokio::task::yield_now().await;
                held.lock().remove(&lease.id());
                pool.release(lease).await;
            }
        }));
    }

    for worker in workers {
        worker.await.unwrap();
    }

    let stats = pool.stats();
    assert!(stats.total() <= 4);
    assert_eq!(stats.in_use(), 0);
    assert_eq!(stats.waiting(), 0);
    assert_invariants(&pool);
    // No connection serves more than two leases.
    assert!(factory.created() >= 16 * 200 / 2);
}

// =============================================================================
// Close tests
// =============================================================================

#[tokio::test]
async fn test_close_rejects_waiters_and_destroys_everything() {
    let (pool, factory) = pool_with(PoolConfig::new(1, 2)).await;
    let first = pool.acquire().await.unwrap();
    let second = pool.acquire().await.unwrap();

    let waiter = tokio::spawn({
        let pool = pool.clone();
        async move { pool.acquire().await.map(|lease| lease.id()) }
    });
    wait_for_waiters(&pool, 1).await;

    pool.close().await;

    assert_eq!(waiter.await.unwrap(), Err(PoolError::Closed));
    let stats = pool.stats();
    assert_eq!(stats.total(), 0);
    assert_eq!(stats.available(), 0);
    assert_eq!(stats.in_use(), 0);
    assert_eq!(stats.waiting(), 0);
    assert_eq!(factory.destroyed().len(), 2);
    assert!(pool.is_closed());

    // Leases that outlived the pool are ignored on release.
    pool.release(first).await;
    drop(second);
    settle().await;
    assert_eq!(pool.stats().total(), 0);
    assert_eq!(factory.destroyed().len(), 2);

    assert_eq!(pool.acquire().await.unwrap_err(), PoolError::Closed);
    pool.close().await;
}

// =============================================================================
// Scoped query tests
// =============================================================================

#[derive(Debug, PartialEq)]
enum QueryError {
    Pool(PoolError),
    Rejected(&'static str),
}

impl From<PoolError> for QueryError {
    fn from(err: PoolError) -> Self {
        QueryError::Pool(err)
    }
}

#[tokio::test]
async fn test_query_returns_result_and_releases() {
    let (pool, _factory) = pool_with(PoolConfig::new(1, 1)).await;

    let serial = pool
        .query(|conn| Box::pin(async move { Ok::<_, QueryError>(conn.serial) }))
        .await
        .unwrap();

    assert_eq!(serial, 0);
    let stats = pool.stats();
    assert_eq!(stats.available(), 1);
    assert_eq!(stats.connections()[0].use_count, 1);
}

#[tokio::test]
async fn test_query_releases_before_propagating_error() {
    let (pool, _factory) = pool_with(PoolConfig::new(1, 1)).await;

    let result: Result<(), QueryError> = pool
        .query(|_conn| Box::pin(async move { Err(QueryError::Rejected("constraint violated")) }))
        .await;

    assert_eq!(result, Err(QueryError::Rejected("constraint violated")));
    assert_eq!(pool.stats().available(), 1);
    assert_eq!(pool.stats().in_use(), 0);
}

#[tokio::test]
async fn test_query_converts_acquire_failure() {
    let (pool, _factory) = pool_with(PoolConfig::new(1, 1)).await;
    pool.close().await;

    let result: Result<usize, QueryError> = pool
        .query(|conn| Box::pin(async move { Ok(conn.serial) }))
        .await;

    assert_eq!(result, Err(QueryError::Pool(PoolError::Closed)));
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_query_releases_connection() {
    let (pool, _factory) = pool_with(PoolConfig::new(1, 1)).await;

    let slow = pool.query(|_conn| {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, QueryError>(())
        })
    });
    let outcome = tokio::time::timeout(Duration::from_millis(100), slow).await;
    assert!(outcome.is_err());

    settle().await;
    assert_eq!(pool.stats().available(), 1);
    assert_eq!(pool.stats().in_use(), 0);
}
