//! Mock factory shared by the unit tests

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use leasehold_core::{ConnectionFactory, ConnectionId};
use parking_lot::Mutex;

use crate::pool::ConnectionPool;

/// Mock connection identified by its creation order
#[derive(Debug)]
pub(crate) struct MockConnection {
    pub(crate) serial: usize,
}

/// Mock factory that counts calls and can be told to fail
pub(crate) struct MockFactory {
    created: AtomicUsize,
    destroyed: Mutex<Vec<usize>>,
    invalid: Mutex<HashSet<usize>>,
    fail_creates: AtomicBool,
}

impl MockFactory {
    pub(crate) fn new() -> Self {
        Self {
            created: AtomicUsize::new(0),
            destroyed: Mutex::new(Vec::new()),
            invalid: Mutex::new(HashSet::new()),
            fail_creates: AtomicBool::new(false),
        }
    }

    pub(crate) fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub(crate) fn destroyed(&self) -> Vec<usize> {
        self.destroyed.lock().clone()
    }

    /// Make validation of the connection with this serial fail from now on
    pub(crate) fn invalidate(&self, serial: usize) {
        self.invalid.lock().insert(serial);
    }

    pub(crate) fn set_fail_creates(&self, fail: bool) {
        self.fail_creates.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ConnectionFactory for MockFactory {
    type Connection = MockConnection;

    async fn create(&self) -> anyhow::Result<MockConnection> {
        if self.fail_creates.load(Ordering::SeqCst) {
            anyhow::bail!("backend unreachable");
        }
        let serial = self.created.fetch_add(1, Ordering::SeqCst);
        Ok(MockConnection { serial })
    }

    async fn validate(&self, conn: &MockConnection) -> bool {
        !self.invalid.lock().contains(&conn.serial)
    }

    async fn destroy(&self, conn: &MockConnection) {
        self.destroyed.lock().push(conn.serial);
    }
}

/// Let spawned tasks (background releases, waiters) make progress.
pub(crate) async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

/// Yield until `count` acquirers are queued.
pub(crate) async fn wait_for_waiters<F: ConnectionFactory>(pool: &ConnectionPool<F>, count: usize) {
    for _ in 0..1000 {
        if pool.stats().waiting() == count {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!(
        "expected {} waiters, found {}",
        count,
        pool.stats().waiting()
    );
}

pub(crate) fn assert_invariants<F: ConnectionFactory>(pool: &ConnectionPool<F>) {
    pool.shared()
        .state
        .lock()
        .assert_invariants(pool.config().max_connections());
}

pub(crate) fn in_use_ids<F: ConnectionFactory>(pool: &ConnectionPool<F>) -> Vec<ConnectionId> {
    pool.stats()
        .connections()
        .iter()
        .filter(|c| c.is_in_use)
        .map(|c| c.id)
        .collect()
}
