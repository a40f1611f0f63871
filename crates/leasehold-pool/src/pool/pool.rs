//! Connection pool implementation

use std::sync::Arc;

use leasehold_core::{ConnectionFactory, ConnectionId, PoolError, Result};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;

use super::config::PoolConfig;
use super::lease::Lease;
use super::state::PoolState;
use super::stats::PoolStats;
use crate::maintenance::{self, MaintenanceHandle};

/// State shared between pool handles, leases and maintenance tasks
pub(crate) struct Shared<F: ConnectionFactory> {
    pub(crate) config: PoolConfig,
    pub(crate) factory: F,
    pub(crate) state: Mutex<PoolState<F>>,
    maintenance: Mutex<Option<MaintenanceHandle>>,
}

/// Outcome of the locked part of an acquire attempt
enum Step<F: ConnectionFactory> {
    Borrowed(Lease<F>),
    Create(Reservation<F>),
    Wait(u64, oneshot::Receiver<Result<Lease<F>>>),
}

/// A creation slot counted against `max_connections` while the factory runs
///
/// Dropping an armed reservation (for example when the acquiring task is
/// cancelled mid-create) gives the slot back.
struct Reservation<F: ConnectionFactory> {
    shared: Arc<Shared<F>>,
    armed: bool,
}

impl<F: ConnectionFactory> Drop for Reservation<F> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        // With waiters queued the slot passes straight to a replacement
        // create, so no new acquire can claim it first.
        let hand_over = {
            let mut state = self.shared.state.lock();
            let waiting = state.live_waiters() > 0;
            if !waiting {
                state.unreserve();
            }
            waiting
        };
        if hand_over {
            self.shared.spawn_replacement();
        }
    }
}

impl<F: ConnectionFactory> Shared<F> {
    /// Create a connection for a reserved slot and lease it to the caller.
    async fn create_leased(self: &Arc<Self>, mut reservation: Reservation<F>) -> Result<Lease<F>> {
        let created = self.factory.create().await;

        let connection = match created {
            Ok(connection) => connection,
            Err(e) => {
                let err = PoolError::creation(e);
                tracing::warn!(error = %err, "failed to create connection");
                // The armed reservation returns the slot and wakes a waiter.
                drop(reservation);
                return Err(err);
            }
        };

        let inserted = {
            let mut state = self.state.lock();
            reservation.armed = false;
            state.unreserve();
            if state.is_closed() {
                Err(connection)
            } else {
                Ok(state.insert(connection, Instant::now(), true))
            }
        };

        match inserted {
            Ok((id, connection)) => {
                tracing::debug!(connection_id = %id, "created connection");
                Ok(Lease::new(id, connection, Arc::clone(self)))
            }
            Err(connection) => {
                self.factory.destroy(&connection).await;
                Err(PoolError::Closed)
            }
        }
    }

    /// Wait for a queued acquire to be serviced or for its deadline.
    async fn wait_for_hand_off(
        &self,
        ticket: u64,
        mut rx: oneshot::Receiver<Result<Lease<F>>>,
    ) -> Result<Lease<F>> {
        let timeout = self.config.acquire_timeout();

        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(granted)) => granted,
            Ok(Err(_)) => Err(PoolError::Closed),
            Err(_) => {
                let dequeued = { self.state.lock().remove_waiter(ticket) };
                if !dequeued {
                    // Serviced at the same moment the deadline fired.
                    if let Ok(granted) = rx.try_recv() {
                        return granted;
                    }
                }
                tracing::debug!(timeout_ms = timeout.as_millis() as u64, "acquire timed out");
                Err(PoolError::AcquireTimeout(timeout))
            }
        }
    }

    /// Check a borrowed connection before handing it out.
    async fn validate_borrowed(self: &Arc<Self>, mut lease: Lease<F>) -> Result<Lease<F>> {
        if !self.config.validate_on_borrow() || self.factory.validate(&*lease).await {
            return Ok(lease);
        }

        let id = lease.id();
        lease.disarm();
        self.discard(id).await;
        Err(PoolError::Validation(id))
    }

    /// Remove a connection from the pool, destroy it, and let a queued
    /// acquirer use the freed capacity.
    async fn discard(self: &Arc<Self>, id: ConnectionId) {
        let (removed, replace) = {
            let mut state = self.state.lock();
            let removed = state.remove(id);
            let replace =
                removed.is_some() && state.reserve_for_waiter(self.config.max_connections());
            (removed, replace)
        };
        if replace {
            self.spawn_replacement();
        }
        if let Some(connection) = removed {
            self.factory.destroy(&connection).await;
        }
    }

    /// Return a leased connection: count the use, then recycle it, drop it
    /// after a failed validation, or hand it on.
    pub(crate) async fn release_connection(
        self: &Arc<Self>,
        id: ConnectionId,
        connection: Arc<F::Connection>,
    ) {
        let use_count = { self.state.lock().record_use(id, Instant::now()) };
        let Some(use_count) = use_count else {
            tracing::debug!(connection_id = %id, "ignoring release of unknown connection");
            return;
        };

        if use_count >= self.config.max_uses() {
            tracing::debug!(connection_id = %id, use_count, "recycling connection");
            self.discard(id).await;
            return;
        }

        if self.config.validate_on_return() && !self.factory.validate(&connection).await {
            tracing::debug!(connection_id = %id, "connection failed validation on return");
            self.discard(id).await;
            return;
        }

        let served = {
            let mut state = self.state.lock();
            state.hand_off(id, self, Instant::now())
        };
        if let Some(ticket) = served {
            tracing::trace!(connection_id = %id, ticket, "handed connection to waiter");
        }
    }

    /// Drop a record without calling the factory. Used when no runtime is
    /// available to run the asynchronous release path.
    pub(crate) fn retire(&self, id: ConnectionId) {
        self.state.lock().remove(id);
    }

    /// Create a connection in the background for the oldest queued acquirer.
    ///
    /// The caller must already hold a creation slot for it.
    fn spawn_replacement(self: &Arc<Self>) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            self.state.lock().unreserve();
            return;
        };

        let shared = Arc::clone(self);
        runtime.spawn(async move {
            let created = shared.factory.create().await;

            let leftover = {
                let mut state = shared.state.lock();
                state.unreserve();
                match created {
                    Ok(connection) if !state.is_closed() => {
                        let (id, _) = state.insert(connection, Instant::now(), true);
                        state.hand_off(id, &shared, Instant::now());
                        None
                    }
                    Ok(connection) => Some(connection),
                    Err(e) => {
                        let err = PoolError::creation(e);
                        tracing::warn!(error = %err, "failed to create replacement connection");
                        state.fail_oldest_waiter(err);
                        None
                    }
                }
            };

            if let Some(connection) = leftover {
                shared.factory.destroy(&connection).await;
            }
        });
    }
}

/// A bounded pool of backend connections
///
/// The pool caps the number of simultaneous connections, reuses them across
/// callers, queues callers fairly (first come, first served) when every
/// connection is leased, and evicts unhealthy, stale or worn-out connections.
///
/// Cloning the pool is cheap; clones share the same connections.
pub struct ConnectionPool<F: ConnectionFactory> {
    shared: Arc<Shared<F>>,
}

impl<F: ConnectionFactory> Clone for ConnectionPool<F> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<F: ConnectionFactory> ConnectionPool<F> {
    /// Create a new connection pool with the given configuration and factory
    ///
    /// Eagerly creates `min_connections` connections concurrently and starts
    /// the maintenance tasks. Must be called from within a Tokio runtime.
    /// If any eager creation fails, the connections that did succeed are
    /// destroyed and the error is returned.
    #[tracing::instrument(skip_all, fields(
        min = config.min_connections(),
        max = config.max_connections(),
    ))]
    pub async fn new(config: PoolConfig, factory: F) -> Result<Self> {
        config.validate()?;

        let shared = Arc::new(Shared {
            config,
            factory,
            state: Mutex::new(PoolState::new()),
            maintenance: Mutex::new(None),
        });

        let min = shared.config.min_connections();
        let results =
            futures::future::join_all((0..min).map(|_| shared.factory.create())).await;

        let mut created = Vec::with_capacity(min);
        let mut failure = None;
        for result in results {
            match result {
                Ok(connection) => created.push(connection),
                Err(e) => {
                    failure.get_or_insert_with(|| PoolError::creation(e));
                }
            }
        }

        if let Some(err) = failure {
            tracing::error!(error = %err, "failed to initialize pool");
            for connection in &created {
                shared.factory.destroy(connection).await;
            }
            return Err(err);
        }

        {
            let mut state = shared.state.lock();
            let now = Instant::now();
            for connection in created {
                state.insert(connection, now, false);
            }
        }

        *shared.maintenance.lock() = Some(maintenance::start(&shared));

        tracing::info!("connection pool initialized");
        Ok(Self { shared })
    }

    /// Get a connection from the pool
    ///
    /// This will:
    /// 1. Reuse an available connection, validating it first if
    ///    `validate_on_borrow` is set (failures are destroyed and skipped)
    /// 2. If none is available and the pool is below `max_connections`,
    ///    create a new connection
    /// 3. Otherwise wait, behind earlier waiters, until a connection is
    ///    released or `acquire_timeout` elapses
    pub async fn acquire(&self) -> Result<Lease<F>> {
        let shared = &self.shared;

        loop {
            let step = {
                let mut state = shared.state.lock();
                if state.is_closed() {
                    return Err(PoolError::Closed);
                }

                if let Some((id, connection)) = state.take_available(Instant::now()) {
                    Step::Borrowed(Lease::new(id, connection, Arc::clone(shared)))
                } else if state.reserve(shared.config.max_connections()) {
                    Step::Create(Reservation {
                        shared: Arc::clone(shared),
                        armed: true,
                    })
                } else {
                    let (tx, rx) = oneshot::channel();
                    Step::Wait(state.enqueue(tx), rx)
                }
            };

            match step {
                Step::Borrowed(lease) => match shared.validate_borrowed(lease).await {
                    Ok(lease) => return Ok(lease),
                    Err(PoolError::Validation(id)) => {
                        tracing::debug!(connection_id = %id, "discarded invalid connection on borrow");
                        continue;
                    }
                    Err(e) => return Err(e),
                },
                Step::Create(reservation) => return shared.create_leased(reservation).await,
                Step::Wait(ticket, rx) => return shared.wait_for_hand_off(ticket, rx).await,
            }
        }
    }

    /// Return a leased connection to the pool
    ///
    /// Leases of a closed pool (or of another pool) are ignored here; a
    /// foreign lease still finds its way home when it is dropped.
    pub async fn release(&self, mut lease: Lease<F>) {
        if !lease.belongs_to(&self.shared) {
            return;
        }
        let connection = Arc::clone(lease.connection());
        lease.disarm();
        self.shared.release_connection(lease.id(), connection).await;
    }

    /// Close the pool
    ///
    /// Stops maintenance, fails every queued acquire with
    /// [`PoolError::Closed`] and destroys every connection, including leased
    /// ones. Closing twice is a no-op.
    #[tracing::instrument(skip_all)]
    pub async fn close(&self) {
        let (connections, waiters) = {
            let mut state = self.shared.state.lock();
            if state.is_closed() {
                return;
            }
            state.shut_down()
        };

        if let Some(handle) = self.shared.maintenance.lock().take() {
            handle.stop();
        }

        let rejected = waiters.len();
        for waiter in waiters {
            let _ = waiter.tx.send(Err(PoolError::Closed));
        }

        let destroyed = connections.len();
        for connection in connections {
            self.shared.factory.destroy(&connection).await;
        }

        tracing::info!(destroyed, rejected, "connection pool closed");
    }

    /// Check whether the pool has been closed
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().is_closed()
    }

    /// Get current pool statistics
    pub fn stats(&self) -> PoolStats {
        self.shared.state.lock().stats(Instant::now())
    }

    /// Get the pool configuration
    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    pub(crate) fn shared(&self) -> &Arc<Shared<F>> {
        &self.shared
    }
}
