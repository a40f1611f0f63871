//! Pool internals synchronized with a mutex
//!
//! Every method here runs while the caller holds the pool lock, so none of
//! them await. Factory calls (create, validate, destroy) happen outside.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use leasehold_core::{ConnectionFactory, ConnectionId, PoolError, Result};
use tokio::sync::oneshot;
use tokio::time::Instant;

use super::lease::Lease;
use super::pool::Shared;
use super::stats::{ConnectionStats, PoolStats};

/// Channel end used to hand a lease (or a failure) to a queued acquirer
pub(crate) type Grant<F> = oneshot::Sender<Result<Lease<F>>>;

/// A connection record, owned by the pool for the connection's lifetime
pub(crate) struct Record<C> {
    pub(crate) connection: Arc<C>,
    pub(crate) created_at: Instant,
    pub(crate) last_used_at: Instant,
    pub(crate) use_count: u64,
    pub(crate) is_healthy: bool,
    pub(crate) is_in_use: bool,
}

impl<C> Record<C> {
    fn new(connection: C, now: Instant, in_use: bool) -> Self {
        Self {
            connection: Arc::new(connection),
            created_at: now,
            last_used_at: now,
            use_count: 0,
            is_healthy: true,
            is_in_use: in_use,
        }
    }

    fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_used_at)
    }
}

/// An acquire request parked until a connection is released
pub(crate) struct Waiter<F: ConnectionFactory> {
    pub(crate) ticket: u64,
    pub(crate) tx: Grant<F>,
}

/// Mutable pool state
pub(crate) struct PoolState<F: ConnectionFactory> {
    connections: HashMap<ConnectionId, Record<F::Connection>>,
    /// Idle connection ids; the most recently returned is at the end
    available: Vec<ConnectionId>,
    in_use: HashSet<ConnectionId>,
    waiting: VecDeque<Waiter<F>>,
    /// Creation slots reserved while a factory call is in flight
    pending_creates: usize,
    next_id: u64,
    next_ticket: u64,
    closed: bool,
}

impl<F: ConnectionFactory> PoolState<F> {
    pub(crate) fn new() -> Self {
        Self {
            connections: HashMap::new(),
            available: Vec::new(),
            in_use: HashSet::new(),
            waiting: VecDeque::new(),
            pending_creates: 0,
            next_id: 1,
            next_ticket: 1,
            closed: false,
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    /// Pop the most recently returned idle connection and mark it leased.
    pub(crate) fn take_available(
        &mut self,
        now: Instant,
    ) -> Option<(ConnectionId, Arc<F::Connection>)> {
        while let Some(id) = self.available.pop() {
            let Some(record) = self.connections.get_mut(&id) else {
                continue;
            };
            record.is_in_use = true;
            record.last_used_at = now;
            self.in_use.insert(id);
            return Some((id, Arc::clone(&record.connection)));
        }
        None
    }

    /// Reserve a creation slot if the pool is below its cap.
    pub(crate) fn reserve(&mut self, max_connections: usize) -> bool {
        if self.closed || self.connections.len() + self.pending_creates >= max_connections {
            return false;
        }
        self.pending_creates += 1;
        true
    }

    /// Reserve a creation slot on behalf of queued acquirers, if any.
    pub(crate) fn reserve_for_waiter(&mut self, max_connections: usize) -> bool {
        self.live_waiters() > 0 && self.reserve(max_connections)
    }

    /// Number of idle connections
    pub(crate) fn available_count(&self) -> usize {
        self.available.len()
    }

    pub(crate) fn unreserve(&mut self) {
        self.pending_creates = self.pending_creates.saturating_sub(1);
    }

    /// Add a freshly created connection to the pool.
    pub(crate) fn insert(
        &mut self,
        connection: F::Connection,
        now: Instant,
        in_use: bool,
    ) -> (ConnectionId, Arc<F::Connection>) {
        let id = ConnectionId::new(self.next_id);
        self.next_id += 1;

        let record = Record::new(connection, now, in_use);
        let connection = Arc::clone(&record.connection);
        self.connections.insert(id, record);
        if in_use {
            self.in_use.insert(id);
        } else {
            self.available.push(id);
        }
        (id, connection)
    }

    /// Register a blocked acquire. Returns its ticket.
    pub(crate) fn enqueue(&mut self, tx: Grant<F>) -> u64 {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.waiting.push_back(Waiter { ticket, tx });
        ticket
    }

    /// Remove a waiter whose deadline fired. Returns false if it was
    /// already serviced.
    pub(crate) fn remove_waiter(&mut self, ticket: u64) -> bool {
        match self.waiting.iter().position(|w| w.ticket == ticket) {
            Some(index) => {
                self.waiting.remove(index);
                true
            }
            None => false,
        }
    }

    /// Number of waiters whose acquire is still pending
    pub(crate) fn live_waiters(&self) -> usize {
        self.waiting.iter().filter(|w| !w.tx.is_closed()).count()
    }

    /// Count one completed lease. Returns the new use count, or `None`
    /// if the id is not (or no longer) a leased connection.
    pub(crate) fn record_use(&mut self, id: ConnectionId, now: Instant) -> Option<u64> {
        if !self.in_use.contains(&id) {
            return None;
        }
        let record = self.connections.get_mut(&id)?;
        record.last_used_at = now;
        record.use_count += 1;
        Some(record.use_count)
    }

    /// Drop a record from every index.
    pub(crate) fn remove(&mut self, id: ConnectionId) -> Option<Arc<F::Connection>> {
        let record = self.connections.remove(&id)?;
        self.in_use.remove(&id);
        self.available.retain(|&other| other != id);
        Some(record.connection)
    }

    /// Give a leased connection to the oldest live waiter, or park it in
    /// the available set if nobody is waiting.
    ///
    /// Returns the ticket of the waiter that received it.
    pub(crate) fn hand_off(
        &mut self,
        id: ConnectionId,
        shared: &Arc<Shared<F>>,
        now: Instant,
    ) -> Option<u64> {
        let connection = Arc::clone(&self.connections.get(&id)?.connection);

        while let Some(waiter) = self.waiting.pop_front() {
            let lease = Lease::new(id, Arc::clone(&connection), Arc::clone(shared));
            match waiter.tx.send(Ok(lease)) {
                Ok(()) => {
                    if let Some(record) = self.connections.get_mut(&id) {
                        record.last_used_at = now;
                    }
                    return Some(waiter.ticket);
                }
                // Acquirer went away; take the lease back without releasing it.
                Err(returned) => {
                    if let Ok(mut lease) = returned {
                        lease.disarm();
                    }
                }
            }
        }

        if let Some(record) = self.connections.get_mut(&id) {
            record.is_in_use = false;
        }
        self.in_use.remove(&id);
        self.available.push(id);
        None
    }

    /// Deliver a failure to the oldest live waiter.
    pub(crate) fn fail_oldest_waiter(&mut self, err: PoolError) -> bool {
        while let Some(waiter) = self.waiting.pop_front() {
            if waiter.tx.send(Err(err.clone())).is_ok() {
                return true;
            }
        }
        false
    }

    /// Mark the pool closed and take everything it holds.
    pub(crate) fn shut_down(&mut self) -> (Vec<Arc<F::Connection>>, Vec<Waiter<F>>) {
        self.closed = true;
        self.available.clear();
        self.in_use.clear();
        let connections = self
            .connections
            .drain()
            .map(|(_, record)| record.connection)
            .collect();
        let waiters = self.waiting.drain(..).collect();
        (connections, waiters)
    }

    /// Remove idle connections that have not been used for longer than
    /// `threshold`.
    pub(crate) fn evict_idle(
        &mut self,
        now: Instant,
        threshold: Duration,
    ) -> Vec<(ConnectionId, Arc<F::Connection>)> {
        let expired: Vec<ConnectionId> = self
            .available
            .iter()
            .copied()
            .filter(|id| {
                self.connections
                    .get(id)
                    .is_some_and(|record| record.idle_for(now) > threshold)
            })
            .collect();

        expired
            .into_iter()
            .filter_map(|id| self.remove(id).map(|conn| (id, conn)))
            .collect()
    }

    /// Snapshot of the idle connections, for validation outside the lock.
    pub(crate) fn idle_connections(&self) -> Vec<(ConnectionId, Arc<F::Connection>)> {
        self.available
            .iter()
            .filter_map(|id| {
                self.connections
                    .get(id)
                    .map(|record| (*id, Arc::clone(&record.connection)))
            })
            .collect()
    }

    /// Remove a connection that failed a sweep validation, unless it was
    /// borrowed in the meantime.
    pub(crate) fn remove_unhealthy(&mut self, id: ConnectionId) -> Option<Arc<F::Connection>> {
        if !self.available.contains(&id) {
            return None;
        }
        if let Some(record) = self.connections.get_mut(&id) {
            record.is_healthy = false;
        }
        self.remove(id)
    }

    pub(crate) fn stats(&self, now: Instant) -> PoolStats {
        let wall_now = chrono::Utc::now();
        let to_wall = |instant: Instant| {
            let elapsed = now.saturating_duration_since(instant);
            wall_now - chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero())
        };

        let mut connections: Vec<ConnectionStats> = self
            .connections
            .iter()
            .map(|(id, record)| ConnectionStats {
                id: *id,
                created_at: to_wall(record.created_at),
                last_used_at: to_wall(record.last_used_at),
                use_count: record.use_count,
                is_healthy: record.is_healthy,
                is_in_use: record.is_in_use,
            })
            .collect();
        connections.sort_by_key(|c| c.id);

        PoolStats::new(
            self.available.len(),
            self.in_use.len(),
            self.live_waiters(),
            connections,
        )
    }

    /// Panic if the partition invariants do not hold.
    #[cfg(test)]
    pub(crate) fn assert_invariants(&self, max_connections: usize) {
        assert!(self.connections.len() <= max_connections);
        assert_eq!(self.available.len() + self.in_use.len(), self.connections.len());
        for id in &self.available {
            assert!(!self.in_use.contains(id), "{} is both available and in use", id);
            assert!(!self.connections[id].is_in_use);
        }
        for id in &self.in_use {
            assert!(self.connections[id].is_in_use);
        }
    }
}
