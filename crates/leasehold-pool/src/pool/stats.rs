//! Pool statistics types

use chrono::{DateTime, Utc};
use leasehold_core::ConnectionId;
use serde::{Deserialize, Serialize};

/// Point-in-time detail for a single pooled connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStats {
    pub id: ConnectionId,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    /// Number of completed leases
    pub use_count: u64,
    pub is_healthy: bool,
    pub is_in_use: bool,
}

/// Statistics about a connection pool's current state
///
/// A read-only snapshot; it does not track the pool after it is taken.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PoolStats {
    /// Total number of connections (available + in use)
    total: usize,
    /// Number of idle connections available in the pool
    available: usize,
    /// Number of connections currently leased
    in_use: usize,
    /// Number of acquire requests waiting for a connection
    waiting: usize,
    /// Per-connection detail, ordered by id
    connections: Vec<ConnectionStats>,
}

impl PoolStats {
    /// Create new pool statistics
    pub fn new(
        available: usize,
        in_use: usize,
        waiting: usize,
        connections: Vec<ConnectionStats>,
    ) -> Self {
        Self {
            total: available + in_use,
            available,
            in_use,
            waiting,
            connections,
        }
    }

    /// Get the total number of connections
    pub fn total(&self) -> usize {
        self.total
    }

    /// Get the number of available connections
    pub fn available(&self) -> usize {
        self.available
    }

    /// Get the number of in-use connections
    pub fn in_use(&self) -> usize {
        self.in_use
    }

    /// Get the number of waiting requests
    pub fn waiting(&self) -> usize {
        self.waiting
    }

    pub fn connections(&self) -> &[ConnectionStats] {
        &self.connections
    }

    /// Look up the detail for one connection
    pub fn connection(&self, id: ConnectionId) -> Option<&ConnectionStats> {
        self.connections.iter().find(|c| c.id == id)
    }

    /// Calculate pool utilization as a fraction (0.0 to 1.0)
    ///
    /// Returns 0.0 if total is 0 to avoid division by zero.
    pub fn utilization(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.in_use as f64 / self.total as f64
        }
    }

    /// Check if the pool is fully utilized (all connections in use)
    pub fn is_full(&self) -> bool {
        self.available == 0 && self.total > 0
    }
}
