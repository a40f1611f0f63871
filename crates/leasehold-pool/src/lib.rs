//! Leasehold Pool - Bounded connection pooling
//!
//! This crate caps the number of simultaneous backend connections, shares
//! them between concurrent callers, queues callers in arrival order when all
//! connections are leased, and retires connections that fail validation,
//! sit idle too long, or reach their use limit.
//!
//! Backends plug in through [`leasehold_core::ConnectionFactory`].

pub mod maintenance;
pub mod pool;

#[cfg(test)]
mod test_support;

pub use leasehold_core::{ConnectionFactory, ConnectionId, PoolError, Result};
pub use maintenance::{SweepKind, SweepReport};
pub use pool::{ConnectionPool, ConnectionStats, Lease, PoolConfig, PoolStats};
