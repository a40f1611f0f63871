//! Connection pooling
//!
//! This module provides the bounded connection pool: configurable sizing,
//! FIFO waiting with acquire timeouts, validation, recycling after a number
//! of uses, and statistics.
//!
//! # Example
//!
//! ```ignore
//! use leasehold_pool::{ConnectionPool, PoolConfig};
//!
//! let config = PoolConfig::new(2, 10)
//!     .with_acquire_timeout_ms(5000)
//!     .with_max_uses(500);
//!
//! let pool = ConnectionPool::new(config, factory).await?;
//! let conn = pool.acquire().await?;
//! // Use connection...
//! pool.release(conn).await;
//! ```

mod config;
mod lease;
#[allow(clippy::module_inception)]
mod pool;
mod query;
mod state;
mod stats;

#[cfg(test)]
mod tests;

pub use config::PoolConfig;
pub use lease::Lease;
pub use pool::ConnectionPool;
pub(crate) use pool::Shared;
pub use stats::{ConnectionStats, PoolStats};
