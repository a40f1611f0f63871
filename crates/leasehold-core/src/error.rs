//! Error types for leasehold

use std::time::Duration;

use thiserror::Error;

use crate::ConnectionId;

/// Error type for pool operations
///
/// `Clone` so a single failure (for example a pool shutdown) can be delivered
/// to every queued acquirer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// The factory could not produce a usable connection.
    #[error("Connection creation failed: {0}")]
    Creation(String),

    /// No connection became available before the acquire deadline.
    #[error("Timed out waiting for a connection after {0:?}")]
    AcquireTimeout(Duration),

    /// A connection failed its liveness check. Handled inside the pool.
    #[error("Connection {0} failed validation")]
    Validation(ConnectionId),

    /// The pool has been closed.
    #[error("Pool is closed")]
    Closed,

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl PoolError {
    /// Wrap a factory error, keeping its context chain in the message.
    pub fn creation(err: anyhow::Error) -> Self {
        PoolError::Creation(format!("{:#}", err))
    }

    /// Whether the caller may reasonably retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PoolError::AcquireTimeout(_) | PoolError::Creation(_))
    }
}

/// Result type alias for pool operations
pub type Result<T> = std::result::Result<T, PoolError>;
