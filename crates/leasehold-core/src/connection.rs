//! Connection factory trait and connection identifiers

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Identifier of a connection record inside a pool
///
/// Ids are assigned by the pool in creation order and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw numeric value
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Capability supplied by a backend so the pool can manage its handles
///
/// The pool contains no backend-specific logic. It only calls these three
/// operations, never while holding its internal lock.
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    /// The opaque backend handle
    type Connection: Send + Sync + 'static;

    /// Create a new connection
    async fn create(&self) -> anyhow::Result<Self::Connection>;

    /// Validate that a connection is still usable
    ///
    /// Default implementation always returns true.
    async fn validate(&self, _conn: &Self::Connection) -> bool {
        true
    }

    /// Tear down a connection before the pool drops it
    ///
    /// Default implementation does nothing and lets the handle drop.
    async fn destroy(&self, _conn: &Self::Connection) {}
}

#[async_trait]
impl<T: ConnectionFactory> ConnectionFactory for Arc<T> {
    type Connection = T::Connection;

    async fn create(&self) -> anyhow::Result<Self::Connection> {
        (**self).create().await
    }

    async fn validate(&self, conn: &Self::Connection) -> bool {
        (**self).validate(conn).await
    }

    async fn destroy(&self, conn: &Self::Connection) {
        (**self).destroy(conn).await
    }
}
