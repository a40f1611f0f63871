//! Leased connection guard

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use leasehold_core::{ConnectionFactory, ConnectionId};

use super::pool::Shared;

/// A connection borrowed from the pool
///
/// The pool keeps ownership of the connection; the lease only derefs to it.
/// Hand it back with [`ConnectionPool::release`](super::ConnectionPool::release).
/// A lease that is dropped instead is released by a task spawned on the
/// current Tokio runtime.
pub struct Lease<F: ConnectionFactory> {
    id: ConnectionId,
    connection: Arc<F::Connection>,
    /// `None` once the lease has been returned
    pool: Option<Arc<Shared<F>>>,
}

impl<F: ConnectionFactory> Lease<F> {
    pub(crate) fn new(
        id: ConnectionId,
        connection: Arc<F::Connection>,
        pool: Arc<Shared<F>>,
    ) -> Self {
        Self {
            id,
            connection,
            pool: Some(pool),
        }
    }

    /// Id of the leased connection record
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Detach the lease from its pool so dropping it does nothing.
    pub(crate) fn disarm(&mut self) -> Option<Arc<Shared<F>>> {
        self.pool.take()
    }

    pub(crate) fn connection(&self) -> &Arc<F::Connection> {
        &self.connection
    }

    pub(crate) fn belongs_to(&self, pool: &Arc<Shared<F>>) -> bool {
        self.pool.as_ref().is_some_and(|own| Arc::ptr_eq(own, pool))
    }
}

impl<F: ConnectionFactory> Deref for Lease<F> {
    type Target = F::Connection;

    fn deref(&self) -> &Self::Target {
        &self.connection
    }
}

impl<F: ConnectionFactory> fmt::Debug for Lease<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("id", &self.id)
            .field("released", &self.pool.is_none())
            .finish()
    }
}

impl<F: ConnectionFactory> Drop for Lease<F> {
    fn drop(&mut self) {
        let Some(pool) = self.pool.take() else {
            return;
        };
        let id = self.id;
        let connection = Arc::clone(&self.connection);

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                tracing::debug!(connection_id = %id, "lease dropped, releasing in background");
                runtime.spawn(async move {
                    pool.release_connection(id, connection).await;
                });
            }
            Err(_) => {
                tracing::warn!(
                    connection_id = %id,
                    "lease dropped outside a Tokio runtime, retiring connection"
                );
                pool.retire(id);
            }
        }
    }
}
