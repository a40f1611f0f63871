//! Scoped query facade

use futures::future::BoxFuture;
use leasehold_core::{ConnectionFactory, PoolError};

use super::pool::ConnectionPool;

impl<F: ConnectionFactory> ConnectionPool<F> {
    /// Run `operation` against a pooled connection
    ///
    /// The connection is acquired before the operation starts and released
    /// once it finishes, whether it succeeds or fails. If the returned future
    /// is dropped mid-operation the lease is released in the background.
    /// Acquire failures are converted into the operation's error type.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let rows = pool
    ///     .query(|conn| Box::pin(async move { conn.fetch_rows("users").await }))
    ///     .await?;
    /// ```
    pub async fn query<T, E, Op>(&self, operation: Op) -> Result<T, E>
    where
        Op: for<'c> FnOnce(&'c F::Connection) -> BoxFuture<'c, Result<T, E>>,
        E: From<PoolError>,
    {
        let lease = self.acquire().await?;
        let result = operation(&*lease).await;
        self.release(lease).await;
        result
    }
}
