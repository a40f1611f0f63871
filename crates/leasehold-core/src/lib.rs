//! Leasehold Core - Shared abstractions for the connection pool
//!
//! This crate defines the pieces every other leasehold crate depends on:
//!
//! - `ConnectionFactory` - The capability a backend supplies to the pool
//! - `ConnectionId` - Identifier of a pooled connection record
//! - `PoolError` - Error type surfaced by pool operations

mod connection;
mod error;

pub use connection::*;
pub use error::*;
