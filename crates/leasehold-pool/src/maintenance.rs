//! Background maintenance for idle connections
//!
//! Two sweeps run on their own timers, independently of callers:
//!
//! - the health check validates every idle connection and evicts those that
//!   fail or have been idle longer than `idle_timeout`
//! - the idle cleanup is a coarser backstop evicting connections idle longer
//!   than twice `idle_timeout`
//!
//! Sweeps only ever look at connections sitting in the available set. Both
//! can also be run on demand:
//!
//! ```ignore
//! let report = pool.run_health_check().await;
//! println!("evicted {} unhealthy connections", report.evicted_unhealthy);
//! ```

mod scheduler;
mod sweep;


pub(crate) use scheduler::{MaintenanceHandle, start};
pub use sweep::{SweepKind, SweepReport};
