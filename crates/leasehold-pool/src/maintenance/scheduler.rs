//! Periodic execution of the maintenance sweeps

use std::sync::{Arc, Weak};
use std::time::Duration;

use leasehold_core::ConnectionFactory;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::sweep::SweepKind;
use crate::pool::Shared;

/// Running maintenance tasks of one pool
///
/// The tasks hold only a weak reference to the pool, so they also stop on
/// their own once every pool handle and lease is gone.
pub(crate) struct MaintenanceHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl MaintenanceHandle {
    /// Stop both sweeps.
    pub(crate) fn stop(self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Spawn the health-check and idle-cleanup tasks for a pool.
pub(crate) fn start<F: ConnectionFactory>(shared: &Arc<Shared<F>>) -> MaintenanceHandle {
    let tasks = vec![
        spawn_sweep(
            Arc::downgrade(shared),
            SweepKind::HealthCheck,
            shared.config.health_check_interval(),
        ),
        spawn_sweep(
            Arc::downgrade(shared),
            SweepKind::IdleCleanup,
            shared.config.idle_sweep_interval(),
        ),
    ];
    MaintenanceHandle { tasks }
}

fn spawn_sweep<F: ConnectionFactory>(
    pool: Weak<Shared<F>>,
    kind: SweepKind,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let Some(shared) = pool.upgrade() else {
                tracing::trace!(?kind, "pool dropped, stopping maintenance");
                break;
            };

            let report = match kind {
                SweepKind::HealthCheck => shared.health_check().await,
                SweepKind::IdleCleanup => shared.idle_cleanup().await,
            };

            if report.evicted() > 0 {
                tracing::debug!(
                    ?kind,
                    examined = report.examined,
                    evicted_idle = report.evicted_idle,
                    evicted_unhealthy = report.evicted_unhealthy,
                    "maintenance sweep evicted connections"
                );
            }
        }
    })
}
