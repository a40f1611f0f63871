//! Health-check and idle-cleanup sweeps

use leasehold_core::ConnectionFactory;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::pool::{ConnectionPool, Shared};

/// Which maintenance sweep produced a report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepKind {
    HealthCheck,
    IdleCleanup,
}

/// Result of a single maintenance sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub kind: SweepKind,
    /// Idle connections looked at
    pub examined: usize,
    /// Connections evicted for exceeding the idle threshold
    pub evicted_idle: usize,
    /// Connections evicted for failing validation
    pub evicted_unhealthy: usize,
}

impl SweepReport {
    fn new(kind: SweepKind) -> Self {
        Self {
            kind,
            examined: 0,
            evicted_idle: 0,
            evicted_unhealthy: 0,
        }
    }

    /// Total connections removed by the sweep
    pub fn evicted(&self) -> usize {
        self.evicted_idle + self.evicted_unhealthy
    }
}

impl<F: ConnectionFactory> Shared<F> {
    /// Validate idle connections and evict failing or expired ones.
    pub(crate) async fn health_check(&self) -> SweepReport {
        let mut report = SweepReport::new(SweepKind::HealthCheck);
        let idle_timeout = self.config.idle_timeout();

        let (expired, candidates) = {
            let mut state = self.state.lock();
            if state.is_closed() {
                return report;
            }
            let expired = state.evict_idle(Instant::now(), idle_timeout);
            (expired, state.idle_connections())
        };

        report.examined = expired.len() + candidates.len();
        report.evicted_idle = expired.len();
        for (id, connection) in expired {
            tracing::debug!(connection_id = %id, "evicting idle connection");
            self.factory.destroy(&connection).await;
        }

        for (id, connection) in candidates {
            if self.factory.validate(&connection).await {
                continue;
            }
            // Borrowed while we were validating: the borrower validates it.
            let removed = { self.state.lock().remove_unhealthy(id) };
            if let Some(connection) = removed {
                tracing::debug!(connection_id = %id, "evicting unhealthy connection");
                report.evicted_unhealthy += 1;
                self.factory.destroy(&connection).await;
            }
        }

        report
    }

    /// Evict connections idle for more than twice the idle timeout.
    pub(crate) async fn idle_cleanup(&self) -> SweepReport {
        let mut report = SweepReport::new(SweepKind::IdleCleanup);
        let threshold = self.config.idle_timeout().saturating_mul(2);

        let (examined, expired) = {
            let mut state = self.state.lock();
            if state.is_closed() {
                return report;
            }
            let examined = state.available_count();
            (examined, state.evict_idle(Instant::now(), threshold))
        };

        report.examined = examined;
        report.evicted_idle = expired.len();
        for (id, connection) in expired {
            tracing::debug!(connection_id = %id, "evicting stale connection");
            self.factory.destroy(&connection).await;
        }

        report
    }
}

impl<F: ConnectionFactory> ConnectionPool<F> {
    /// Run a health-check sweep now, outside the regular schedule
    pub async fn run_health_check(&self) -> SweepReport {
        self.shared().health_check().await
    }

    /// Run an idle-cleanup sweep now, outside the regular schedule
    pub async fn run_idle_cleanup(&self) -> SweepReport {
        self.shared().idle_cleanup().await
    }
}
