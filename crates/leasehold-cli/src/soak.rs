//! Concurrent load against a pool backed by the simulated backend

use std::sync::Arc;
use std::time::{Duration, Instant};

use comfy_table::{Cell, ContentArrangement, Table, presets::UTF8_FULL};
use leasehold_core::PoolError;
use leasehold_pool::{ConnectionPool, PoolConfig, PoolStats};
use serde::Serialize;

use crate::simulated::{SimulatedBackend, SimulatedFactory};

#[derive(Debug, Clone)]
pub struct SoakOptions {
    pub workers: usize,
    pub queries_per_worker: usize,
    pub backend: SimulatedBackend,
}

/// Outcome counts for one soak run
#[derive(Debug, Default, Clone, Serialize)]
pub struct SoakSummary {
    pub succeeded: usize,
    pub acquire_timeouts: usize,
    pub creation_failures: usize,
    pub validation_failures: usize,
    pub operation_failures: usize,
    pub connections_opened: u64,
    pub connections_closed: u64,
    pub elapsed_ms: u128,
    /// Pool state right before it was closed
    pub final_stats: PoolStats,
}

impl SoakSummary {
    fn record(&mut self, outcome: &anyhow::Result<()>) {
        let Err(err) = outcome else {
            self.succeeded += 1;
            return;
        };
        match err.downcast_ref::<PoolError>() {
            Some(PoolError::AcquireTimeout(_)) => self.acquire_timeouts += 1,
            Some(PoolError::Creation(_)) => self.creation_failures += 1,
            Some(PoolError::Validation(_)) => self.validation_failures += 1,
            _ => self.operation_failures += 1,
        }
    }

    pub fn failed(&self) -> usize {
        self.acquire_timeouts
            + self.creation_failures
            + self.validation_failures
            + self.operation_failures
    }
}

/// Run the soak and close the pool afterwards
pub async fn run(config: PoolConfig, options: SoakOptions) -> anyhow::Result<SoakSummary> {
    let factory = Arc::new(SimulatedFactory::new(options.backend.clone())?);
    let pool = ConnectionPool::new(config, Arc::clone(&factory)).await?;
    tracing::info!(
        workers = options.workers,
        queries = options.queries_per_worker,
        "starting soak"
    );

    let started = Instant::now();
    let mut handles = Vec::with_capacity(options.workers);
    for worker in 0..options.workers {
        let pool = pool.clone();
        let queries = options.queries_per_worker;
        handles.push(tokio::spawn(async move {
            let mut summary = SoakSummary::default();
            for _ in 0..queries {
                let outcome: anyhow::Result<()> =
                    pool.query(|conn| Box::pin(conn.execute())).await;
                if let Err(err) = &outcome {
                    tracing::debug!(worker, error = %err, "query failed");
                }
                summary.record(&outcome);
            }
            summary
        }));
    }

    let mut summary = SoakSummary::default();
    for handle in handles {
        let partial = handle.await?;
        summary.succeeded += partial.succeeded;
        summary.acquire_timeouts += partial.acquire_timeouts;
        summary.creation_failures += partial.creation_failures;
        summary.validation_failures += partial.validation_failures;
        summary.operation_failures += partial.operation_failures;
    }
    summary.elapsed_ms = started.elapsed().as_millis();
    summary.final_stats = pool.stats();

    pool.close().await;
    summary.connections_opened = factory.created();
    summary.connections_closed = factory.destroyed();

    tracing::info!(
        succeeded = summary.succeeded,
        failed = summary.failed(),
        elapsed_ms = summary.elapsed_ms as u64,
        "soak finished"
    );
    Ok(summary)
}

/// Render a summary as tables for the terminal
pub fn render(summary: &SoakSummary) -> String {
    let mut totals = Table::new();
    totals
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Outcome", "Count"]);
    for (label, value) in [
        ("succeeded", summary.succeeded),
        ("acquire timeouts", summary.acquire_timeouts),
        ("creation failures", summary.creation_failures),
        ("validation failures", summary.validation_failures),
        ("operation failures", summary.operation_failures),
    ] {
        totals.add_row(vec![Cell::new(label), Cell::new(value)]);
    }
    totals.add_row(vec![
        Cell::new("connections opened"),
        Cell::new(summary.connections_opened),
    ]);
    totals.add_row(vec![
        Cell::new("connections closed"),
        Cell::new(summary.connections_closed),
    ]);

    let stats = &summary.final_stats;
    let mut connections = Table::new();
    connections
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Id", "Uses", "Healthy", "In use", "Last used"]);
    for conn in stats.connections() {
        connections.add_row(vec![
            Cell::new(conn.id),
            Cell::new(conn.use_count),
            Cell::new(conn.is_healthy),
            Cell::new(conn.is_in_use),
            Cell::new(conn.last_used_at.format("%H:%M:%S%.3f")),
        ]);
    }

    format!(
        "{}\n\nPool before close: {} total, {} available, {} in use ({:.0}% utilized)\n{}\n\nFinished in {}",
        totals,
        stats.total(),
        stats.available(),
        stats.in_use(),
        stats.utilization() * 100.0,
        connections,
        format_elapsed(Duration::from_millis(summary.elapsed_ms as u64)),
    )
}

fn format_elapsed(elapsed: Duration) -> String {
    if elapsed.as_secs() > 0 {
        format!("{:.2}s", elapsed.as_secs_f64())
    } else {
        format!("{}ms", elapsed.as_millis())
    }
}
