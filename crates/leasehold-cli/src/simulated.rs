//! In-memory backend used to exercise a pool without a real server

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use leasehold_core::ConnectionFactory;
use rand::Rng;

/// Knobs for the simulated backend
#[derive(Debug, Clone)]
pub struct SimulatedBackend {
    /// Time taken to open a connection
    pub connect_latency: Duration,
    /// Time taken by each operation
    pub op_latency: Duration,
    /// Probability that an operation leaves its connection broken
    pub break_rate: f64,
    /// Probability that opening a connection fails
    pub connect_failure_rate: f64,
}

/// A simulated backend session
#[derive(Debug)]
pub struct SimulatedConnection {
    serial: u64,
    op_latency: Duration,
    break_rate: f64,
    broken: AtomicBool,
}

impl SimulatedConnection {
    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// Perform one operation. May break the connection for later users.
    pub async fn execute(&self) -> anyhow::Result<()> {
        if self.broken.load(Ordering::SeqCst) {
            bail!("connection {} is broken", self.serial);
        }
        tokio::time::sleep(self.op_latency).await;
        let breaks = rand::thread_rng().gen_bool(self.break_rate);
        if breaks {
            self.broken.store(true, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Factory producing [`SimulatedConnection`]s
pub struct SimulatedFactory {
    backend: SimulatedBackend,
    next_serial: AtomicU64,
    destroyed: AtomicU64,
}

impl SimulatedFactory {
    pub fn new(backend: SimulatedBackend) -> anyhow::Result<Self> {
        for (name, rate) in [
            ("break rate", backend.break_rate),
            ("connect failure rate", backend.connect_failure_rate),
        ] {
            if !(0.0..=1.0).contains(&rate) {
                bail!("{} must be between 0 and 1, got {}", name, rate);
            }
        }
        Ok(Self {
            backend,
            next_serial: AtomicU64::new(0),
            destroyed: AtomicU64::new(0),
        })
    }

    pub fn created(&self) -> u64 {
        self.next_serial.load(Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> u64 {
        self.destroyed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectionFactory for SimulatedFactory {
    type Connection = SimulatedConnection;

    async fn create(&self) -> anyhow::Result<SimulatedConnection> {
        tokio::time::sleep(self.backend.connect_latency).await;
        let fails = rand::thread_rng().gen_bool(self.backend.connect_failure_rate);
        if fails {
            bail!("simulated connect failure");
        }

        let serial = self.next_serial.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(serial, "opened simulated connection");
        Ok(SimulatedConnection {
            serial,
            op_latency: self.backend.op_latency,
            break_rate: self.backend.break_rate,
            broken: AtomicBool::new(false),
        })
    }

    async fn validate(&self, conn: &SimulatedConnection) -> bool {
        !conn.broken.load(Ordering::SeqCst)
    }

    async fn destroy(&self, conn: &SimulatedConnection) {
        tracing::trace!(serial = conn.serial, "closed simulated connection");
        self.destroyed.fetch_add(1, Ordering::SeqCst);
    }
}
