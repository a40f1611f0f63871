//! Pool configuration types

use std::path::Path;
use std::time::Duration;

use leasehold_core::{PoolError, Result};
use serde::{Deserialize, Serialize};

/// Configuration for a connection pool
///
/// Controls pool sizing, timeouts, recycling and the maintenance schedule.
/// Every field has a default, so a TOML file only needs the keys it changes:
///
/// ```toml
/// max_connections = 20
/// acquire_timeout_ms = 5000
/// validate_on_return = true
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolConfig {
    /// Hard cap on simultaneous connections
    max_connections: usize,
    /// Connections created eagerly when the pool starts
    min_connections: usize,
    /// Timeout in milliseconds when acquiring a connection from the pool
    acquire_timeout_ms: u64,
    /// Timeout in milliseconds before an idle connection is evicted
    idle_timeout_ms: u64,
    /// Number of leases after which a connection is recycled
    max_uses: u64,
    /// Validate a connection before handing it out
    validate_on_borrow: bool,
    /// Validate a connection before putting it back
    validate_on_return: bool,
    health_check_interval_ms: u64,
    idle_sweep_interval_ms: u64,
}

impl PoolConfig {
    /// Create a new pool configuration with the given min and max sizes
    ///
    /// # Panics
    ///
    /// Panics if `min_connections > max_connections` or if `max_connections` is 0.
    pub fn new(min_connections: usize, max_connections: usize) -> Self {
        assert!(
            max_connections > 0,
            "max_connections must be greater than 0, got {}",
            max_connections
        );
        assert!(
            min_connections <= max_connections,
            "min_connections ({}) cannot exceed max_connections ({})",
            min_connections,
            max_connections
        );

        Self {
            max_connections,
            min_connections,
            acquire_timeout_ms: 30_000,        // 30 seconds
            idle_timeout_ms: 300_000,          // 5 minutes
            max_uses: 1000,
            validate_on_borrow: true,
            validate_on_return: false,
            health_check_interval_ms: 30_000,  // 30 seconds
            idle_sweep_interval_ms: 300_000,   // 5 minutes
        }
    }

    /// Parse a configuration from TOML text and validate it
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|e| PoolError::Configuration(format!("Invalid pool config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a TOML file and validate it
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            PoolError::Configuration(format!("Failed to read {}: {}", path.display(), e))
        })?;
        tracing::debug!(path = %path.display(), "loading pool config");
        Self::from_toml_str(&text)
    }

    /// Check the cross-field constraints that the builder asserts
    ///
    /// Deserialized configurations bypass [`PoolConfig::new`], so they are
    /// checked here instead of panicking.
    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(PoolError::Configuration(
                "max_connections must be greater than 0".into(),
            ));
        }
        if self.min_connections > self.max_connections {
            return Err(PoolError::Configuration(format!(
                "min_connections ({}) cannot exceed max_connections ({})",
                self.min_connections, self.max_connections
            )));
        }
        if self.max_uses == 0 {
            return Err(PoolError::Configuration(
                "max_uses must be greater than 0".into(),
            ));
        }
        if self.acquire_timeout_ms == 0 {
            return Err(PoolError::Configuration(
                "acquire_timeout_ms must be greater than 0".into(),
            ));
        }
        if self.health_check_interval_ms == 0 || self.idle_sweep_interval_ms == 0 {
            return Err(PoolError::Configuration(
                "maintenance intervals must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// Set the acquire timeout in milliseconds
    pub fn with_acquire_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.acquire_timeout_ms = timeout_ms;
        self
    }

    /// Set the idle timeout in milliseconds
    pub fn with_idle_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.idle_timeout_ms = timeout_ms;
        self
    }

    /// Set the number of leases before a connection is recycled
    pub fn with_max_uses(mut self, max_uses: u64) -> Self {
        self.max_uses = max_uses;
        self
    }

    pub fn with_validate_on_borrow(mut self, validate: bool) -> Self {
        self.validate_on_borrow = validate;
        self
    }

    pub fn with_validate_on_return(mut self, validate: bool) -> Self {
        self.validate_on_return = validate;
        self
    }

    /// Set the health-check sweep interval in milliseconds
    pub fn with_health_check_interval_ms(mut self, interval_ms: u64) -> Self {
        self.health_check_interval_ms = interval_ms;
        self
    }

    /// Set the idle-cleanup sweep interval in milliseconds
    pub fn with_idle_sweep_interval_ms(mut self, interval_ms: u64) -> Self {
        self.idle_sweep_interval_ms = interval_ms;
        self
    }

    /// Get the minimum pool size
    pub fn min_connections(&self) -> usize {
        self.min_connections
    }

    /// Get the maximum pool size
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Get the acquire timeout as a Duration
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    /// Get the idle timeout as a Duration
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn max_uses(&self) -> u64 {
        self.max_uses
    }

    pub fn validate_on_borrow(&self) -> bool {
        self.validate_on_borrow
    }

    pub fn validate_on_return(&self) -> bool {
        self.validate_on_return
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    pub fn idle_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.idle_sweep_interval_ms)
    }
}

impl Default for PoolConfig {
    /// Create a default pool configuration
    ///
    /// Defaults:
    /// - min_connections: 2
    /// - max_connections: 10
    /// - acquire_timeout: 30 seconds
    /// - idle_timeout: 5 minutes
    /// - max_uses: 1000
    /// - validate_on_borrow: true, validate_on_return: false
    /// - health check every 30 seconds, idle sweep every 5 minutes
    fn default() -> Self {
        Self::new(2, 10)
    }
}
