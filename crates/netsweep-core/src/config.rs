//! Sweep configuration
//!
//! The configuration record the orchestrator, enumerator, and scanners
//! consume. File discovery and schema handling live in the hosting daemon;
//! this module only defines the record, its defaults, validation, and TOML
//! round-trip helpers.

use crate::error::{Error, Result};
use crate::types::SweepMode;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default send budget for the ICMP scanner, packets per second
pub const DEFAULT_ICMP_RATE_LIMIT: u32 = 1000;

/// Default per-probe timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 2000;

/// Sweep engine configuration
///
/// # Examples
///
/// ```
/// use netsweep_core::{SweepConfig, SweepMode};
///
/// let mut config = SweepConfig::default();
/// config.networks = vec!["192.168.1.0/24".to_string()];
/// config.ports = vec![22, 80, 443];
/// config.sweep_modes = vec![SweepMode::Icmp, SweepMode::Tcp];
/// config.validate().unwrap();
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// CIDR literals to enumerate, e.g. `"10.0.1.0/24"`
    pub networks: Vec<String>,
    /// Ports probed per host when TCP mode is enabled
    pub ports: Vec<u16>,
    /// Enabled probe modes
    pub sweep_modes: Vec<SweepMode>,
    /// Seconds between sweep starts
    pub interval_secs: u64,
    /// TCP worker-pool size
    pub concurrency: usize,
    /// Per-probe timeout in milliseconds (TCP dial, ICMP reply wait)
    pub timeout_ms: u64,
    /// Echo requests per host; values above 1 enable multi-probe loss accounting
    pub icmp_count: usize,
    /// ICMP send budget in packets per second
    pub icmp_rate_limit: u32,
    /// Maximum idle connections kept per pool key
    pub max_idle: usize,
    /// Maximum connection lifetime in seconds
    pub max_lifetime_secs: u64,
    /// Idle expiry for pooled connections in seconds
    pub idle_timeout_secs: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            networks: Vec::new(),
            ports: Vec::new(),
            sweep_modes: vec![SweepMode::Icmp, SweepMode::Tcp],
            interval_secs: 300,
            concurrency: num_cpus::get().max(1),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            icmp_count: 1,
            icmp_rate_limit: DEFAULT_ICMP_RATE_LIMIT,
            max_idle: 8,
            max_lifetime_secs: 600,
            idle_timeout_secs: 60,
        }
    }
}

impl SweepConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file {:?}: {}", path, e)))?;
        Self::load_from_str(&contents)
    }

    /// Load configuration from a TOML string
    pub fn load_from_str(contents: &str) -> Result<Self> {
        let config: SweepConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to a TOML string
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.sweep_modes.is_empty() {
            return Err(Error::Config(
                "at least one sweep mode must be enabled".to_string(),
            ));
        }

        if self.concurrency == 0 {
            return Err(Error::Config(
                "concurrency must be greater than 0".to_string(),
            ));
        }

        if self.timeout_ms == 0 {
            return Err(Error::Config(
                "timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.timeout_ms > 3_600_000 {
            return Err(Error::Config("timeout_ms cannot exceed 1 hour".to_string()));
        }

        if self.icmp_rate_limit == 0 {
            return Err(Error::Config(
                "icmp_rate_limit must be greater than 0".to_string(),
            ));
        }

        if self.sweep_modes.contains(&SweepMode::Tcp) && self.ports.contains(&0) {
            return Err(Error::Config("port 0 is invalid".to_string()));
        }

        Ok(())
    }

    /// Interval between sweep starts
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Per-probe timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Maximum pooled-connection lifetime
    pub fn max_lifetime(&self) -> Duration {
        Duration::from_secs(self.max_lifetime_secs)
    }

    /// Idle expiry for pooled connections
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Whether `mode` is enabled in this configuration
    pub fn mode_enabled(&self, mode: SweepMode) -> bool {
        self.sweep_modes.contains(&mode)
    }
}
