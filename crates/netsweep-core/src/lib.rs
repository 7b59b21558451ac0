//! NetSweep Core Library
//!
//! This crate provides the core types, error handling, and configuration
//! for the NetSweep network sweep engine.
//!
//! # Examples
//!
//! ```
//! use netsweep_core::{SweepConfig, SweepMode, Target};
//!
//! // Create default configuration
//! let mut config = SweepConfig::default();
//! config.networks = vec!["192.168.1.0/30".to_string()];
//! config.ports = vec![22, 443];
//! assert!(config.validate().is_ok());
//!
//! // Targets are (host, mode[, port]) tuples
//! let target = Target::tcp("192.168.1.1", 443);
//! assert_eq!(target.mode, SweepMode::Tcp);
//! ```

pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use config::{SweepConfig, DEFAULT_ICMP_RATE_LIMIT, DEFAULT_TIMEOUT_MS};
pub use error::{Error, Result};
pub use types::{
    HostResult, IcmpStatus, PortCount, PortResult, SweepMode, SweepResult, SweepSummary, Target,
    TargetMetadata,
};
