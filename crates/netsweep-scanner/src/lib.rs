//! NetSweep Sweep Engine
//!
//! This crate provides the sweep engine for NetSweep: target enumeration,
//! the ICMP and TCP scanners, protocol multiplexing, result aggregation,
//! and periodic orchestration.
//!
//! # Architecture
//!
//! The engine is organized into specialized modules:
//!
//! - [`enumerator`]: CIDR x ports x modes expansion into the target stream
//! - [`icmp`]: rate-limited ICMP echo scanning over raw sockets
//! - [`tcp`]: TCP connect scanning through a sharded connection pool
//! - [`combined`]: protocol multiplexing onto one merged result stream
//! - [`processor`]: folding probe results into the per-host aggregate
//! - [`orchestrator`]: periodic sweep scheduling
//! - [`storage`]: the result-store seam and the in-memory store
//!
//! # Example
//!
//! ```no_run
//! use netsweep_core::{SweepConfig, SweepMode};
//! use netsweep_scanner::{
//!     MemoryResultStore, ResultProcessor, SweepOrchestrator, SweepScanner,
//! };
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> netsweep_core::Result<()> {
//! let mut config = SweepConfig::default();
//! config.networks = vec!["192.168.1.0/24".to_string()];
//! config.ports = vec![22, 80, 443];
//! config.sweep_modes = vec![SweepMode::Icmp, SweepMode::Tcp];
//!
//! let scanner = Arc::new(SweepScanner::new(&config));
//! let processor = Arc::new(ResultProcessor::new(&config));
//! let store = Arc::new(MemoryResultStore::new());
//! let orchestrator =
//!     SweepOrchestrator::new(config, scanner, Arc::clone(&processor), store)?;
//!
//! let ctx = CancellationToken::new();
//! orchestrator.run_once(&ctx).await?;
//!
//! let summary = processor.summary(&ctx)?;
//! println!(
//!     "{}/{} hosts available",
//!     summary.available_hosts, summary.total_hosts
//! );
//! # Ok(())
//! # }
//! ```

pub mod combined;
pub mod conn_pool;
pub mod enumerator;
pub mod icmp;
pub mod orchestrator;
pub mod processor;
pub mod result_pool;
pub mod storage;
pub mod tcp;

pub use combined::SweepScanner;
pub use conn_pool::ConnectionPool;
pub use enumerator::enumerate_targets;
pub use icmp::IcmpSweeper;
pub use orchestrator::SweepOrchestrator;
pub use processor::ResultProcessor;
pub use result_pool::HostPool;
pub use storage::{MemoryResultStore, ResultStore};
pub use tcp::TcpSweeper;
