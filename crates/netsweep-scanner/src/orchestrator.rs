//! Sweep orchestrator
//!
//! Drives repeated full sweeps: enumerate targets, scan them, and feed
//! every result to the processor and the result store. The first sweep
//! runs immediately on [`SweepOrchestrator::run`]; later sweeps start on
//! a fixed interval. Sweeps are serialised, and ticks that fire while a
//! sweep is still running are coalesced rather than queued.
//!
//! Errors are logged and the loop continues with the next tick;
//! cancellation exits cleanly and is never logged as an error.

use crate::combined::SweepScanner;
use crate::enumerator::enumerate_targets;
use crate::processor::ResultProcessor;
use crate::storage::ResultStore;
use netsweep_core::{Error, Result, SweepConfig};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Periodic sweep driver
///
/// # Examples
///
/// ```no_run
/// use netsweep_core::SweepConfig;
/// use netsweep_scanner::{
///     MemoryResultStore, ResultProcessor, SweepOrchestrator, SweepScanner,
/// };
/// use std::sync::Arc;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> netsweep_core::Result<()> {
/// let mut config = SweepConfig::default();
/// config.networks = vec!["192.168.1.0/24".to_string()];
/// config.ports = vec![22, 80, 443];
///
/// let scanner = Arc::new(SweepScanner::new(&config));
/// let processor = Arc::new(ResultProcessor::new(&config));
/// let store = Arc::new(MemoryResultStore::new());
/// let orchestrator = SweepOrchestrator::new(config, scanner, processor.clone(), store)?;
///
/// let ctx = CancellationToken::new();
/// orchestrator.run(&ctx).await;
///
/// let summary = processor.summary(&ctx)?;
/// println!("{} hosts up", summary.available_hosts);
/// # Ok(())
/// # }
/// ```
pub struct SweepOrchestrator<S: ResultStore> {
    config: RwLock<SweepConfig>,
    scanner: Arc<SweepScanner>,
    processor: Arc<ResultProcessor>,
    store: Arc<S>,
    done: CancellationToken,
    stopped: AtomicBool,
}

impl<S: ResultStore> SweepOrchestrator<S> {
    /// Create an orchestrator over the given components.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the configuration fails validation.
    pub fn new(
        config: SweepConfig,
        scanner: Arc<SweepScanner>,
        processor: Arc<ResultProcessor>,
        store: Arc<S>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: RwLock::new(config),
            scanner,
            processor,
            store,
            done: CancellationToken::new(),
            stopped: AtomicBool::new(false),
        })
    }

    /// Run sweeps until the context is cancelled or [`stop`](Self::stop)
    /// is called.
    ///
    /// The first sweep starts immediately; afterwards one sweep starts per
    /// interval tick. A tick that fires mid-sweep is coalesced: there is
    /// no queue of missed sweeps. Configuration updates take effect at the
    /// next tick boundary.
    pub async fn run(&self, ctx: &CancellationToken) {
        info!("sweep orchestrator starting");
        self.sweep_tick(ctx).await;

        let mut period = self.config.read().interval();
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await; // consume the immediate first tick

        loop {
            tokio::select! {
                _ = ctx.cancelled() => break,
                _ = self.done.cancelled() => break,
                _ = ticker.tick() => {
                    let current = self.config.read().interval();
                    if current != period {
                        debug!(?current, "sweep interval changed");
                        period = current;
                        ticker = tokio::time::interval(period);
                        ticker.tick().await;
                    }
                    self.sweep_tick(ctx).await;
                }
            }
        }
        info!("sweep orchestrator exiting");
    }

    /// One scheduled sweep with the log-and-continue error policy
    async fn sweep_tick(&self, ctx: &CancellationToken) {
        match self.run_once(ctx).await {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => {}
            Err(e) => error!("sweep failed: {}", e),
        }
    }

    /// Execute a single sweep: enumerate, scan, process, store.
    ///
    /// Every received result is handed to the processor and saved to the
    /// store exactly once. Structural failures (enumeration, scanner
    /// startup) propagate; per-target failures arrive as results.
    pub async fn run_once(&self, ctx: &CancellationToken) -> Result<()> {
        let sweep_id = Uuid::new_v4();
        let config = self.config.read().clone();

        let targets = enumerate_targets(&config)?;
        debug!(%sweep_id, targets = targets.len(), "sweep starting");

        let mut results = self.scanner.scan(ctx, targets).await?;
        let mut processed = 0usize;
        loop {
            tokio::select! {
                _ = ctx.cancelled() => return Err(Error::Cancelled),
                _ = self.done.cancelled() => return Err(Error::Cancelled),
                maybe = results.recv() => {
                    let Some(result) = maybe else { break };
                    self.processor.process(&result)?;
                    if let Err(e) = self.store.save_result(&result).await {
                        error!(%sweep_id, "store save failed for {}: {}", result.target, e);
                    }
                    processed += 1;
                }
            }
        }

        debug!(%sweep_id, processed, "sweep finished");
        Ok(())
    }

    /// Replace the configuration; effective at the next tick boundary.
    ///
    /// The processor is re-sized for the new port list without flushing
    /// host data.
    pub fn update_config(&self, config: SweepConfig) -> Result<()> {
        config.validate()?;
        self.processor.update_config(&config);
        *self.config.write() = config;
        debug!("sweep configuration updated");
        Ok(())
    }

    /// Current configuration snapshot
    pub fn config(&self) -> SweepConfig {
        self.config.read().clone()
    }

    /// Stop the orchestrator and the underlying scanner. Idempotent.
    pub fn stop(&self, ctx: &CancellationToken) -> Result<()> {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.done.cancel();
        self.scanner.stop(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::icmp::IcmpSweeper;
    use crate::storage::MemoryResultStore;
    use crate::tcp::TcpSweeper;
    use netsweep_core::SweepMode;
    use std::time::Duration;
    use tokio::net::TcpListener;

    fn tcp_only_config(networks: Vec<String>, ports: Vec<u16>) -> SweepConfig {
        SweepConfig {
            networks,
            ports,
            sweep_modes: vec![SweepMode::Tcp],
            concurrency: 4,
            timeout_ms: 300,
            interval_secs: 3600,
            ..Default::default()
        }
    }

    fn build(
        config: SweepConfig,
    ) -> (
        SweepOrchestrator<MemoryResultStore>,
        Arc<ResultProcessor>,
        Arc<MemoryResultStore>,
    ) {
        let scanner = Arc::new(SweepScanner::with_scanners(
            TcpSweeper::new(&config),
            IcmpSweeper::disabled(),
        ));
        let processor = Arc::new(ResultProcessor::new(&config));
        let store = Arc::new(MemoryResultStore::new());
        let orchestrator =
            SweepOrchestrator::new(config, scanner, Arc::clone(&processor), Arc::clone(&store))
                .unwrap();
        (orchestrator, processor, store)
    }

    #[tokio::test]
    async fn test_run_once_processes_and_stores() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accept = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let (orchestrator, processor, store) =
            build(tcp_only_config(vec!["127.0.0.1/32".to_string()], vec![port]));
        let ctx = CancellationToken::new();
        orchestrator.run_once(&ctx).await.unwrap();

        // One target: processed once, stored once
        assert_eq!(store.len(), 1);
        assert!(store.results()[0].available);

        let summary = processor.summary(&ctx).unwrap();
        assert_eq!(summary.hosts.len(), 1);
        assert_eq!(summary.total_hosts, 1);
        assert_eq!(summary.available_hosts, 1);
        accept.abort();
    }

    #[tokio::test]
    async fn test_run_once_invalid_cidr_propagates() {
        let (orchestrator, _, store) =
            build(tcp_only_config(vec!["not-a-cidr".to_string()], vec![80]));
        let ctx = CancellationToken::new();

        let result = orchestrator.run_once(&ctx).await;
        assert!(matches!(result, Err(Error::InvalidCidr(_))));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_run_once_empty_networks() {
        let (orchestrator, processor, store) = build(tcp_only_config(Vec::new(), vec![80]));
        let ctx = CancellationToken::new();
        orchestrator.run_once(&ctx).await.unwrap();

        assert!(store.is_empty());
        let summary = processor.summary(&ctx).unwrap();
        assert_eq!(summary.total_hosts, 0);
        assert!(summary.hosts.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let config = SweepConfig {
            concurrency: 0,
            ..tcp_only_config(Vec::new(), vec![80])
        };
        let scanner = Arc::new(SweepScanner::with_scanners(
            TcpSweeper::new(&SweepConfig::default()),
            IcmpSweeper::disabled(),
        ));
        let processor = Arc::new(ResultProcessor::new(&config));
        let store = Arc::new(MemoryResultStore::new());

        assert!(SweepOrchestrator::new(config, scanner, processor, store).is_err());
    }

    #[tokio::test]
    async fn test_update_config_takes_effect_next_sweep() {
        let (orchestrator, _, store) =
            build(tcp_only_config(vec!["127.0.0.1/32".to_string()], vec![1]));
        let ctx = CancellationToken::new();

        let mut updated = orchestrator.config();
        updated.ports = vec![1, 2];
        orchestrator.update_config(updated).unwrap();

        orchestrator.run_once(&ctx).await.unwrap();
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_update_config_validates() {
        let (orchestrator, _, _) = build(tcp_only_config(Vec::new(), vec![80]));
        let mut bad = orchestrator.config();
        bad.timeout_ms = 0;
        assert!(orchestrator.update_config(bad).is_err());
    }

    #[tokio::test]
    async fn test_run_exits_on_cancellation() {
        let (orchestrator, _, _) = build(tcp_only_config(Vec::new(), vec![80]));
        let ctx = CancellationToken::new();
        ctx.cancel();

        // With a cancelled context the loop must return promptly
        tokio::time::timeout(Duration::from_secs(5), orchestrator.run(&ctx))
            .await
            .expect("run did not exit on cancellation");
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let (orchestrator, _, _) = build(tcp_only_config(Vec::new(), vec![80]));
        let ctx = CancellationToken::new();
        orchestrator.stop(&ctx).unwrap();
        orchestrator.stop(&ctx).unwrap();
    }

    #[tokio::test]
    async fn test_stop_ends_run_loop() {
        let (orchestrator, _, _) = build(tcp_only_config(Vec::new(), vec![80]));
        let orchestrator = Arc::new(orchestrator);
        let ctx = CancellationToken::new();

        let runner = {
            let orchestrator = Arc::clone(&orchestrator);
            let ctx = ctx.clone();
            tokio::spawn(async move { orchestrator.run(&ctx).await })
        };

        // Give the first sweep a moment, then stop
        tokio::time::sleep(Duration::from_millis(50)).await;
        orchestrator.stop(&ctx).unwrap();

        tokio::time::timeout(Duration::from_secs(5), runner)
            .await
            .expect("run did not exit after stop")
            .unwrap();
    }
}
