//! Combined sweep scanner
//!
//! Routes targets to the per-protocol scanners by mode, runs them
//! concurrently, and exposes a single merged result stream. The merged
//! channel closes exactly once: forwarding tasks hold the only senders and
//! a cleanup task drops the last one after both forwarders exit.
//!
//! A `scan` call watches an error channel for a short early-error window
//! after startup. A sub-scanner failure inside the window cancels the scan
//! and surfaces to the caller; failures after the window are logged and the
//! surviving protocol keeps streaming.

use crate::icmp::IcmpSweeper;
use crate::tcp::TcpSweeper;
use futures::stream::{FuturesUnordered, StreamExt};
use netsweep_core::{Error, Result, SweepConfig, SweepMode, SweepResult, Target};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

/// Window after `scan` during which a sub-scanner error aborts the call
const EARLY_ERROR_WINDOW: Duration = Duration::from_millis(10);

/// Merged result channel capacity
const MERGED_BUFFER: usize = 1024;

/// Protocol-multiplexing scanner over TCP and ICMP
///
/// # Examples
///
/// ```no_run
/// use netsweep_core::{SweepConfig, Target};
/// use netsweep_scanner::SweepScanner;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> netsweep_core::Result<()> {
/// let scanner = SweepScanner::new(&SweepConfig::default());
/// let ctx = CancellationToken::new();
/// let targets = vec![Target::icmp("192.168.1.1"), Target::tcp("192.168.1.1", 22)];
/// let mut results = scanner.scan(&ctx, targets).await?;
/// while let Some(result) = results.recv().await {
///     println!("{} -> {}", result.target, result.available);
/// }
/// scanner.stop(&ctx)?;
/// # Ok(())
/// # }
/// ```
pub struct SweepScanner {
    tcp: Arc<TcpSweeper>,
    icmp: Arc<IcmpSweeper>,
    done: CancellationToken,
    stopped: AtomicBool,
}

impl SweepScanner {
    /// Build both sub-scanners from the configuration.
    ///
    /// The ICMP scanner may come up disabled (no raw-socket privilege);
    /// ICMP targets are then dropped silently at scan time.
    pub fn new(config: &SweepConfig) -> Self {
        Self::with_scanners(TcpSweeper::new(config), IcmpSweeper::new(config))
    }

    /// Assemble a scanner from explicit sub-scanners
    pub fn with_scanners(tcp: TcpSweeper, icmp: IcmpSweeper) -> Self {
        Self {
            tcp: Arc::new(tcp),
            icmp: Arc::new(icmp),
            done: CancellationToken::new(),
            stopped: AtomicBool::new(false),
        }
    }

    /// Start scanning `targets` and return the merged result stream.
    ///
    /// An empty target list returns an already-closed channel. A
    /// sub-scanner error within the early-error window cancels the scan
    /// and returns [`Error::ScannerStart`]; no channel is handed out.
    pub async fn scan(
        &self,
        ctx: &CancellationToken,
        targets: Vec<Target>,
    ) -> Result<mpsc::Receiver<SweepResult>> {
        if self.done.is_cancelled() {
            return Err(Error::ScannerStart("sweep scanner is stopped".to_string()));
        }

        let (merged_tx, merged_rx) = mpsc::channel(MERGED_BUFFER);
        if targets.is_empty() {
            drop(merged_tx);
            return Ok(merged_rx);
        }

        let scan_id = Uuid::new_v4();
        let mut tcp_targets = Vec::new();
        let mut icmp_targets = Vec::new();
        for target in targets {
            match target.mode {
                SweepMode::Tcp => tcp_targets.push(target),
                SweepMode::Icmp => icmp_targets.push(target),
            }
        }
        debug!(
            %scan_id,
            tcp = tcp_targets.len(),
            icmp = icmp_targets.len(),
            "starting combined scan"
        );

        let scan_ctx = ctx.child_token();
        let (err_tx, mut err_rx) = mpsc::channel::<Error>(2);
        let mut forwarders = Vec::new();

        if !tcp_targets.is_empty() {
            match self.tcp.scan(&scan_ctx, tcp_targets) {
                Ok(sub_rx) => forwarders.push(spawn_forwarder(
                    sub_rx,
                    scan_ctx.clone(),
                    self.done.clone(),
                    merged_tx.clone(),
                )),
                Err(e) => {
                    let _ = err_tx.try_send(e);
                }
            }
        }

        if !icmp_targets.is_empty() {
            if self.icmp.is_enabled() {
                match self.icmp.scan(&scan_ctx, icmp_targets) {
                    Ok(sub_rx) => forwarders.push(spawn_forwarder(
                        sub_rx,
                        scan_ctx.clone(),
                        self.done.clone(),
                        merged_tx.clone(),
                    )),
                    Err(e) => {
                        let _ = err_tx.try_send(e);
                    }
                }
            } else {
                debug!(
                    %scan_id,
                    dropped = icmp_targets.len(),
                    "ICMP scanner disabled, dropping ICMP targets"
                );
            }
        }

        drop(err_tx);
        drop(merged_tx);

        if forwarders.is_empty() {
            // Nothing is running: either every partition was dropped
            // (disabled ICMP) or a sub-scanner failed at startup
            return match err_rx.try_recv() {
                Ok(err) if !err.is_cancelled() => {
                    scan_ctx.cancel();
                    Err(Error::ScannerStart(err.to_string()))
                }
                _ => Ok(merged_rx),
            };
        }

        // Cleanup: wait for all forwarders, which drops the last sender
        // and closes the merged channel exactly once
        tokio::spawn(async move {
            let mut forwarders = forwarders.into_iter().collect::<FuturesUnordered<_>>();
            while let Some(joined) = forwarders.next().await {
                if let Err(e) = joined {
                    warn!(%scan_id, "forwarder task failed: {}", e);
                }
            }
            debug!(%scan_id, "combined scan drained");
        });

        // Early-error window: a startup failure aborts the whole scan
        match timeout(EARLY_ERROR_WINDOW, err_rx.recv()).await {
            Ok(Some(err)) if !err.is_cancelled() => {
                scan_ctx.cancel();
                return Err(Error::ScannerStart(err.to_string()));
            }
            _ => {}
        }

        // Later sub-scanner errors are logged, never fatal
        tokio::spawn(async move {
            while let Some(err) = err_rx.recv().await {
                if !err.is_cancelled() {
                    warn!(%scan_id, "sub-scanner error after startup: {}", err);
                }
            }
        });

        Ok(merged_rx)
    }

    /// Fire the shared done signal and stop both sub-scanners.
    ///
    /// Idempotent; sub-scanner stop errors are aggregated into a single
    /// [`Error::Aggregate`].
    pub fn stop(&self, ctx: &CancellationToken) -> Result<()> {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.done.cancel();

        let mut errors = Vec::new();
        if let Err(e) = self.icmp.stop(ctx) {
            errors.push(e);
        }
        if let Err(e) = self.tcp.stop(ctx) {
            errors.push(e);
        }
        debug!("sweep scanner stopped");
        Error::aggregate(errors)
    }

    /// Whether ICMP probing is available
    pub fn icmp_enabled(&self) -> bool {
        self.icmp.is_enabled()
    }
}

/// Forward one sub-scanner's results to the merged channel
fn spawn_forwarder(
    mut sub_rx: mpsc::Receiver<SweepResult>,
    scan_ctx: CancellationToken,
    done: CancellationToken,
    merged_tx: mpsc::Sender<SweepResult>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                maybe = sub_rx.recv() => {
                    let Some(result) = maybe else { break };
                    tokio::select! {
                        sent = merged_tx.send(result) => {
                            if sent.is_err() {
                                break;
                            }
                        }
                        _ = scan_ctx.cancelled() => break,
                        _ = done.cancelled() => break,
                    }
                }
                _ = scan_ctx.cancelled() => break,
                _ = done.cancelled() => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn tcp_config() -> SweepConfig {
        SweepConfig {
            concurrency: 4,
            timeout_ms: 300,
            ..Default::default()
        }
    }

    fn scanner_without_icmp() -> SweepScanner {
        SweepScanner::with_scanners(TcpSweeper::new(&tcp_config()), IcmpSweeper::disabled())
    }

    async fn drain(mut rx: mpsc::Receiver<SweepResult>) -> Vec<SweepResult> {
        let mut out = Vec::new();
        while let Some(result) = rx.recv().await {
            out.push(result);
        }
        out
    }

    #[tokio::test]
    async fn test_empty_targets_returns_closed_channel() {
        let scanner = scanner_without_icmp();
        let ctx = CancellationToken::new();
        let mut rx = scanner.scan(&ctx, Vec::new()).await.unwrap();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_tcp_targets_forwarded() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accept = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let scanner = scanner_without_icmp();
        let ctx = CancellationToken::new();
        let rx = scanner
            .scan(
                &ctx,
                vec![
                    Target::tcp("127.0.0.1", port),
                    Target::tcp("127.0.0.1", port),
                ],
            )
            .await
            .unwrap();

        let results = drain(rx).await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.available));
        accept.abort();
    }

    #[tokio::test]
    async fn test_disabled_icmp_targets_dropped_silently() {
        let scanner = scanner_without_icmp();
        let ctx = CancellationToken::new();

        // Only ICMP targets and no ICMP scanner: closed channel, no error
        let rx = scanner
            .scan(&ctx, vec![Target::icmp("127.0.0.1")])
            .await
            .unwrap();
        assert!(drain(rx).await.is_empty());
    }

    #[tokio::test]
    async fn test_mixed_modes_with_disabled_icmp_keep_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let scanner = scanner_without_icmp();
        let ctx = CancellationToken::new();
        let rx = scanner
            .scan(
                &ctx,
                vec![Target::icmp("127.0.0.1"), Target::tcp("127.0.0.1", port)],
            )
            .await
            .unwrap();

        let results = drain(rx).await;
        // Only the TCP probe reports; the ICMP target was dropped
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].target.mode, SweepMode::Tcp);
    }

    #[tokio::test]
    async fn test_early_error_from_stopped_sub_scanner() {
        let tcp = TcpSweeper::new(&tcp_config());
        let ctx = CancellationToken::new();
        tcp.stop(&ctx).unwrap();

        let scanner = SweepScanner::with_scanners(tcp, IcmpSweeper::disabled());
        let result = scanner
            .scan(&ctx, vec![Target::tcp("127.0.0.1", 80)])
            .await;
        assert!(matches!(result, Err(Error::ScannerStart(_))));
    }

    #[tokio::test]
    async fn test_scan_after_stop_fails() {
        let scanner = scanner_without_icmp();
        let ctx = CancellationToken::new();
        scanner.stop(&ctx).unwrap();

        let result = scanner.scan(&ctx, vec![Target::tcp("127.0.0.1", 80)]).await;
        assert!(matches!(result, Err(Error::ScannerStart(_))));
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let scanner = scanner_without_icmp();
        let ctx = CancellationToken::new();
        scanner.stop(&ctx).unwrap();
        scanner.stop(&ctx).unwrap();
    }

    #[tokio::test]
    async fn test_cancellation_closes_merged_channel() {
        let targets: Vec<Target> = (1..=16)
            .map(|i| Target::tcp(format!("192.0.2.{}", i), 80))
            .collect();

        let scanner = SweepScanner::with_scanners(
            TcpSweeper::new(&SweepConfig {
                concurrency: 2,
                timeout_ms: 5_000,
                ..Default::default()
            }),
            IcmpSweeper::disabled(),
        );
        let ctx = CancellationToken::new();
        let mut rx = scanner.scan(&ctx, targets).await.unwrap();
        ctx.cancel();

        // Merged channel closes exactly once even under cancellation
        while rx.recv().await.is_some() {}
    }
}
