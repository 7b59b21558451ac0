//! TCP connect scanner
//!
//! Determines whether a TCP connection can be established to each
//! `(host, port)` target within the configured timeout. A fixed pool of
//! workers consumes targets from a shared queue and probes through the
//! sharded [`ConnectionPool`], so repeated sweeps reuse still-warm
//! connections instead of re-dialing.
//!
//! Unlike the ICMP scanner, result delivery here blocks: workers await
//! channel capacity rather than dropping, which back-pressures the sweep
//! when the consumer falls behind.

use crate::conn_pool::ConnectionPool;
use netsweep_core::{Error, Result, SweepConfig, SweepResult, Target};
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Result channel capacity; sends block when it fills
const RESULT_BUFFER: usize = 1024;

/// Deadline for the post-dial liveness read
const LIVENESS_READ: Duration = Duration::from_millis(1);

/// TCP connect scanner with a sharded connection pool
///
/// # Examples
///
/// ```no_run
/// use netsweep_core::{SweepConfig, Target};
/// use netsweep_scanner::TcpSweeper;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> netsweep_core::Result<()> {
/// let sweeper = TcpSweeper::new(&SweepConfig::default());
/// let ctx = CancellationToken::new();
/// let mut results = sweeper.scan(&ctx, vec![Target::tcp("192.168.1.1", 443)])?;
/// while let Some(result) = results.recv().await {
///     println!("{}: open={}", result.target, result.available);
/// }
/// # Ok(())
/// # }
/// ```
pub struct TcpSweeper {
    pool: Arc<ConnectionPool>,
    concurrency: usize,
    done: CancellationToken,
    stopped: AtomicBool,
}

impl TcpSweeper {
    /// Create a scanner sized by `config.concurrency`
    pub fn new(config: &SweepConfig) -> Self {
        Self {
            pool: Arc::new(ConnectionPool::new(
                config.timeout(),
                config.max_idle,
                config.max_lifetime(),
                config.idle_timeout(),
            )),
            concurrency: config.concurrency.max(1),
            done: CancellationToken::new(),
            stopped: AtomicBool::new(false),
        }
    }

    /// Probe every target and stream one result per target.
    ///
    /// The output channel closes after all workers exit. Per-target
    /// failures (refused, timed out, unreachable, invalid host) arrive as
    /// failed results with the error text captured verbatim; they never
    /// abort the scan.
    pub fn scan(
        &self,
        ctx: &CancellationToken,
        targets: Vec<Target>,
    ) -> Result<mpsc::Receiver<SweepResult>> {
        if self.done.is_cancelled() {
            return Err(Error::ScannerStart("TCP scanner is stopped".to_string()));
        }

        let (result_tx, result_rx) = mpsc::channel(RESULT_BUFFER);
        let (target_tx, target_rx) = mpsc::unbounded_channel();
        for target in targets {
            // Unbounded queue: the feeder never blocks the caller
            let _ = target_tx.send(target);
        }
        drop(target_tx);

        let shared_rx = Arc::new(Mutex::new(target_rx));
        for worker in 0..self.concurrency {
            let pool = Arc::clone(&self.pool);
            let input = Arc::clone(&shared_rx);
            let tx = result_tx.clone();
            let ctx = ctx.clone();
            let done = self.done.clone();

            tokio::spawn(async move {
                trace!(worker, "TCP worker started");
                loop {
                    let target = {
                        let mut input = input.lock().await;
                        tokio::select! {
                            target = input.recv() => target,
                            _ = ctx.cancelled() => None,
                            _ = done.cancelled() => None,
                        }
                    };
                    let Some(target) = target else { break };

                    let result = probe_target(&pool, target).await;
                    tokio::select! {
                        sent = tx.send(result) => {
                            if sent.is_err() {
                                break;
                            }
                        }
                        _ = ctx.cancelled() => break,
                        _ = done.cancelled() => break,
                    }
                }
                trace!(worker, "TCP worker exiting");
            });
        }

        // Workers hold the only sender clones; the channel closes when
        // the last worker exits
        drop(result_tx);
        Ok(result_rx)
    }

    /// Close the connection pool. Idempotent.
    pub fn stop(&self, _ctx: &CancellationToken) -> Result<()> {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.done.cancel();
        self.pool.close();
        debug!("TCP scanner stopped");
        Ok(())
    }

    /// The scanner's connection pool, exposed for inspection in tests
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }
}

/// Probe one target: acquire/dial, verify liveness, release on success
async fn probe_target(pool: &ConnectionPool, target: Target) -> SweepResult {
    let Some(port) = target.port else {
        let err = Error::InvalidHost(format!("{}: TCP target without port", target.host));
        return SweepResult::new(target, false).with_error(err);
    };

    let ip: IpAddr = match target.host.parse() {
        Ok(ip) => ip,
        Err(_) => {
            let err = Error::InvalidHost(target.host.clone());
            return SweepResult::new(target, false).with_error(err);
        }
    };

    let key = target.pool_key();
    let addr = SocketAddr::new(ip, port);
    let start = Instant::now();

    let mut stream = match pool.acquire(&key, addr).await {
        Ok(stream) => stream,
        Err(e) => {
            trace!("connect to {} failed: {}", target, e);
            return SweepResult::new(target, false)
                .with_response_time(start.elapsed())
                .with_error(e);
        }
    };
    let resp_time = start.elapsed();

    // A port that accepted and immediately reset shows up on a short
    // read; a silent open port just runs the deadline out
    let mut buf = [0u8; 1];
    match timeout(LIVENESS_READ, stream.read(&mut buf)).await {
        Err(_) | Ok(Ok(1..)) => {
            pool.release(&key, stream);
            SweepResult::new(target, true).with_response_time(resp_time)
        }
        Ok(Ok(0)) => {
            let err = Error::InvalidConnection("connection closed by peer".to_string());
            SweepResult::new(target, false)
                .with_response_time(resp_time)
                .with_error(err)
        }
        Ok(Err(e)) => {
            warn!("post-dial read on {} failed: {}", target, e);
            let err = Error::InvalidConnection(e.to_string());
            SweepResult::new(target, false)
                .with_response_time(resp_time)
                .with_error(err)
        }
    }
}
