//! ICMP sweep scanner
//!
//! Determines reachability and round-trip time for ICMP targets with a
//! cooperating task pair: a rate-limited **sender** that issues echo
//! requests in fixed 10 ms batches, and a **listener** that reads replies
//! under a short deadline so cancellation stays responsive. Reply
//! correlation is keyed by source IP; identifier/sequence matching is
//! best-effort, so an unmatched reply still marks its source responsive.
//!
//! Raw sockets need CAP_NET_RAW. When socket creation fails the scanner is
//! constructed in a disabled state: the combined scanner then drops ICMP
//! targets silently instead of failing the sweep.
//!
//! Result delivery is best-effort: sends use `try_send` and drop on a full
//! buffer with a log record (the TCP scanner, by contrast, blocks).

use dashmap::{DashMap, DashSet};
use netsweep_core::{Error, Result, SweepConfig, SweepResult, Target};
use netsweep_net::icmp::{parse_echo_reply, strip_ipv4_header, EchoRequest};
use netsweep_net::raw_socket::{is_timeout, RawIcmpSocket};
use parking_lot::Mutex;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Interval between send batches
const BATCH_INTERVAL: Duration = Duration::from_millis(10);

/// Result channel capacity; ICMP results are dropped when it fills
const RESULT_BUFFER: usize = 1024;

/// Echo payload, included in the checksum
const ECHO_PAYLOAD: &[u8] = b"netsweep";

/// Per-batch send budget for a packets-per-second limit
fn batch_budget(rate_limit: u32) -> usize {
    let per_batch = (f64::from(rate_limit) * BATCH_INTERVAL.as_secs_f64()).round() as usize;
    per_batch.max(1)
}

/// Reply bookkeeping for one probed host
#[derive(Debug, Clone, Copy, Default)]
struct ReplyStats {
    replies: u32,
    total_rtt: Duration,
    last_rtt: Duration,
}

struct SweeperInner {
    send_socket: RawIcmpSocket,
    listen_socket: Arc<RawIcmpSocket>,
    identifier: u16,
    timeout: Duration,
    rate_limit: u32,
    probe_count: u32,
}

/// ICMP echo scanner
///
/// # Examples
///
/// ```no_run
/// use netsweep_core::{SweepConfig, Target};
/// use netsweep_scanner::IcmpSweeper;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> netsweep_core::Result<()> {
/// let sweeper = IcmpSweeper::new(&SweepConfig::default());
/// if sweeper.is_enabled() {
///     let ctx = CancellationToken::new();
///     let mut results = sweeper.scan(&ctx, vec![Target::icmp("192.168.1.1")])?;
///     while let Some(result) = results.recv().await {
///         println!("{}: available={}", result.target.host, result.available);
///     }
/// }
/// sweeper.stop(&CancellationToken::new())?;
/// # Ok(())
/// # }
/// ```
pub struct IcmpSweeper {
    inner: Mutex<Option<Arc<SweeperInner>>>,
    done: CancellationToken,
    stopped: AtomicBool,
}

impl IcmpSweeper {
    /// Create the scanner, acquiring the raw send socket and the listen
    /// connection.
    ///
    /// Never fails: when socket creation is refused (typically for missing
    /// CAP_NET_RAW) the scanner comes up disabled and
    /// [`is_enabled`](Self::is_enabled) returns `false`.
    pub fn new(config: &SweepConfig) -> Self {
        let inner = match (RawIcmpSocket::new(), RawIcmpSocket::listen()) {
            (Ok(send_socket), Ok(listen_socket)) => Some(Arc::new(SweeperInner {
                send_socket,
                listen_socket: Arc::new(listen_socket),
                identifier: std::process::id() as u16,
                timeout: config.timeout(),
                rate_limit: config.icmp_rate_limit,
                probe_count: (config.icmp_count.max(1)) as u32,
            })),
            (send, listen) => {
                let err = send.err().or(listen.err());
                warn!(
                    "ICMP scanner disabled: {}",
                    err.map(|e| e.to_string()).unwrap_or_default()
                );
                None
            }
        };

        Self {
            inner: Mutex::new(inner),
            done: CancellationToken::new(),
            stopped: AtomicBool::new(false),
        }
    }

    /// Create a scanner in the disabled state, as if raw sockets were
    /// refused
    pub fn disabled() -> Self {
        Self {
            inner: Mutex::new(None),
            done: CancellationToken::new(),
            stopped: AtomicBool::new(false),
        }
    }

    /// Whether raw sockets were acquired and ICMP targets can be probed
    pub fn is_enabled(&self) -> bool {
        self.inner.lock().is_some()
    }

    /// Probe every target and stream one result per target.
    ///
    /// The returned channel closes after both the sender and listener task
    /// have exited and all results were offered. Results for hosts that
    /// never replied arrive with `available=false` and 100% packet loss.
    pub fn scan(
        &self,
        ctx: &CancellationToken,
        targets: Vec<Target>,
    ) -> Result<mpsc::Receiver<SweepResult>> {
        let inner = self
            .inner
            .lock()
            .clone()
            .ok_or_else(|| Error::ScannerStart("ICMP scanner is disabled".to_string()))?;

        let (tx, rx) = mpsc::channel(RESULT_BUFFER);
        let ctx = ctx.clone();
        let done = self.done.clone();

        tokio::spawn(async move {
            run_scan(inner, ctx, done, targets, tx).await;
        });

        Ok(rx)
    }

    /// Release the raw send socket and the listen connection.
    ///
    /// Idempotent: the second and later calls are no-ops. Any in-flight
    /// scan observes the done signal and winds down promptly; the OS
    /// handles close once the last scan task drops its reference.
    pub fn stop(&self, _ctx: &CancellationToken) -> Result<()> {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.done.cancel();
        self.inner.lock().take();
        debug!("ICMP scanner stopped");
        Ok(())
    }
}

/// One full scan: emit invalid-target failures, send batched probes,
/// collect replies through the wait window, then emit per-target results.
async fn run_scan(
    inner: Arc<SweeperInner>,
    ctx: CancellationToken,
    done: CancellationToken,
    targets: Vec<Target>,
    tx: mpsc::Sender<SweepResult>,
) {
    // Independently guarded bookkeeping shared by sender and listener
    let seen: Arc<DashSet<Ipv4Addr>> = Arc::new(DashSet::new());
    let send_times: Arc<DashMap<Ipv4Addr, Instant>> = Arc::new(DashMap::new());
    let replies: Arc<DashMap<Ipv4Addr, ReplyStats>> = Arc::new(DashMap::new());
    let send_errors: Arc<DashMap<Ipv4Addr, String>> = Arc::new(DashMap::new());

    // Partition valid probes from malformed hosts, failing the latter
    // immediately without halting the sweep
    let mut probes: Vec<(Target, Ipv4Addr)> = Vec::with_capacity(targets.len());
    for target in targets {
        match target.host.parse::<Ipv4Addr>() {
            Ok(addr) => probes.push((target, addr)),
            Err(_) => {
                let err = Error::InvalidHost(target.host.clone());
                offer_result(&tx, SweepResult::new(target, false).with_error(err));
            }
        }
    }

    if probes.is_empty() {
        return;
    }

    // Listener: blocking reads under the socket's 100 ms deadline
    let listener_stop = CancellationToken::new();
    let listener = {
        let inner = Arc::clone(&inner);
        let ctx = ctx.clone();
        let done = done.clone();
        let stop = listener_stop.clone();
        let seen = Arc::clone(&seen);
        let send_times = Arc::clone(&send_times);
        let replies = Arc::clone(&replies);
        tokio::task::spawn_blocking(move || {
            listen_for_replies(&inner, &ctx, &done, &stop, &seen, &send_times, &replies)
        })
    };

    // Sender: fixed-interval batches against the rate budget
    send_probes(&inner, &ctx, &done, &probes, &send_times, &send_errors).await;

    // Wait window for outstanding replies
    tokio::select! {
        _ = tokio::time::sleep(inner.timeout) => {}
        _ = ctx.cancelled() => {}
        _ = done.cancelled() => {}
    }

    listener_stop.cancel();
    if let Err(e) = listener.await {
        warn!("ICMP listener task failed: {}", e);
    }

    // One result per original target
    for (target, addr) in probes {
        if ctx.is_cancelled() || done.is_cancelled() {
            break;
        }

        let result = if seen.contains(&addr) {
            let stats = replies.get(&addr).map(|s| *s).unwrap_or_default();
            let successes = stats.replies.min(inner.probe_count).max(1);
            let resp_time = if stats.replies > 0 {
                stats.total_rtt / successes
            } else {
                stats.last_rtt
            };
            let loss = 100.0 * f64::from(inner.probe_count - successes)
                / f64::from(inner.probe_count);
            SweepResult::new(target, true)
                .with_response_time(resp_time)
                .with_packet_loss(loss)
        } else {
            let mut result = SweepResult::new(target, false).with_packet_loss(100.0);
            if let Some(err) = send_errors.get(&addr) {
                result = result.with_error(err.value());
            }
            result
        };

        offer_result(&tx, result);
    }
}

/// Send `probe_count` echoes per target in rate-limited batches
async fn send_probes(
    inner: &SweeperInner,
    ctx: &CancellationToken,
    done: &CancellationToken,
    probes: &[(Target, Ipv4Addr)],
    send_times: &DashMap<Ipv4Addr, Instant>,
    send_errors: &DashMap<Ipv4Addr, String>,
) {
    let budget = batch_budget(inner.rate_limit);
    let mut ticker = tokio::time::interval(BATCH_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await; // the first tick is immediate

    let mut sequence: u16 = 0;
    let mut in_batch = 0usize;

    for round in 0..inner.probe_count {
        for (_, addr) in probes {
            if ctx.is_cancelled() || done.is_cancelled() {
                return;
            }

            if in_batch >= budget {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = ctx.cancelled() => return,
                    _ = done.cancelled() => return,
                }
                in_batch = 0;
            }

            sequence = sequence.wrapping_add(1);
            let packet = EchoRequest::new(inner.identifier, sequence)
                .with_payload(ECHO_PAYLOAD.to_vec())
                .encode();

            send_times.insert(*addr, Instant::now());
            match inner.send_socket.send_to(&packet, *addr) {
                Ok(_) => trace!(host = %addr, sequence, round, "sent echo request"),
                Err(e) => {
                    debug!(host = %addr, "echo send failed: {}", e);
                    send_errors.insert(*addr, e.to_string());
                }
            }
            in_batch += 1;
        }
    }
}

/// Read echo replies until told to stop, marking sources responsive
fn listen_for_replies(
    inner: &SweeperInner,
    ctx: &CancellationToken,
    done: &CancellationToken,
    stop: &CancellationToken,
    seen: &DashSet<Ipv4Addr>,
    send_times: &DashMap<Ipv4Addr, Instant>,
    replies: &DashMap<Ipv4Addr, ReplyStats>,
) {
    let mut buf = [0u8; 1500];

    while !(ctx.is_cancelled() || done.is_cancelled() || stop.is_cancelled()) {
        match inner.listen_socket.recv_from(&mut buf) {
            Ok((size, Some(source))) => {
                let Some(message) = strip_ipv4_header(&buf[..size]) else {
                    continue;
                };
                let Some(reply) = parse_echo_reply(message) else {
                    continue;
                };

                if reply.identifier != inner.identifier {
                    trace!(host = %source, identifier = reply.identifier, "foreign echo reply");
                }

                // Unmatched replies still mark the source responsive
                seen.insert(source);
                let rtt = send_times
                    .get(&source)
                    .map(|sent| sent.elapsed())
                    .unwrap_or_default();
                let mut stats = replies.entry(source).or_default();
                stats.replies += 1;
                stats.total_rtt += rtt;
                stats.last_rtt = rtt;
                trace!(host = %source, ?rtt, "echo reply");
            }
            Ok((_, None)) => {}
            Err(e) if is_timeout(&e) => {} // deadline expiry; re-check tokens
            Err(e) => {
                warn!("ICMP receive error: {}", e);
                std::thread::sleep(Duration::from_millis(10));
            }
        }
    }
}

/// Best-effort result delivery: drop with a log record on a full buffer
fn offer_result(tx: &mpsc::Sender<SweepResult>, result: SweepResult) {
    match tx.try_send(result) {
        Ok(()) => {}
        Err(TrySendError::Full(result)) => {
            debug!("result buffer full, dropping ICMP result for {}", result.target);
        }
        Err(TrySendError::Closed(_)) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netsweep_core::SweepConfig;

    #[test]
    fn test_batch_budget() {
        assert_eq!(batch_budget(1000), 10);
        assert_eq!(batch_budget(100), 1);
        assert_eq!(batch_budget(1), 1);
        assert_eq!(batch_budget(10_000), 100);
        // Sub-batch rates still send at least one packet per interval
        assert_eq!(batch_budget(10), 1);
    }

    #[tokio::test]
    async fn test_new_never_panics() {
        let sweeper = IcmpSweeper::new(&SweepConfig::default());
        // Enabled state depends on privileges; either is acceptable
        let _ = sweeper.is_enabled();
    }

    #[tokio::test]
    async fn test_disabled_scan_fails_to_start() {
        let sweeper = IcmpSweeper::disabled();
        assert!(!sweeper.is_enabled());

        let ctx = CancellationToken::new();
        let result = sweeper.scan(&ctx, vec![Target::icmp("127.0.0.1")]);
        assert!(matches!(result, Err(Error::ScannerStart(_))));
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let sweeper = IcmpSweeper::new(&SweepConfig::default());
        let ctx = CancellationToken::new();
        sweeper.stop(&ctx).unwrap();
        sweeper.stop(&ctx).unwrap();
        assert!(!sweeper.is_enabled());
    }

    #[tokio::test]
    async fn test_invalid_host_yields_failed_result() {
        let sweeper = IcmpSweeper::new(&SweepConfig {
            timeout_ms: 100,
            ..Default::default()
        });
        if !sweeper.is_enabled() {
            return; // unprivileged environment
        }

        let ctx = CancellationToken::new();
        let mut rx = sweeper
            .scan(&ctx, vec![Target::icmp("definitely-not-an-ip")])
            .unwrap();

        let result = rx.recv().await.unwrap();
        assert!(!result.available);
        assert_eq!(result.packet_loss, 100.0);
        assert!(result.error.as_deref().unwrap().contains("Invalid host"));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_loopback_probe_round_trip() {
        let sweeper = IcmpSweeper::new(&SweepConfig {
            timeout_ms: 500,
            ..Default::default()
        });
        if !sweeper.is_enabled() {
            return;
        }

        let ctx = CancellationToken::new();
        let mut rx = sweeper
            .scan(&ctx, vec![Target::icmp("127.0.0.1")])
            .unwrap();

        // Exactly one result for the one target; loopback normally answers
        let result = rx.recv().await.unwrap();
        assert_eq!(result.target.host, "127.0.0.1");
        if result.available {
            assert_eq!(result.packet_loss, 0.0);
        } else {
            assert_eq!(result.packet_loss, 100.0);
        }
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_cancelled_scan_closes_channel() {
        let sweeper = IcmpSweeper::new(&SweepConfig::default());
        if !sweeper.is_enabled() {
            return;
        }

        let ctx = CancellationToken::new();
        let targets: Vec<Target> = (1..=50)
            .map(|i| Target::icmp(format!("192.0.2.{}", i)))
            .collect();
        let mut rx = sweeper.scan(&ctx, targets).unwrap();
        ctx.cancel();

        // Channel must close; whatever results arrived before the
        // cancellation are fine
        while rx.recv().await.is_some() {}
    }
}
