//! Result processor
//!
//! Folds the unordered stream of probe results into stable per-host state.
//! Writers are serialised by an exclusive lock, which is the only ordering
//! the sweep gives results; repeated, interleaved, late, and duplicate
//! outcomes for the same target must all fold to the same aggregate.
//!
//! Memory stays bounded for very large port lists because only *available*
//! ports are recorded: a host probed on thousands of closed ports keeps an
//! empty `port_results` vector.

use crate::result_pool::HostPool;
use chrono::{DateTime, Utc};
use netsweep_core::{
    Error, HostResult, IcmpStatus, PortCount, PortResult, Result, SweepConfig, SweepMode,
    SweepResult, SweepSummary,
};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

struct ProcessorState {
    hosts: HashMap<String, HostResult>,
    /// Earliest observation per host, preserved across host-entry recycles
    first_seen_times: HashMap<String, DateTime<Utc>>,
    /// Hosts with an available entry per port
    port_counts: HashMap<u16, u64>,
    /// Networks whose enumeration metadata has been adopted
    networks_seen: HashSet<String>,
    total_hosts: u64,
    /// Unix seconds of the most recent processed result; 0 = none yet
    last_sweep: i64,
    pool: HostPool,
    port_count: usize,
}

/// Aggregates probe results into the host table
///
/// # Examples
///
/// ```
/// use netsweep_core::{SweepConfig, SweepResult, Target};
/// use netsweep_scanner::ResultProcessor;
/// use tokio_util::sync::CancellationToken;
///
/// let processor = ResultProcessor::new(&SweepConfig::default());
/// let result = SweepResult::new(Target::icmp("192.168.1.1"), true);
/// processor.process(&result).unwrap();
///
/// let summary = processor.summary(&CancellationToken::new()).unwrap();
/// assert_eq!(summary.hosts.len(), 1);
/// assert_eq!(summary.available_hosts, 1);
/// ```
pub struct ResultProcessor {
    state: RwLock<ProcessorState>,
}

impl ResultProcessor {
    /// Create a processor sized for `config.ports`
    pub fn new(config: &SweepConfig) -> Self {
        let port_count = config.ports.len();
        Self {
            state: RwLock::new(ProcessorState {
                hosts: HashMap::new(),
                first_seen_times: HashMap::new(),
                port_counts: HashMap::new(),
                networks_seen: HashSet::new(),
                total_hosts: 0,
                last_sweep: 0,
                pool: HostPool::new(port_count),
                port_count,
            }),
        }
    }

    /// Apply one probe result to the host table.
    ///
    /// Idempotent per `(host, port, mode, outcome)`: replaying a result
    /// leaves the same hosts, port lists, and counts.
    pub fn process(&self, result: &SweepResult) -> Result<()> {
        let mut state = self.state.write();
        let now = Utc::now();

        state.last_sweep = state.last_sweep.max(now.timestamp());

        // Adopt the enumerator's host budget the first time each network
        // reports, so total_hosts covers every enumerated network
        if let Some(meta) = &result.target.metadata {
            if !state.networks_seen.contains(&meta.network) {
                state.networks_seen.insert(meta.network.clone());
                state.total_hosts += meta.total_hosts;
            } else if state.total_hosts == 0 {
                state.total_hosts = meta.total_hosts;
            }
        }

        let host_key = result.target.host.clone();

        // The side table keeps the very first observation even if the
        // host entry itself has been recycled since
        let first_seen = {
            let entry = state
                .first_seen_times
                .entry(host_key.clone())
                .or_insert(result.first_seen);
            if result.first_seen < *entry {
                *entry = result.first_seen;
            }
            *entry
        };

        let ProcessorState {
            hosts,
            pool,
            port_counts,
            ..
        } = &mut *state;

        let host = hosts.entry(host_key.clone()).or_insert_with(|| {
            let mut host = pool.get();
            host.host = host_key.clone();
            host.first_seen = first_seen;
            host
        });
        host.first_seen = host.first_seen.min(first_seen);
        host.last_seen = now;

        match result.target.mode {
            SweepMode::Icmp => {
                if result.available {
                    host.icmp_status = Some(IcmpStatus {
                        available: true,
                        round_trip: result.resp_time,
                        packet_loss: 0.0,
                    });
                    host.available = true;
                } else {
                    // An ICMP failure never downgrades a host that has an
                    // open port or answered before
                    host.icmp_status = Some(IcmpStatus {
                        available: false,
                        round_trip: std::time::Duration::ZERO,
                        packet_loss: 100.0,
                    });
                }
            }
            SweepMode::Tcp => {
                // Only open ports are recorded; closed probes keep the
                // port list (and memory) untouched
                if result.available {
                    if let Some(port) = result.target.port {
                        match host.port_results.iter_mut().find(|p| p.port == port) {
                            Some(existing) => {
                                existing.available = true;
                                existing.resp_time = result.resp_time;
                            }
                            None => {
                                host.port_results.push(PortResult {
                                    port,
                                    available: true,
                                    resp_time: result.resp_time,
                                });
                                *port_counts.entry(port).or_insert(0) += 1;
                            }
                        }
                        host.available = true;
                    }
                }
            }
        }

        trace!(available = result.available, "processed result for {}", result.target);
        Ok(())
    }

    /// Snapshot the aggregate state.
    ///
    /// Honours `ctx`: a cancelled context aborts before any copying.
    /// Hosts and ports are ordered for stable snapshots.
    pub fn summary(&self, ctx: &CancellationToken) -> Result<SweepSummary> {
        if ctx.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let state = self.state.read();

        let last_sweep = if state.last_sweep == 0 {
            Utc::now().timestamp()
        } else {
            state.last_sweep
        };

        let mut hosts: Vec<HostResult> = state.hosts.values().cloned().collect();
        hosts.sort_by(|a, b| a.host.cmp(&b.host));
        let available_hosts = hosts.iter().filter(|h| h.available).count() as u64;

        let mut ports: Vec<PortCount> = state
            .port_counts
            .iter()
            .map(|(&port, &available_count)| PortCount {
                port,
                available_count,
            })
            .collect();
        ports.sort_by_key(|p| p.port);

        let total_hosts = if state.total_hosts > 0 {
            state.total_hosts
        } else {
            hosts.len() as u64
        };

        Ok(SweepSummary {
            total_hosts,
            available_hosts,
            last_sweep,
            ports,
            hosts,
        })
    }

    /// Adjust the processor for a new port list.
    ///
    /// Installs a pool with a `max(100, |ports|)` capacity hint when the
    /// port count changes. Host data is preserved.
    pub fn update_config(&self, config: &SweepConfig) {
        let mut state = self.state.write();
        let new_count = config.ports.len();
        if new_count != state.port_count {
            state.pool = HostPool::with_capacity_hint(new_count.max(100));
            state.port_count = new_count;
            debug!(ports = new_count, "result processor reconfigured");
        }
    }

    /// Recycle every host entry back into the pool and clear the per-port
    /// counts, keeping the first-seen side table and network bookkeeping.
    ///
    /// For deployments that restart aggregation at a retention boundary; a
    /// host rediscovered afterwards keeps its original `first_seen`.
    pub fn recycle_hosts(&self) {
        let mut state = self.state.write();
        let hosts: Vec<HostResult> = state.hosts.drain().map(|(_, host)| host).collect();
        for host in hosts {
            state.pool.put(host);
        }
        state.port_counts.clear();
        debug!("host table recycled");
    }
}
