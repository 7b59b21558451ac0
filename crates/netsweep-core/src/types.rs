//! Core types for network sweeps
//!
//! The model follows the life of a sweep: a [`Target`] is one probe to make,
//! a [`SweepResult`] is the outcome of one probe, and a [`HostResult`] is the
//! aggregate state the result processor maintains per host. A
//! [`SweepSummary`] is a point-in-time snapshot of all hosts handed to the
//! transport and storage layers.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::time::Duration;

/// Sweep protocol mode
///
/// A target carries exactly one mode. The combined scanner routes targets
/// to the per-protocol scanners based on this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SweepMode {
    /// TCP connect probe against a specific port
    Tcp,
    /// ICMP echo probe against the host
    Icmp,
}

impl fmt::Display for SweepMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SweepMode::Tcp => write!(f, "tcp"),
            SweepMode::Icmp => write!(f, "icmp"),
        }
    }
}

impl FromStr for SweepMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(SweepMode::Tcp),
            "icmp" => Ok(SweepMode::Icmp),
            other => Err(Error::Parse(format!("unknown sweep mode: {}", other))),
        }
    }
}

/// Advisory metadata attached to a target by the enumerator
///
/// Records which configured network the target was expanded from and the
/// enumerator's interior-host estimate for that network, so downstream
/// consumers can attribute hosts to networks without re-parsing CIDRs.
/// Metadata never participates in target identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetMetadata {
    /// Originating network label, e.g. `"192.168.1.0/24"`
    pub network: String,
    /// Interior host count the enumerator computed for that network
    pub total_hosts: u64,
}

/// One probe to perform: a (host, mode[, port]) tuple
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    /// Textual IPv4 address of the host to probe
    pub host: String,
    /// Destination port; set when `mode` is [`SweepMode::Tcp`], unused for ICMP
    pub port: Option<u16>,
    /// Protocol mode for this probe
    pub mode: SweepMode,
    /// Advisory enumeration metadata; excluded from equality and hashing
    pub metadata: Option<TargetMetadata>,
}

impl Target {
    /// Create an ICMP target for `host`
    pub fn icmp(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: None,
            mode: SweepMode::Icmp,
            metadata: None,
        }
    }

    /// Create a TCP target for `host:port`
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port: Some(port),
            mode: SweepMode::Tcp,
            metadata: None,
        }
    }

    /// Attach enumeration metadata
    pub fn with_metadata(mut self, metadata: TargetMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// The `"host:port"` key used by the TCP connection pool
    pub fn pool_key(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{}", self.host, port),
            None => self.host.clone(),
        }
    }
}

impl PartialEq for Target {
    fn eq(&self, other: &Self) -> bool {
        self.host == other.host && self.port == other.port && self.mode == other.mode
    }
}

impl Eq for Target {}

impl Hash for Target {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.host.hash(state);
        self.port.hash(state);
        self.mode.hash(state);
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(f, "{} {}:{}", self.mode, self.host, port),
            None => write!(f, "{} {}", self.mode, self.host),
        }
    }
}

/// Outcome of one probe against one target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepResult {
    /// The target this result answers
    pub target: Target,
    /// Whether the probe succeeded (reply received / connection established)
    pub available: bool,
    /// When this probe observed the host first (probe start)
    pub first_seen: DateTime<Utc>,
    /// When this probe observed the host last (probe completion)
    pub last_seen: DateTime<Utc>,
    /// Elapsed time of the successful probe; zero on failure
    pub resp_time: Duration,
    /// Packet loss percentage in `[0, 100]`; meaningful for ICMP only
    pub packet_loss: f64,
    /// Failure detail captured verbatim, when the probe failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SweepResult {
    /// Create a result observed now
    pub fn new(target: Target, available: bool) -> Self {
        let now = Utc::now();
        Self {
            target,
            available,
            first_seen: now,
            last_seen: now,
            resp_time: Duration::ZERO,
            packet_loss: if available { 0.0 } else { 100.0 },
            error: None,
        }
    }

    /// Set the measured response time
    pub fn with_response_time(mut self, resp_time: Duration) -> Self {
        self.resp_time = resp_time;
        self
    }

    /// Set the packet-loss percentage
    pub fn with_packet_loss(mut self, packet_loss: f64) -> Self {
        self.packet_loss = packet_loss;
        self
    }

    /// Attach the failure detail
    pub fn with_error(mut self, error: impl fmt::Display) -> Self {
        self.error = Some(error.to_string());
        self
    }
}

/// Per-port aggregate within a host
///
/// Identity is `port` within the owning host; the processor maintains at
/// most one entry per port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortResult {
    pub port: u16,
    pub available: bool,
    pub resp_time: Duration,
}

/// ICMP reachability state for a host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IcmpStatus {
    pub available: bool,
    pub round_trip: Duration,
    pub packet_loss: f64,
}

/// Aggregate state for one host, owned by the result processor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostResult {
    /// Textual IPv4 address; identity of this record
    pub host: String,
    /// Whether any probe has seen this host respond
    pub available: bool,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// ICMP reachability, present once an ICMP result has been processed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icmp_status: Option<IcmpStatus>,
    /// Open ports observed on this host; at most one entry per port
    pub port_results: Vec<PortResult>,
}

impl HostResult {
    /// Create a fresh host record with the given `port_results` capacity
    pub fn with_port_capacity(capacity: usize) -> Self {
        let now = Utc::now();
        Self {
            host: String::new(),
            available: false,
            first_seen: now,
            last_seen: now,
            icmp_status: None,
            port_results: Vec::with_capacity(capacity.max(1)),
        }
    }

    /// Clear all fields for reuse, keeping allocated capacity
    pub fn reset(&mut self) {
        let now = Utc::now();
        self.host.clear();
        self.available = false;
        self.first_seen = now;
        self.last_seen = now;
        self.icmp_status = None;
        self.port_results.clear();
    }

    /// Find the aggregate entry for `port`, if any
    pub fn port_result(&self, port: u16) -> Option<&PortResult> {
        self.port_results.iter().find(|p| p.port == port)
    }
}

/// Per-port availability count across all hosts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortCount {
    pub port: u16,
    pub available_count: u64,
}

/// Immutable point-in-time snapshot of the sweep aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepSummary {
    /// Enumerator's host budget, or the observed host count when unknown
    pub total_hosts: u64,
    /// Number of hosts currently marked available
    pub available_hosts: u64,
    /// Unix timestamp (seconds) of the most recent processed result
    pub last_sweep: i64,
    /// Per-port availability counts, ordered by port
    pub ports: Vec<PortCount>,
    /// Per-host aggregates
    pub hosts: Vec<HostResult>,
}
