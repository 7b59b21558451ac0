//! Sharded TCP connection pool
//!
//! Keyed connection reuse for the TCP scanner. Connections are keyed by
//! `"host:port"` and partitioned across a fixed number of shards by a
//! stable hash of the key; each shard guards its own map with its own
//! mutex, so acquisition on one key never contends with release on an
//! unrelated one. Dialing always happens outside the shard lock.
//!
//! Expiry is enforced lazily during acquisition: entries idle past
//! `idle_timeout` or older than `max_lifetime` are closed and dropped
//! before a surviving entry is handed out. Release re-stamps
//! `created_at`, so the lifetime clock measures time spent pooled.

use netsweep_core::{Error, Result};
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace};

/// Number of lock shards
const SHARD_COUNT: usize = 32;

struct PooledConn {
    stream: TcpStream,
    created_at: Instant,
    last_used: Instant,
}

impl PooledConn {
    fn expired(&self, now: Instant, idle_timeout: Duration, max_lifetime: Duration) -> bool {
        now.duration_since(self.last_used) >= idle_timeout
            || now.duration_since(self.created_at) >= max_lifetime
    }
}

type Shard = Mutex<HashMap<String, Vec<PooledConn>>>;

/// Keyed, sharded pool of reusable TCP connections
pub struct ConnectionPool {
    shards: Vec<Shard>,
    max_idle: usize,
    max_lifetime: Duration,
    idle_timeout: Duration,
    dial_timeout: Duration,
    closed: AtomicBool,
}

impl ConnectionPool {
    /// Create a pool.
    ///
    /// * `dial_timeout` bounds every new connection attempt
    /// * `max_idle` bounds the idle connections kept per key
    /// * `max_lifetime` / `idle_timeout` bound how long a pooled entry
    ///   survives
    pub fn new(
        dial_timeout: Duration,
        max_idle: usize,
        max_lifetime: Duration,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(HashMap::new())).collect(),
            max_idle,
            max_lifetime,
            idle_timeout,
            dial_timeout,
            closed: AtomicBool::new(false),
        }
    }

    fn shard_for(&self, key: &str) -> &Shard {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARD_COUNT]
    }

    /// Acquire a connection for `key`, reusing a pooled entry when one
    /// survives expiry, otherwise dialing `addr`.
    ///
    /// Dial failures surface as [`Error::Network`] with the OS error text
    /// preserved; a timed-out dial reports the configured deadline.
    pub async fn acquire(&self, key: &str, addr: SocketAddr) -> Result<TcpStream> {
        if !self.closed.load(Ordering::Acquire) {
            let now = Instant::now();
            let mut shard = self.shard_for(key).lock();
            if let Some(entries) = shard.get_mut(key) {
                entries.retain(|entry| {
                    !entry.expired(now, self.idle_timeout, self.max_lifetime)
                });
                if let Some(entry) = entries.pop() {
                    trace!(key, "reusing pooled connection");
                    return Ok(entry.stream);
                }
            }
        }

        // No pooled entry survived; dial outside any lock
        match timeout(self.dial_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(Error::Network(e.to_string())),
            Err(_elapsed) => Err(Error::Network(format!(
                "connection to {} timed out after {:?}",
                addr, self.dial_timeout
            ))),
        }
    }

    /// Return a connection to the pool.
    ///
    /// Kept only while the per-key entry list is under `max_idle`;
    /// otherwise (or after [`close`](Self::close)) the connection is
    /// dropped. The entry's lifetime clock restarts here.
    pub fn release(&self, key: &str, stream: TcpStream) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }

        let now = Instant::now();
        let mut shard = self.shard_for(key).lock();
        let entries = shard.entry(key.to_string()).or_default();
        if entries.len() < self.max_idle {
            entries.push(PooledConn {
                stream,
                created_at: now,
                last_used: now,
            });
            trace!(key, idle = entries.len(), "pooled connection");
        } else {
            trace!(key, "pool full for key, dropping connection");
        }
    }

    /// Idle connections currently pooled for `key`
    pub fn idle_count(&self, key: &str) -> usize {
        self.shard_for(key)
            .lock()
            .get(key)
            .map(|entries| entries.len())
            .unwrap_or(0)
    }

    /// Idle connections across every key
    pub fn total_idle(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.lock().values().map(Vec::len).sum::<usize>())
            .sum()
    }

    /// Close every pooled connection and clear the maps.
    ///
    /// Idempotent. Later acquisitions dial directly without pooling.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        for shard in &self.shards {
            shard.lock().clear();
        }
        debug!("TCP connection pool closed");
    }
}
