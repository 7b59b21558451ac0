//! Pooled ICMP listen sockets
//!
//! A bounded pool of raw ICMP listen sockets for deployments that run many
//! concurrent sweeps. Sockets are created lazily up to `max_sockets`,
//! tracked with refcounts, and recycled by a background cleaner once they
//! exceed `max_age` or sit idle past `max_idle`. When every socket is in
//! use, [`IcmpSocketPool::get_socket`] reports saturation instead of
//! blocking; callers back off and retry on the next sweep.

use crate::raw_socket::RawIcmpSocket;
use netsweep_core::{Error, Result};
use parking_lot::Mutex;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Number of lock shards; entries are distributed by id
const POOL_SHARDS: usize = 8;

/// Sweep period of the background cleaner
const CLEANER_INTERVAL: Duration = Duration::from_secs(30);

struct PoolEntry {
    id: u64,
    socket: Arc<RawIcmpSocket>,
    created_at: Instant,
    last_used: Instant,
    refs: u32,
}

/// Whether an unreferenced entry has aged out of the pool
fn entry_expired(
    created_at: Instant,
    last_used: Instant,
    now: Instant,
    max_age: Duration,
    max_idle: Duration,
) -> bool {
    now.duration_since(created_at) >= max_age || now.duration_since(last_used) >= max_idle
}

struct PoolInner {
    shards: Vec<Mutex<Vec<PoolEntry>>>,
    max_sockets: usize,
    max_age: Duration,
    max_idle: Duration,
    total: AtomicUsize,
    closed: AtomicBool,
    next_id: AtomicU64,
}

impl PoolInner {
    fn release(&self, shard: usize, id: u64) {
        let mut entries = self.shards[shard].lock();
        if let Some(entry) = entries.iter_mut().find(|e| e.id == id) {
            entry.refs = entry.refs.saturating_sub(1);
            entry.last_used = Instant::now();
            trace!(id, refs = entry.refs, "released pooled ICMP socket");
        }
    }

    fn sweep_expired(&self) {
        let now = Instant::now();
        for shard in &self.shards {
            let mut entries = shard.lock();
            entries.retain(|e| {
                let keep = e.refs > 0
                    || !entry_expired(e.created_at, e.last_used, now, self.max_age, self.max_idle);
                if !keep {
                    self.total.fetch_sub(1, Ordering::Relaxed);
                    debug!(id = e.id, "recycling expired ICMP socket");
                }
                keep
            });
        }
    }
}

/// A leased socket; dropping it returns the lease to the pool
pub struct PooledSocket {
    inner: Arc<PoolInner>,
    shard: usize,
    id: u64,
    socket: Arc<RawIcmpSocket>,
}

impl Deref for PooledSocket {
    type Target = RawIcmpSocket;

    fn deref(&self) -> &Self::Target {
        &self.socket
    }
}

impl Drop for PooledSocket {
    fn drop(&mut self) {
        self.inner.release(self.shard, self.id);
    }
}

/// Bounded pool of raw ICMP listen sockets
///
/// # Examples
///
/// ```no_run
/// use netsweep_net::IcmpSocketPool;
/// use std::time::Duration;
///
/// # async fn example() -> netsweep_core::Result<()> {
/// let pool = IcmpSocketPool::new(4, Duration::from_secs(300), Duration::from_secs(60));
/// let socket = pool.get_socket()?;
/// // ... listen for replies ...
/// drop(socket);
/// pool.close();
/// # Ok(())
/// # }
/// ```
pub struct IcmpSocketPool {
    inner: Arc<PoolInner>,
    cleaner: CancellationToken,
}

impl IcmpSocketPool {
    /// Create a pool holding at most `max_sockets` listen sockets.
    ///
    /// Sockets are created on demand, so construction itself never needs
    /// raw-socket privileges. Must be called within a Tokio runtime; the
    /// cleaner task runs until [`close`](Self::close).
    pub fn new(max_sockets: usize, max_age: Duration, max_idle: Duration) -> Self {
        let inner = Arc::new(PoolInner {
            shards: (0..POOL_SHARDS).map(|_| Mutex::new(Vec::new())).collect(),
            max_sockets: max_sockets.max(1),
            max_age,
            max_idle,
            total: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            next_id: AtomicU64::new(0),
        });

        let cleaner = CancellationToken::new();
        let cleaner_inner = Arc::clone(&inner);
        let cleaner_token = cleaner.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(CLEANER_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cleaner_token.cancelled() => break,
                    _ = ticker.tick() => cleaner_inner.sweep_expired(),
                }
            }
            debug!("ICMP socket pool cleaner exiting");
        });

        Self { inner, cleaner }
    }

    /// Lease a listen socket from the pool.
    ///
    /// Reuses an unreferenced, unexpired socket when one exists; otherwise
    /// creates a new one while the pool is under `max_sockets`.
    ///
    /// # Errors
    ///
    /// - [`Error::NoAvailableSockets`] when all `max_sockets` are in use
    /// - [`Error::Network`] when the pool is closed or socket creation
    ///   fails (e.g. insufficient privileges)
    pub fn get_socket(&self) -> Result<PooledSocket> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(Error::Network("ICMP socket pool is closed".to_string()));
        }

        let now = Instant::now();

        // Reuse a free entry, dropping expired ones along the way
        for (shard_idx, shard) in self.inner.shards.iter().enumerate() {
            let mut entries = shard.lock();
            entries.retain(|e| {
                let keep = e.refs > 0
                    || !entry_expired(
                        e.created_at,
                        e.last_used,
                        now,
                        self.inner.max_age,
                        self.inner.max_idle,
                    );
                if !keep {
                    self.inner.total.fetch_sub(1, Ordering::Relaxed);
                }
                keep
            });

            if let Some(entry) = entries.iter_mut().find(|e| e.refs == 0) {
                entry.refs += 1;
                entry.last_used = now;
                trace!(id = entry.id, "reusing pooled ICMP socket");
                return Ok(PooledSocket {
                    inner: Arc::clone(&self.inner),
                    shard: shard_idx,
                    id: entry.id,
                    socket: Arc::clone(&entry.socket),
                });
            }
        }

        // All existing entries are referenced; grow if allowed
        if self.inner.total.load(Ordering::Relaxed) >= self.inner.max_sockets {
            return Err(Error::NoAvailableSockets);
        }

        let socket = Arc::new(RawIcmpSocket::listen()?);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let shard_idx = (id as usize) % POOL_SHARDS;

        self.inner.total.fetch_add(1, Ordering::Relaxed);
        self.inner.shards[shard_idx].lock().push(PoolEntry {
            id,
            socket: Arc::clone(&socket),
            created_at: now,
            last_used: now,
            refs: 1,
        });

        debug!(id, "created pooled ICMP socket");
        Ok(PooledSocket {
            inner: Arc::clone(&self.inner),
            shard: shard_idx,
            id,
            socket,
        })
    }

    /// Current number of sockets held by the pool
    pub fn len(&self) -> usize {
        self.inner.total.load(Ordering::Relaxed)
    }

    /// Whether the pool currently holds no sockets
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close the pool: stop the cleaner and drop every socket.
    ///
    /// Idempotent; leased sockets stay usable until their guards drop.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cleaner.cancel();
        for shard in &self.inner.shards {
            shard.lock().clear();
        }
        self.inner.total.store(0, Ordering::Relaxed);
        debug!("ICMP socket pool closed");
    }
}

impl Drop for IcmpSocketPool {
    fn drop(&mut self) {
        self.close();
    }
}
