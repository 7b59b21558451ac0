//! Host-result reuse pool
//!
//! Bounds allocation churn across repeated sweeps: instead of allocating a
//! fresh [`HostResult`] (and its `port_results` vector) for every host on
//! every sweep, the processor draws cleared records from this free list and
//! returns recycled ones to it. Returned records are cleared but keep
//! their vector capacity, so a long-running processor converges on a
//! steady-state allocation footprint.

use netsweep_core::HostResult;
use parking_lot::Mutex;

/// Free list of reusable [`HostResult`] records
pub struct HostPool {
    free: Mutex<Vec<HostResult>>,
    port_capacity: usize,
}

impl HostPool {
    /// Pool for a sweep probing `port_count` ports per host.
    ///
    /// The `port_results` capacity hint is `max(16, port_count / 4)`:
    /// most hosts expose far fewer open ports than the probe list.
    pub fn new(port_count: usize) -> Self {
        Self::with_capacity_hint((port_count / 4).max(16))
    }

    /// Pool with an explicit `port_results` capacity hint
    pub fn with_capacity_hint(port_capacity: usize) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            port_capacity: port_capacity.max(1),
        }
    }

    /// Take a cleared record, reusing a returned one when available
    pub fn get(&self) -> HostResult {
        match self.free.lock().pop() {
            Some(host) => host,
            None => HostResult::with_port_capacity(self.port_capacity),
        }
    }

    /// Return a record to the pool, clearing its fields
    pub fn put(&self, mut host: HostResult) {
        host.reset();
        self.free.lock().push(host);
    }

    /// The configured `port_results` capacity hint
    pub fn capacity_hint(&self) -> usize {
        self.port_capacity
    }

    /// Records currently waiting for reuse
    pub fn idle(&self) -> usize {
        self.free.lock().len()
    }
}
