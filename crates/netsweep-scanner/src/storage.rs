//! Result storage
//!
//! The orchestrator hands every probe result to a [`ResultStore`] exactly
//! once, alongside the in-process aggregation the [`ResultProcessor`]
//! performs. Stores are expected to be idempotent on `(host, port, mode)`;
//! the SQL-backed store lives with the platform's persistence layer, this
//! crate ships the in-memory implementation.
//!
//! [`ResultProcessor`]: crate::processor::ResultProcessor

use netsweep_core::{Result, SweepResult};
use parking_lot::RwLock;
use std::future::Future;

/// Sink for probe results
pub trait ResultStore: Send + Sync {
    /// Persist one probe result
    fn save_result(&self, result: &SweepResult) -> impl Future<Output = Result<()>> + Send;
}

/// In-memory result store
///
/// Keeps results in a `Vec` behind an `RwLock`. No persistence, no I/O;
/// the default sink for one-shot sweeps and tests.
///
/// # Examples
///
/// ```
/// use netsweep_core::{SweepResult, Target};
/// use netsweep_scanner::{MemoryResultStore, ResultStore};
///
/// # async fn example() -> netsweep_core::Result<()> {
/// let store = MemoryResultStore::new();
/// store
///     .save_result(&SweepResult::new(Target::icmp("192.168.1.1"), true))
///     .await?;
/// assert_eq!(store.len(), 1);
/// # Ok(())
/// # }
/// ```
pub struct MemoryResultStore {
    results: RwLock<Vec<SweepResult>>,
}

impl MemoryResultStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            results: RwLock::new(Vec::new()),
        }
    }

    /// Create a store with pre-allocated capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            results: RwLock::new(Vec::with_capacity(capacity)),
        }
    }

    /// Snapshot all stored results
    pub fn results(&self) -> Vec<SweepResult> {
        self.results.read().clone()
    }

    /// Number of stored results
    pub fn len(&self) -> usize {
        self.results.read().len()
    }

    /// Whether the store holds no results
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all stored results
    pub fn clear(&self) {
        self.results.write().clear();
    }
}

impl Default for MemoryResultStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultStore for MemoryResultStore {
    async fn save_result(&self, result: &SweepResult) -> Result<()> {
        self.results.write().push(result.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netsweep_core::Target;

    #[tokio::test]
    async fn test_save_and_snapshot() {
        let store = MemoryResultStore::new();
        assert!(store.is_empty());

        store
            .save_result(&SweepResult::new(Target::tcp("10.0.0.1", 22), true))
            .await
            .unwrap();
        store
            .save_result(&SweepResult::new(Target::icmp("10.0.0.1"), false))
            .await
            .unwrap();

        assert_eq!(store.len(), 2);
        let results = store.results();
        assert!(results[0].available);
        assert!(!results[1].available);
    }

    #[tokio::test]
    async fn test_clear() {
        let store = MemoryResultStore::with_capacity(16);
        store
            .save_result(&SweepResult::new(Target::icmp("10.0.0.2"), true))
            .await
            .unwrap();
        store.clear();
        assert!(store.is_empty());
    }
}
