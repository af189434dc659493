//! Usage counter store abstraction
//!
//! The shared mutable counters live behind a trait with a single atomic
//! admission operation: read both counters, verify both limits, write
//! both back incremented or write nothing at all. Correctness under
//! concurrency is the store's responsibility; callers add no locking.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;

/// Daily quota limits enforced inside the store transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QuotaLimits {
    /// Maximum admitted requests per client per UTC day.
    pub per_client: u64,
    /// Maximum admitted requests across all clients per UTC day.
    pub global: u64,
}

impl Default for QuotaLimits {
    fn default() -> Self {
        Self {
            per_client: 100,
            global: 1000,
        }
    }
}

/// Outcome of the atomic check-and-increment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UsageDecision {
    /// Both counters were below their limits and have been incremented.
    Admitted,
    /// The per-client counter was at its limit; nothing was written.
    PerClientExhausted,
    /// The global counter was at its limit; nothing was written.
    GlobalExhausted,
}

/// Counter values observed for one `(client, period)` pair.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UsageSnapshot {
    pub client_count: u64,
    pub global_count: u64,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("usage store unavailable: {0}")]
    Unavailable(String),
    #[error("usage store conflict not resolved after {attempts} attempts")]
    ConflictExhausted { attempts: u32 },
    #[error("corrupt usage record at key {key}")]
    CorruptRecord { key: String },
}

/// Transactional usage counter store.
#[async_trait]
pub trait UsageStore: Send + Sync {
    /// Atomically admit one request for `(client_id, period)`.
    ///
    /// Missing counters read as zero. Both limit checks happen before
    /// any write; a denied request leaves both counters untouched, and
    /// a partial increment of only one counter is never observable.
    async fn check_and_increment(
        &self,
        client_id: &str,
        period: &str,
        limits: QuotaLimits,
    ) -> Result<UsageDecision, StoreError>;

    /// Read-only view of the current counters; missing records are zero.
    async fn usage(&self, client_id: &str, period: &str) -> Result<UsageSnapshot, StoreError>;
}

pub(crate) fn client_key(period: &str, client_id: &str) -> String {
    format!("usage/{period}/client/{client_id}")
}

pub(crate) fn global_key(period: &str) -> String {
    format!("usage/{period}/global")
}

/// In-memory backend.
///
/// One mutex spans both counters, so the read-check-write sequence is
/// atomic across keys. Counters accumulate for the process lifetime;
/// suitable for tests and single-node deployments that accept losing
/// counts on restart.
#[derive(Default)]
pub struct MemoryUsageStore {
    counters: Mutex<HashMap<String, u64>>,
}

impl MemoryUsageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UsageStore for MemoryUsageStore {
    async fn check_and_increment(
        &self,
        client_id: &str,
        period: &str,
        limits: QuotaLimits,
    ) -> Result<UsageDecision, StoreError> {
        let mut counters = self.counters.lock();
        let client_key = client_key(period, client_id);
        let global_key = global_key(period);
        let client_count = counters.get(&client_key).copied().unwrap_or(0);
        let global_count = counters.get(&global_key).copied().unwrap_or(0);

        if client_count >= limits.per_client {
            return Ok(UsageDecision::PerClientExhausted);
        }
        if global_count >= limits.global {
            return Ok(UsageDecision::GlobalExhausted);
        }

        counters.insert(client_key, client_count + 1);
        counters.insert(global_key, global_count + 1);
        Ok(UsageDecision::Admitted)
    }

    async fn usage(&self, client_id: &str, period: &str) -> Result<UsageSnapshot, StoreError> {
        let counters = self.counters.lock();
        Ok(UsageSnapshot {
            client_count: counters
                .get(&client_key(period, client_id))
                .copied()
                .unwrap_or(0),
            global_count: counters.get(&global_key(period)).copied().unwrap_or(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PERIOD: &str = "2025-06-01";

    fn limits(per_client: u64, global: u64) -> QuotaLimits {
        QuotaLimits { per_client, global }
    }

    #[tokio::test]
    async fn missing_counters_read_as_zero() {
        let store = MemoryUsageStore::new();
        let snapshot = store.usage("198.51.100.1", PERIOD).await.unwrap();
        assert_eq!(snapshot, UsageSnapshot::default());
    }

    #[tokio::test]
    async fn admit_increments_both_counters() {
        let store = MemoryUsageStore::new();
        let decision = store
            .check_and_increment("198.51.100.1", PERIOD, limits(2, 10))
            .await
            .unwrap();
        assert_eq!(decision, UsageDecision::Admitted);

        let snapshot = store.usage("198.51.100.1", PERIOD).await.unwrap();
        assert_eq!(snapshot.client_count, 1);
        assert_eq!(snapshot.global_count, 1);
    }

    #[tokio::test]
    async fn per_client_denial_writes_nothing() {
        let store = MemoryUsageStore::new();
        store
            .check_and_increment("198.51.100.1", PERIOD, limits(1, 10))
            .await
            .unwrap();

        let before = store.usage("198.51.100.1", PERIOD).await.unwrap();
        let decision = store
            .check_and_increment("198.51.100.1", PERIOD, limits(1, 10))
            .await
            .unwrap();
        assert_eq!(decision, UsageDecision::PerClientExhausted);
        let after = store.usage("198.51.100.1", PERIOD).await.unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn global_denial_applies_to_fresh_clients() {
        let store = MemoryUsageStore::new();
        store
            .check_and_increment("198.51.100.1", PERIOD, limits(5, 1))
            .await
            .unwrap();

        let decision = store
            .check_and_increment("198.51.100.2", PERIOD, limits(5, 1))
            .await
            .unwrap();
        assert_eq!(decision, UsageDecision::GlobalExhausted);
        let snapshot = store.usage("198.51.100.2", PERIOD).await.unwrap();
        assert_eq!(snapshot.client_count, 0);
        assert_eq!(snapshot.global_count, 1);
    }

    #[tokio::test]
    async fn periods_are_independent() {
        let store = MemoryUsageStore::new();
        store
            .check_and_increment("198.51.100.1", "2025-06-01", limits(1, 1))
            .await
            .unwrap();

        let decision = store
            .check_and_increment("198.51.100.1", "2025-06-02", limits(1, 1))
            .await
            .unwrap();
        assert_eq!(decision, UsageDecision::Admitted);
    }
}
