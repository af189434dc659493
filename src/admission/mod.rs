//! Admission control
//!
//! Decides allow/deny for each inbound request under the two-tier daily
//! quota, with an allow-list bypass and an operational escape hatch.
//! All cross-request coordination is delegated to the usage store's
//! transaction; the controller itself holds no mutable state.

mod rocks;
mod store;

pub use rocks::RocksUsageStore;
pub use store::{
    MemoryUsageStore, QuotaLimits, StoreError, UsageDecision, UsageSnapshot, UsageStore,
};

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::timeout;
use tracing::{debug, error, warn};

use crate::metrics;

pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// Gatekeeper for the generation routes.
///
/// `admit` is the only entry point the request layer uses. Every
/// internal failure is folded into a deny, so handlers observe a plain
/// boolean and the store's failure modes never escape as faults.
pub struct AdmissionController {
    allow_list: HashSet<String>,
    bypass_quota: bool,
    limits: QuotaLimits,
    store_timeout: Duration,
    store: Arc<dyn UsageStore>,
}

impl AdmissionController {
    pub fn new(
        store: Arc<dyn UsageStore>,
        allow_list: HashSet<String>,
        limits: QuotaLimits,
        bypass_quota: bool,
        store_timeout: Duration,
    ) -> Self {
        // An empty identifier is the shared bucket for unidentifiable
        // callers; it must never be exempt from quota.
        let allow_list: HashSet<String> = allow_list
            .into_iter()
            .filter(|entry| {
                if entry.is_empty() {
                    warn!("ignoring empty allow-list entry");
                    false
                } else {
                    true
                }
            })
            .collect();

        Self {
            allow_list,
            bypass_quota,
            limits,
            store_timeout,
            store,
        }
    }

    pub fn allow_list_len(&self) -> usize {
        self.allow_list.len()
    }

    pub fn bypass_enabled(&self) -> bool {
        self.bypass_quota
    }

    /// Decide whether this client may proceed.
    ///
    /// `true` means the consumption has already been durably recorded
    /// (or the caller is exempt); `false` means the caller must be
    /// rejected and no counter was mutated.
    pub async fn admit(&self, client_id: &str) -> bool {
        if !client_id.is_empty() && self.allow_list.contains(client_id) {
            debug!(client_id, "allow-listed client admitted");
            metrics::record_admitted("allow_list");
            return true;
        }

        if self.bypass_quota {
            warn!(
                client_id,
                "quota bypass switch is on; admitting without accounting"
            );
            metrics::record_admitted("bypass");
            return true;
        }

        let period = current_period();
        self.admit_for_period(client_id, &period).await
    }

    async fn admit_for_period(&self, client_id: &str, period: &str) -> bool {
        let attempt = timeout(
            self.store_timeout,
            self.store.check_and_increment(client_id, period, self.limits),
        )
        .await;

        match attempt {
            Ok(Ok(UsageDecision::Admitted)) => {
                metrics::record_admitted("quota");
                true
            }
            Ok(Ok(UsageDecision::PerClientExhausted)) => {
                debug!(client_id, period, "per-client quota exhausted");
                metrics::record_denied("per_client");
                false
            }
            Ok(Ok(UsageDecision::GlobalExhausted)) => {
                debug!(client_id, period, "global quota exhausted");
                metrics::record_denied("global");
                false
            }
            Ok(Err(err)) => {
                error!(client_id, period, %err, "usage store failed; denying request");
                metrics::record_store_failure();
                metrics::record_denied("store_error");
                false
            }
            Err(_) => {
                error!(
                    client_id,
                    period,
                    timeout_ms = self.store_timeout.as_millis() as u64,
                    "usage store timed out; denying request"
                );
                metrics::record_store_failure();
                metrics::record_denied("store_timeout");
                false
            }
        }
    }

    /// Counter values for diagnostics; failures read as zero.
    pub async fn usage_snapshot(&self, client_id: &str) -> UsageSnapshot {
        let period = current_period();
        self.store
            .usage(client_id, &period)
            .await
            .unwrap_or_default()
    }
}

/// The calendar-day quota bucket, sampled from wall-clock UTC.
pub fn current_period() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const PERIOD: &str = "2025-06-01";

    /// Store whose every call fails; proves fail-closed behavior and
    /// that exempt paths never reach the store.
    struct FailingStore;

    #[async_trait]
    impl UsageStore for FailingStore {
        async fn check_and_increment(
            &self,
            _client_id: &str,
            _period: &str,
            _limits: QuotaLimits,
        ) -> Result<UsageDecision, StoreError> {
            Err(StoreError::Unavailable("injected failure".to_string()))
        }

        async fn usage(&self, _client_id: &str, _period: &str) -> Result<UsageSnapshot, StoreError> {
            Err(StoreError::Unavailable("injected failure".to_string()))
        }
    }

    /// Store that counts admission calls on top of the memory backend.
    struct CountingStore {
        inner: MemoryUsageStore,
        calls: AtomicUsize,
    }

    impl CountingStore {
        fn new() -> Self {
            Self {
                inner: MemoryUsageStore::new(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl UsageStore for CountingStore {
        async fn check_and_increment(
            &self,
            client_id: &str,
            period: &str,
            limits: QuotaLimits,
        ) -> Result<UsageDecision, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.check_and_increment(client_id, period, limits).await
        }

        async fn usage(&self, client_id: &str, period: &str) -> Result<UsageSnapshot, StoreError> {
            self.inner.usage(client_id, period).await
        }
    }

    fn controller(
        store: Arc<dyn UsageStore>,
        allow: &[&str],
        limits: QuotaLimits,
        bypass: bool,
    ) -> AdmissionController {
        AdmissionController::new(
            store,
            allow.iter().map(|entry| entry.to_string()).collect(),
            limits,
            bypass,
            Duration::from_secs(1),
        )
    }

    fn limits(per_client: u64, global: u64) -> QuotaLimits {
        QuotaLimits { per_client, global }
    }

    #[tokio::test]
    async fn allow_listed_clients_admit_even_when_store_is_down() {
        let gate = controller(Arc::new(FailingStore), &["203.0.113.7"], limits(1, 1), false);
        for _ in 0..5 {
            assert!(gate.admit("203.0.113.7").await);
        }
    }

    #[tokio::test]
    async fn allow_listed_clients_perform_no_store_writes() {
        let store = Arc::new(CountingStore::new());
        let gate = controller(store.clone(), &["203.0.113.7"], limits(100, 1000), false);

        assert!(gate.admit("203.0.113.7").await);
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
        let snapshot = store.usage("203.0.113.7", PERIOD).await.unwrap();
        assert_eq!(snapshot, UsageSnapshot::default());
    }

    #[tokio::test]
    async fn bypass_switch_admits_without_touching_the_store() {
        let gate = controller(Arc::new(FailingStore), &[], limits(1, 1), true);
        assert!(gate.admit("198.51.100.1").await);
    }

    #[tokio::test]
    async fn bypass_off_fails_closed_when_store_is_down() {
        let gate = controller(Arc::new(FailingStore), &[], limits(100, 1000), false);
        assert!(!gate.admit("198.51.100.1").await);
    }

    #[tokio::test]
    async fn per_client_limit_is_exact() {
        let store = Arc::new(MemoryUsageStore::new());
        let gate = controller(store.clone(), &[], limits(100, 1000), false);

        for n in 1..=100u64 {
            assert!(gate.admit_for_period("198.51.100.1", PERIOD).await);
            let snapshot = store.usage("198.51.100.1", PERIOD).await.unwrap();
            assert_eq!(snapshot.client_count, n);
        }

        assert!(!gate.admit_for_period("198.51.100.1", PERIOD).await);
        let snapshot = store.usage("198.51.100.1", PERIOD).await.unwrap();
        assert_eq!(snapshot.client_count, 100);
    }

    #[tokio::test]
    async fn exhausted_global_quota_blocks_fresh_clients() {
        let store = Arc::new(MemoryUsageStore::new());
        let gate = controller(store.clone(), &[], limits(10, 10), false);

        for _ in 0..10 {
            assert!(gate.admit_for_period("198.51.100.1", PERIOD).await);
        }

        assert!(!gate.admit_for_period("198.51.100.99", PERIOD).await);
        let snapshot = store.usage("198.51.100.99", PERIOD).await.unwrap();
        assert_eq!(snapshot.client_count, 0);
        assert_eq!(snapshot.global_count, 10);
    }

    #[tokio::test]
    async fn concurrent_admits_stop_exactly_at_the_limit() {
        let store = Arc::new(MemoryUsageStore::new());
        let gate = Arc::new(controller(store.clone(), &[], limits(100, 1000), false));

        let mut tasks = Vec::new();
        for _ in 0..150 {
            let gate = Arc::clone(&gate);
            tasks.push(tokio::spawn(async move {
                gate.admit_for_period("198.51.100.1", PERIOD).await
            }));
        }

        let mut admitted = 0;
        let mut denied = 0;
        for task in tasks {
            if task.await.expect("admit task panicked") {
                admitted += 1;
            } else {
                denied += 1;
            }
        }

        assert_eq!(admitted, 100);
        assert_eq!(denied, 50);
        let snapshot = store.usage("198.51.100.1", PERIOD).await.unwrap();
        assert_eq!(snapshot.client_count, 100);
        assert_eq!(snapshot.global_count, 100);
    }

    #[tokio::test]
    async fn denial_mutates_nothing() {
        let store = Arc::new(MemoryUsageStore::new());
        let gate = controller(store.clone(), &[], limits(1, 10), false);

        assert!(gate.admit_for_period("198.51.100.1", PERIOD).await);
        let before = store.usage("198.51.100.1", PERIOD).await.unwrap();

        assert!(!gate.admit_for_period("198.51.100.1", PERIOD).await);
        let after = store.usage("198.51.100.1", PERIOD).await.unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn quota_resets_at_the_period_boundary() {
        let store = Arc::new(MemoryUsageStore::new());
        let gate = controller(store.clone(), &[], limits(1, 10), false);

        assert!(gate.admit_for_period("198.51.100.1", "2025-06-01").await);
        assert!(!gate.admit_for_period("198.51.100.1", "2025-06-01").await);

        assert!(gate.admit_for_period("198.51.100.1", "2025-06-02").await);
        let snapshot = store.usage("198.51.100.1", "2025-06-02").await.unwrap();
        assert_eq!(snapshot.client_count, 1);
    }

    #[tokio::test]
    async fn two_client_scenario_with_small_limits() {
        // Limits 2 per-client / 3 global, empty allow-list, bypass off.
        let store = Arc::new(MemoryUsageStore::new());
        let gate = controller(store.clone(), &[], limits(2, 3), false);

        assert!(gate.admit_for_period("client-a", PERIOD).await);
        assert!(gate.admit_for_period("client-a", PERIOD).await);
        // A blocked by its per-client limit.
        assert!(!gate.admit_for_period("client-a", PERIOD).await);
        // B takes the last global slot.
        assert!(gate.admit_for_period("client-b", PERIOD).await);
        // C blocked by the global limit despite zero usage.
        assert!(!gate.admit_for_period("client-c", PERIOD).await);

        let snapshot = store.usage("client-c", PERIOD).await.unwrap();
        assert_eq!(snapshot.client_count, 0);
        assert_eq!(snapshot.global_count, 3);
    }

    #[tokio::test]
    async fn empty_identifier_is_never_allow_listed() {
        let store = Arc::new(MemoryUsageStore::new());
        let gate = controller(store.clone(), &[""], limits(1, 10), false);
        assert_eq!(gate.allow_list_len(), 0);

        // Unidentified callers share one bucket and stay subject to quota.
        assert!(gate.admit_for_period("", PERIOD).await);
        assert!(!gate.admit_for_period("", PERIOD).await);
    }

    #[tokio::test]
    async fn slow_store_is_treated_as_denial() {
        struct StalledStore;

        #[async_trait]
        impl UsageStore for StalledStore {
            async fn check_and_increment(
                &self,
                _client_id: &str,
                _period: &str,
                _limits: QuotaLimits,
            ) -> Result<UsageDecision, StoreError> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(UsageDecision::Admitted)
            }

            async fn usage(
                &self,
                _client_id: &str,
                _period: &str,
            ) -> Result<UsageSnapshot, StoreError> {
                Ok(UsageSnapshot::default())
            }
        }

        let gate = AdmissionController::new(
            Arc::new(StalledStore),
            HashSet::new(),
            limits(100, 1000),
            false,
            Duration::from_millis(50),
        );
        assert!(!gate.admit("198.51.100.1").await);
    }
}
