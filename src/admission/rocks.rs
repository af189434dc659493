//! Durable usage counter store (RocksDB)
//!
//! Counters are 8-byte big-endian integers keyed by period and scope.
//! Each admission runs inside a pessimistic transaction: both keys are
//! locked with `get_for_update`, both limits verified, then both
//! counters written and committed. Two concurrent callers at a limit
//! boundary therefore cannot both observe "below limit" and both
//! commit. RocksDB calls are blocking, so all work runs on the tokio
//! blocking pool.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rocksdb::{ErrorKind, Options, TransactionDB, TransactionDBOptions};
use tracing::{debug, info};

use super::store::{
    client_key, global_key, QuotaLimits, StoreError, UsageDecision, UsageSnapshot, UsageStore,
};

/// Commit retries before the transaction is reported as failed. Only
/// uncommitted transactions are retried, so a request is never counted
/// twice.
const MAX_COMMIT_ATTEMPTS: u32 = 3;

pub struct RocksUsageStore {
    db: Arc<TransactionDB>,
}

impl RocksUsageStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let txn_opts = TransactionDBOptions::default();

        let db = TransactionDB::open(&opts, &txn_opts, path.as_ref())
            .map_err(|err| StoreError::Unavailable(err.to_string()))?;

        info!(path = %path.as_ref().display(), "usage store opened");
        Ok(Self { db: Arc::new(db) })
    }

    fn admit_blocking(
        db: &TransactionDB,
        client_key: &str,
        global_key: &str,
        limits: QuotaLimits,
    ) -> Result<UsageDecision, StoreError> {
        for attempt in 1..=MAX_COMMIT_ATTEMPTS {
            let txn = db.transaction();

            let client_count = match txn.get_for_update(client_key, true) {
                Ok(raw) => decode_count(client_key, raw)?,
                Err(err) if is_retryable(&err) => {
                    debug!(attempt, %err, "usage store lock contention; retrying");
                    continue;
                }
                Err(err) => return Err(StoreError::Unavailable(err.to_string())),
            };
            let global_count = match txn.get_for_update(global_key, true) {
                Ok(raw) => decode_count(global_key, raw)?,
                Err(err) if is_retryable(&err) => {
                    debug!(attempt, %err, "usage store lock contention; retrying");
                    continue;
                }
                Err(err) => return Err(StoreError::Unavailable(err.to_string())),
            };

            if client_count >= limits.per_client {
                return Ok(UsageDecision::PerClientExhausted);
            }
            if global_count >= limits.global {
                return Ok(UsageDecision::GlobalExhausted);
            }

            txn.put(client_key, (client_count + 1).to_be_bytes())
                .map_err(|err| StoreError::Unavailable(err.to_string()))?;
            txn.put(global_key, (global_count + 1).to_be_bytes())
                .map_err(|err| StoreError::Unavailable(err.to_string()))?;

            match txn.commit() {
                Ok(()) => return Ok(UsageDecision::Admitted),
                Err(err) if is_retryable(&err) => {
                    debug!(attempt, %err, "usage store commit conflict; retrying");
                }
                Err(err) => return Err(StoreError::Unavailable(err.to_string())),
            }
        }

        Err(StoreError::ConflictExhausted {
            attempts: MAX_COMMIT_ATTEMPTS,
        })
    }

    fn read_count(db: &TransactionDB, key: &str) -> Result<u64, StoreError> {
        let raw = db
            .get(key)
            .map_err(|err| StoreError::Unavailable(err.to_string()))?;
        decode_count(key, raw)
    }
}

#[async_trait]
impl UsageStore for RocksUsageStore {
    async fn check_and_increment(
        &self,
        client_id: &str,
        period: &str,
        limits: QuotaLimits,
    ) -> Result<UsageDecision, StoreError> {
        let db = Arc::clone(&self.db);
        let client_key = client_key(period, client_id);
        let global_key = global_key(period);

        tokio::task::spawn_blocking(move || {
            Self::admit_blocking(&db, &client_key, &global_key, limits)
        })
        .await
        .map_err(|err| StoreError::Unavailable(format!("store worker failed: {err}")))?
    }

    async fn usage(&self, client_id: &str, period: &str) -> Result<UsageSnapshot, StoreError> {
        let db = Arc::clone(&self.db);
        let client_key = client_key(period, client_id);
        let global_key = global_key(period);

        tokio::task::spawn_blocking(move || {
            Ok(UsageSnapshot {
                client_count: Self::read_count(&db, &client_key)?,
                global_count: Self::read_count(&db, &global_key)?,
            })
        })
        .await
        .map_err(|err| StoreError::Unavailable(format!("store worker failed: {err}")))?
    }
}

fn is_retryable(err: &rocksdb::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::Busy | ErrorKind::TimedOut | ErrorKind::TryAgain
    )
}

fn decode_count(key: &str, raw: Option<Vec<u8>>) -> Result<u64, StoreError> {
    match raw {
        None => Ok(0),
        Some(bytes) => {
            let array: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                StoreError::CorruptRecord {
                    key: key.to_string(),
                }
            })?;
            Ok(u64::from_be_bytes(array))
        }
    }
}
