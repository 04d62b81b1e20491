//! Counter storage backends.
//!
//! The limiter only talks to a [`CounterStore`]. The critical primitive is
//! [`CounterStore::increment_if_below`], which must perform the whole
//! load/roll/compare/increment sequence for one key atomically.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use super::counter::CounterRecord;
use super::keys::ScopedKey;

/// Errors raised by a counter backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// A failure worth one retry (dropped connection, busy backend).
    #[error("transient store error: {0}")]
    Transient(String),
    /// The backend cannot serve requests.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result of one atomic increment attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IncrementOutcome {
    /// Count after the attempt; unchanged when the request was not admitted.
    pub count: u64,
    /// Start of the window the count belongs to.
    pub window_start: DateTime<Utc>,
    pub admitted: bool,
}

/// Pluggable storage for counter records, shared by all in-flight requests.
#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn get(&self, scope: &str, key: &str) -> StoreResult<Option<CounterRecord>>;

    async fn put(&self, scope: &str, key: &str, record: CounterRecord) -> StoreResult<()>;

    async fn remove(&self, scope: &str, key: &str) -> StoreResult<()>;

    /// Atomically: load or create the record, reopen it if its window has
    /// elapsed, then add one request only if `count < limit`.
    async fn increment_if_below(
        &self,
        scope: &str,
        key: &str,
        limit: u64,
        window: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<IncrementOutcome>;

    /// Drop records of `scope` whose window has elapsed. Backends with native
    /// expiry can keep the default.
    async fn purge_expired(
        &self,
        _scope: &str,
        _window: Duration,
        _now: DateTime<Utc>,
    ) -> StoreResult<usize> {
        Ok(0)
    }
}

/// In-process store on a sharded concurrent map.
///
/// Each increment holds the shard lock of its key for the duration of the
/// read-modify-write, so concurrent callers on one key serialize while other
/// keys proceed independently.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: DashMap<ScopedKey, CounterRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live records across all scopes.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&self) {
        self.records.clear();
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn get(&self, scope: &str, key: &str) -> StoreResult<Option<CounterRecord>> {
        Ok(self
            .records
            .get(&ScopedKey::new(scope, key))
            .map(|r| r.value().clone()))
    }

    async fn put(&self, scope: &str, key: &str, record: CounterRecord) -> StoreResult<()> {
        self.records.insert(ScopedKey::new(scope, key), record);
        Ok(())
    }

    async fn remove(&self, scope: &str, key: &str) -> StoreResult<()> {
        self.records.remove(&ScopedKey::new(scope, key));
        Ok(())
    }

    async fn increment_if_below(
        &self,
        scope: &str,
        key: &str,
        limit: u64,
        window: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<IncrementOutcome> {
        let mut record = self
            .records
            .entry(ScopedKey::new(scope, key))
            .or_insert_with(|| {
                debug!(scope = scope, key = key, limit = limit, "Creating counter record");
                CounterRecord::open(key, now)
            });

        record.roll_if_expired(now, window);
        let admitted = record.try_admit(limit);

        Ok(IncrementOutcome {
            count: record.count,
            window_start: record.window_start,
            admitted,
        })
    }

    async fn purge_expired(
        &self,
        scope: &str,
        window: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<usize> {
        let before = self.records.len();
        self.records
            .retain(|k, r| k.scope != scope || !r.is_expired(now, window));
        Ok(before.saturating_sub(self.records.len()))
    }
}

/// Wraps a backend and retries a transient failure once after a short,
/// jittered pause. A second failure is reported as `Unavailable`.
#[derive(Debug)]
pub struct RetryingStore<S> {
    inner: S,
    backoff: Duration,
}

impl<S: CounterStore> RetryingStore<S> {
    pub fn new(inner: S, backoff: Duration) -> Self {
        Self { inner, backoff }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn jittered_backoff(&self) -> Duration {
        let base = self.backoff.as_millis() as u64;
        let jitter = if base > 1 {
            rand::thread_rng().gen_range(0..=base / 2)
        } else {
            0
        };
        Duration::from_millis(base + jitter)
    }

    async fn retry<T, F, Fut>(&self, op: &'static str, mut call: F) -> StoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        match call().await {
            Err(StoreError::Transient(reason)) => {
                warn!(op = op, error = %reason, "Transient counter store error, retrying once");
                tokio::time::sleep(self.jittered_backoff()).await;
                call().await.map_err(|e| match e {
                    StoreError::Transient(reason) => StoreError::Unavailable(reason),
                    unavailable => unavailable,
                })
            }
            other => other,
        }
    }
}

#[async_trait]
impl<S: CounterStore> CounterStore for RetryingStore<S> {
    async fn get(&self, scope: &str, key: &str) -> StoreResult<Option<CounterRecord>> {
        self.retry("get", || self.inner.get(scope, key)).await
    }

    async fn put(&self, scope: &str, key: &str, record: CounterRecord) -> StoreResult<()> {
        self.retry("put", || self.inner.put(scope, key, record.clone()))
            .await
    }

    async fn remove(&self, scope: &str, key: &str) -> StoreResult<()> {
        self.retry("remove", || self.inner.remove(scope, key)).await
    }

    async fn increment_if_below(
        &self,
        scope: &str,
        key: &str,
        limit: u64,
        window: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<IncrementOutcome> {
        self.retry("increment_if_below", || {
            self.inner.increment_if_below(scope, key, limit, window, now)
        })
        .await
    }

    async fn purge_expired(
        &self,
        scope: &str,
        window: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<usize> {
        self.retry("purge_expired", || self.inner.purge_expired(scope, window, now))
            .await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// A memory store that fails its next `failures` calls, optionally after a delay.
    #[derive(Debug)]
    pub(crate) struct FlakyStore {
        pub inner: MemoryStore,
        failures: AtomicUsize,
        error: StoreError,
        delay: Option<Duration>,
        pub calls: AtomicUsize,
    }

    impl FlakyStore {
        pub fn failing(failures: usize, error: StoreError) -> Self {
            Self {
                inner: MemoryStore::new(),
                failures: AtomicUsize::new(failures),
                error,
                delay: None,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn slow(delay: Duration) -> Self {
            Self {
                inner: MemoryStore::new(),
                failures: AtomicUsize::new(0),
                error: StoreError::Unavailable("unused".to_string()),
                delay: Some(delay),
                calls: AtomicUsize::new(0),
            }
        }

        async fn gate(&self) -> StoreResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let failed = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failed {
                Err(self.error.clone())
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl CounterStore for FlakyStore {
        async fn get(&self, scope: &str, key: &str) -> StoreResult<Option<CounterRecord>> {
            self.gate().await?;
            self.inner.get(scope, key).await
        }

        async fn put(&self, scope: &str, key: &str, record: CounterRecord) -> StoreResult<()> {
            self.gate().await?;
            self.inner.put(scope, key, record).await
        }

        async fn remove(&self, scope: &str, key: &str) -> StoreResult<()> {
            self.gate().await?;
            self.inner.remove(scope, key).await
        }

        async fn increment_if_below(
            &self,
            scope: &str,
            key: &str,
            limit: u64,
            window: Duration,
            now: DateTime<Utc>,
        ) -> StoreResult<IncrementOutcome> {
            self.gate().await?;
            self.inner
                .increment_if_below(scope, key, limit, window, now)
                .await
        }
    }
}
