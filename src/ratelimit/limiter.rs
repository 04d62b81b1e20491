//! Core rate limiter implementation.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use super::clock::{Clock, SystemClock};
use super::counter::{to_delta, CounterRecord};
use super::policy::LimiterPolicy;
use super::store::{CounterStore, StoreError};
use crate::error::{Result, TollgateError};
use crate::request::RequestContext;
use crate::verdict::{Reason, Verdict};

/// Default bound on a single counter store call.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(50);

/// Fixed-window rate limiter over a shared counter store.
///
/// The store is passed in explicitly so tests and deployments choose their
/// own backend. The limiter itself holds no counters.
pub struct RateLimitEngine {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    store_timeout: Duration,
}

impl RateLimitEngine {
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<dyn CounterStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    /// Bound every store call by `timeout`.
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Count this request against its budget and report whether it may proceed.
    ///
    /// Skipped requests never touch the store. A denied request leaves the
    /// counter where it is. Fails with `StoreUnavailable` when the backend
    /// errors or does not answer within the timeout; callers decide the
    /// fallback.
    pub async fn check_and_increment(
        &self,
        policy: &LimiterPolicy,
        request: &RequestContext,
    ) -> Result<Verdict> {
        let limit = policy.limit_for(request);

        if policy.should_skip(request) {
            trace!(scope = policy.scope(), path = %request.path, "Rate limit skipped");
            return Ok(Verdict::quota(true, limit, limit, None, Reason::Skipped));
        }

        let key = policy.key_for(request);
        let now = self.clock.now();

        trace!(
            scope = policy.scope(),
            key = %key,
            limit = limit,
            "Checking rate limit"
        );

        let outcome = self
            .bounded(
                policy.scope(),
                self.store
                    .increment_if_below(policy.scope(), &key, limit, policy.window(), now),
            )
            .await?;

        let reset_at = outcome.window_start + to_delta(policy.window());

        if outcome.admitted {
            Ok(Verdict::quota(
                true,
                limit,
                limit.saturating_sub(outcome.count),
                Some(reset_at),
                Reason::Ok,
            ))
        } else {
            debug!(
                scope = policy.scope(),
                key = %key,
                count = outcome.count,
                limit = limit,
                "Rate limit exceeded"
            );
            Ok(Verdict::quota(false, limit, 0, Some(reset_at), Reason::LimitExceeded))
        }
    }

    /// The live record for `key` in `scope`, if any.
    pub async fn inspect(&self, scope: &str, key: &str) -> Result<Option<CounterRecord>> {
        self.bounded(scope, self.store.get(scope, key)).await
    }

    /// Forget the counter for `key` in `scope`, e.g. after a successful login.
    pub async fn reset(&self, scope: &str, key: &str) -> Result<()> {
        self.bounded(scope, self.store.remove(scope, key)).await
    }

    /// Drop records of this policy's scope whose window has closed.
    pub async fn purge_expired(&self, policy: &LimiterPolicy) -> Result<usize> {
        let now = self.clock.now();
        self.bounded(
            policy.scope(),
            self.store.purge_expired(policy.scope(), policy.window(), now),
        )
        .await
    }

    async fn bounded<T, F>(&self, scope: &str, call: F) -> Result<T>
    where
        F: std::future::Future<Output = std::result::Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.store_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(TollgateError::StoreUnavailable(format!(
                "scope '{}': {}",
                scope, err
            ))),
            Err(_) => Err(TollgateError::StoreUnavailable(format!(
                "scope '{}': no answer within {}ms",
                scope,
                self.store_timeout.as_millis()
            ))),
        }
    }
}
