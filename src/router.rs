//! Per-request policy composition.
//!
//! The router resolves the caller, picks the scope for the request path, runs
//! the rate limiter and then, for tiered content only, the access decision.
//! A rate limit denial short-circuits before the access decision runs.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::access::{AccessEngine, HeaderIdentityResolver, Identity, IdentityResolver};
use crate::config::CompiledConfig;
use crate::error::TollgateError;
use crate::ratelimit::{
    CounterStore, FailurePolicy, LimiterPolicy, RateLimitEngine, RouteTable,
};
use crate::request::{InboundRequest, RequestContext};
use crate::verdict::{Reason, Verdict};

/// The composite outcome of evaluating one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum PolicyOutcome {
    /// Both checks passed (or the request needed no access check).
    Admitted(Evaluation),
    /// The rate limiter denied the request; no access decision was made.
    RateLimited(Evaluation),
    /// The rate limiter admitted the request but the caller's tier is too low.
    Forbidden(Evaluation),
    /// The counter store failed and the scope fails closed.
    Unavailable(Evaluation),
}

/// The verdicts behind an outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Evaluation {
    pub decision_id: Uuid,
    pub scope: String,
    pub rate_limit: Verdict,
    pub access: Option<Verdict>,
    pub evaluated_at: DateTime<Utc>,
}

impl PolicyOutcome {
    pub fn evaluation(&self) -> &Evaluation {
        match self {
            PolicyOutcome::Admitted(e)
            | PolicyOutcome::RateLimited(e)
            | PolicyOutcome::Forbidden(e)
            | PolicyOutcome::Unavailable(e) => e,
        }
    }

    pub fn is_admitted(&self) -> bool {
        matches!(self, PolicyOutcome::Admitted(_))
    }
}

/// Composes identity resolution, rate limiting and access decisions.
pub struct PolicyRouter {
    routes: RwLock<Arc<RouteTable>>,
    limiter: RateLimitEngine,
    access: AccessEngine,
    resolver: Arc<dyn IdentityResolver>,
}

impl PolicyRouter {
    pub fn new(routes: RouteTable, limiter: RateLimitEngine, access: AccessEngine) -> Self {
        Self {
            routes: RwLock::new(Arc::new(routes)),
            limiter,
            access,
            resolver: Arc::new(HeaderIdentityResolver::default()),
        }
    }

    /// Build a router from validated configuration over `store`.
    pub fn from_config(
        config: CompiledConfig,
        store: Arc<dyn CounterStore>,
        store_timeout: std::time::Duration,
    ) -> Self {
        let limiter = RateLimitEngine::new(store).with_store_timeout(store_timeout);
        Self::new(config.routes, limiter, AccessEngine::new(config.tier_mapping))
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn IdentityResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Replace the route table, e.g. after a configuration reload.
    pub fn set_routes(&self, routes: RouteTable) {
        *self.routes.write() = Arc::new(routes);
        info!("Route table replaced");
    }

    pub fn routes(&self) -> Arc<RouteTable> {
        self.routes.read().clone()
    }

    pub fn limiter(&self) -> &RateLimitEngine {
        &self.limiter
    }

    pub fn access(&self) -> &AccessEngine {
        &self.access
    }

    /// Sweep closed windows from every scope. Returns the number of records dropped.
    pub async fn purge_expired(&self) -> usize {
        let routes = self.routes();
        let mut purged = 0;
        for policy in routes.policies() {
            match self.limiter.purge_expired(policy).await {
                Ok(n) => purged += n,
                Err(err) => warn!(scope = policy.scope(), error = %err, "Counter purge failed"),
            }
        }
        purged
    }

    /// Evaluate one inbound request.
    pub async fn evaluate(&self, request: &InboundRequest) -> PolicyOutcome {
        let decision_id = Uuid::new_v4();

        let (identity, tier_error) = match self.resolver.resolve(request) {
            Ok(Some(identity)) => (identity, None),
            Ok(None) => (Identity::anonymous(), None),
            Err(err) => {
                warn!(
                    decision_id = %decision_id,
                    path = %request.path,
                    error = %err,
                    "Identity carries an invalid tier, treating caller as anonymous"
                );
                (Identity::anonymous(), Some(err))
            }
        };

        let policy = self.routes().select(&request.path).clone();
        let ctx = RequestContext::new(request, identity);

        let rate_limit = self.rate_limit(&policy, &ctx, decision_id).await;
        let evaluated_at = self.limiter.clock().now();
        let mut evaluation = Evaluation {
            decision_id,
            scope: policy.scope().to_string(),
            rate_limit,
            access: None,
            evaluated_at,
        };

        if !evaluation.rate_limit.allowed {
            return match evaluation.rate_limit.reason {
                Reason::StoreFailClosed => PolicyOutcome::Unavailable(evaluation),
                _ => PolicyOutcome::RateLimited(evaluation),
            };
        }

        let Some(required) = request.required_tier.as_deref() else {
            return PolicyOutcome::Admitted(evaluation);
        };

        let access = match tier_error {
            Some(_) => Verdict::access(false, Reason::UnknownTier),
            None => match self.access.decide_token(required, &ctx.identity) {
                Ok(verdict) => verdict,
                Err(err) => {
                    warn!(
                        decision_id = %decision_id,
                        path = %request.path,
                        error = %err,
                        "Content requires an unknown tier, denying"
                    );
                    Verdict::access(false, Reason::UnknownTier)
                }
            },
        };

        let allowed = access.allowed;
        if !allowed {
            debug!(
                decision_id = %decision_id,
                path = %request.path,
                required = required,
                reason = %access.reason,
                "Access denied"
            );
        }
        evaluation.access = Some(access);

        if allowed {
            PolicyOutcome::Admitted(evaluation)
        } else {
            PolicyOutcome::Forbidden(evaluation)
        }
    }

    async fn rate_limit(
        &self,
        policy: &LimiterPolicy,
        ctx: &RequestContext,
        decision_id: Uuid,
    ) -> Verdict {
        match self.limiter.check_and_increment(policy, ctx).await {
            Ok(verdict) => verdict,
            Err(TollgateError::StoreUnavailable(reason)) => {
                let limit = policy.limit_for(ctx);
                let retry_at = self.limiter.clock().now() + chrono::Duration::seconds(1);
                match policy.store_failure_policy() {
                    FailurePolicy::FailOpen => {
                        warn!(
                            decision_id = %decision_id,
                            scope = policy.scope(),
                            error = %reason,
                            "Counter store unavailable, failing open"
                        );
                        Verdict::quota(true, limit, limit, None, Reason::StoreFailOpen)
                    }
                    FailurePolicy::FailClosed => {
                        warn!(
                            decision_id = %decision_id,
                            scope = policy.scope(),
                            error = %reason,
                            "Counter store unavailable, failing closed"
                        );
                        Verdict::quota(false, limit, 0, Some(retry_at), Reason::StoreFailClosed)
                    }
                }
            }
            Err(err) => {
                // The limiter only reports store failures; anything else is a bug, so deny.
                warn!(
                    decision_id = %decision_id,
                    scope = policy.scope(),
                    error = %err,
                    "Unexpected rate limiter error, failing closed"
                );
                Verdict::quota(false, 0, 0, None, Reason::StoreFailClosed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{SUBJECT_HEADER, TIER_HEADER};
    use crate::config::TollgateConfig;
    use crate::ratelimit::{ManualClock, MemoryStore, StoreError};
    use crate::ratelimit::store::testing::FlakyStore;
    use chrono::TimeZone;
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 1, 6, 0, 0).unwrap()
    }

    fn router_over(store: Arc<dyn CounterStore>) -> PolicyRouter {
        let compiled = TollgateConfig::default().compile().unwrap();
        let limiter = RateLimitEngine::with_clock(store, Arc::new(ManualClock::new(t0())));
        PolicyRouter::new(compiled.routes, limiter, AccessEngine::new(compiled.tier_mapping))
    }

    fn router() -> PolicyRouter {
        router_over(Arc::new(MemoryStore::new()))
    }

    fn from(ip: [u8; 4], path: &str) -> InboundRequest {
        InboundRequest::new(path).with_client_ip(IpAddr::V4(Ipv4Addr::from(ip)))
    }

    fn as_member(request: InboundRequest, subject: &str, tier: &str) -> InboundRequest {
        request
            .with_header(SUBJECT_HEADER, subject)
            .with_header(TIER_HEADER, tier)
    }

    #[tokio::test]
    async fn test_plain_request_admitted() {
        let outcome = router().evaluate(&from([1, 2, 3, 4], "/news")).await;
        assert!(outcome.is_admitted());

        let evaluation = outcome.evaluation();
        assert_eq!(evaluation.scope, "general");
        assert_eq!(evaluation.rate_limit.reason, Reason::Ok);
        assert_eq!(evaluation.rate_limit.remaining, 99);
        assert!(evaluation.access.is_none());
        assert_eq!(evaluation.evaluated_at, t0());
    }

    #[tokio::test]
    async fn test_anonymous_premium_forbidden() {
        let request = from([1, 2, 3, 4], "/news/premium/1").with_required_tier("premium");
        let outcome = router().evaluate(&request).await;

        let PolicyOutcome::Forbidden(evaluation) = outcome else {
            panic!("expected forbidden, got {:?}", outcome);
        };
        assert!(evaluation.rate_limit.allowed);
        assert_eq!(evaluation.access.unwrap().reason, Reason::AnonymousDenied);
    }

    #[tokio::test]
    async fn test_member_premium_admitted() {
        let request = as_member(from([1, 2, 3, 4], "/news/premium/1"), "u1", "individual")
            .with_required_tier("premium");
        let outcome = router().evaluate(&request).await;

        assert!(outcome.is_admitted());
        assert_eq!(
            outcome.evaluation().access.as_ref().unwrap().reason,
            Reason::TierSufficient
        );
    }

    #[tokio::test]
    async fn test_rate_limit_short_circuits_access() {
        let router = router();
        let login = |n: u8| {
            from([5, 5, 5, 5], "/api/auth/login")
                .with_credential("reader@example.com")
                .with_required_tier(if n == 0 { "free" } else { "premium" })
        };

        for _ in 0..5 {
            assert!(!matches!(
                router.evaluate(&login(0)).await,
                PolicyOutcome::RateLimited(_)
            ));
        }

        let outcome = router.evaluate(&login(1)).await;
        let PolicyOutcome::RateLimited(evaluation) = outcome else {
            panic!("expected rate limited, got {:?}", outcome);
        };
        assert_eq!(evaluation.scope, "auth");
        assert_eq!(evaluation.rate_limit.reason, Reason::LimitExceeded);
        assert!(evaluation.access.is_none());
    }

    #[tokio::test]
    async fn test_auth_budget_is_per_credential() {
        let router = router();
        let attempt = |email: &str| {
            from([5, 5, 5, 5], "/api/auth/login").with_credential(email.to_string())
        };

        for _ in 0..5 {
            router.evaluate(&attempt("victim@example.com")).await;
        }
        assert!(!router.evaluate(&attempt("victim@example.com")).await.is_admitted());
        assert!(router.evaluate(&attempt("other@example.com")).await.is_admitted());
    }

    #[tokio::test]
    async fn test_organization_skips_api_limit() {
        let router = router();
        let request = as_member(from([9, 9, 9, 9], "/api/articles"), "org-1", "organization");

        for _ in 0..1500 {
            let outcome = router.evaluate(&request).await;
            assert_eq!(outcome.evaluation().rate_limit.reason, Reason::Skipped);
        }
        assert!(router.limiter().inspect("api", "sub:org-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_api_budget_follows_tier() {
        let router = router();
        let free = as_member(from([9, 9, 9, 9], "/api/articles"), "f1", "free");
        let outcome = router.evaluate(&free).await;
        assert_eq!(outcome.evaluation().rate_limit.limit, 60);

        let anonymous = from([9, 9, 9, 9], "/api/articles");
        let outcome = router.evaluate(&anonymous).await;
        assert_eq!(outcome.evaluation().rate_limit.limit, 20);
    }

    #[tokio::test]
    async fn test_invalid_tier_claim_denies_content() {
        let request = as_member(from([1, 1, 1, 1], "/news/x"), "u1", "platinum")
            .with_required_tier("free");
        let outcome = router().evaluate(&request).await;

        let PolicyOutcome::Forbidden(evaluation) = outcome else {
            panic!("expected forbidden, got {:?}", outcome);
        };
        assert_eq!(evaluation.access.unwrap().reason, Reason::UnknownTier);
    }

    #[tokio::test]
    async fn test_invalid_tier_claim_still_browses() {
        let request = as_member(from([1, 1, 1, 1], "/news"), "u1", "platinum");
        assert!(router().evaluate(&request).await.is_admitted());
    }

    #[tokio::test]
    async fn test_unknown_required_tier_denied() {
        let request = as_member(from([1, 1, 1, 1], "/news/x"), "u1", "organization")
            .with_required_tier("vip");
        let outcome = router().evaluate(&request).await;
        assert_eq!(
            outcome.evaluation().access.as_ref().unwrap().reason,
            Reason::UnknownTier
        );
        assert!(matches!(outcome, PolicyOutcome::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_store_failure_fails_open_for_browsing() {
        let store = Arc::new(FlakyStore::failing(1, StoreError::Unavailable("down".into())));
        let router = router_over(store);

        let outcome = router.evaluate(&from([1, 1, 1, 1], "/news")).await;
        assert!(outcome.is_admitted());
        assert_eq!(outcome.evaluation().rate_limit.reason, Reason::StoreFailOpen);
    }

    #[tokio::test]
    async fn test_store_failure_fails_closed_for_auth() {
        let store = Arc::new(FlakyStore::failing(1, StoreError::Unavailable("down".into())));
        let router = router_over(store);

        let outcome = router
            .evaluate(&from([1, 1, 1, 1], "/api/auth/login").with_credential("a@b.c"))
            .await;
        let PolicyOutcome::Unavailable(evaluation) = outcome else {
            panic!("expected unavailable, got {:?}", outcome);
        };
        assert_eq!(evaluation.rate_limit.reason, Reason::StoreFailClosed);
        assert_eq!(evaluation.rate_limit.reset_at, Some(t0() + chrono::Duration::seconds(1)));
    }

    #[tokio::test]
    async fn test_set_routes() {
        let router = router();
        let yaml = r#"
routing:
  default_scope: strict
  routes: []
scopes:
  strict:
    window_secs: 60
    max_requests: 1
    key: ip
"#;
        let routes = crate::ratelimit::RateLimitConfig::from_yaml(yaml)
            .unwrap()
            .build()
            .unwrap();
        router.set_routes(routes);

        let request = from([2, 2, 2, 2], "/api/articles");
        assert!(router.evaluate(&request).await.is_admitted());
        let outcome = router.evaluate(&request).await;
        assert!(matches!(outcome, PolicyOutcome::RateLimited(_)));
        assert_eq!(outcome.evaluation().scope, "strict");
    }

    #[tokio::test]
    async fn test_purge_expired_sweeps_all_scopes() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(t0()));
        let compiled = TollgateConfig::default().compile().unwrap();
        let limiter = RateLimitEngine::with_clock(store.clone(), clock.clone());
        let router =
            PolicyRouter::new(compiled.routes, limiter, AccessEngine::new(compiled.tier_mapping));

        router.evaluate(&from([1, 1, 1, 1], "/news")).await;
        router.evaluate(&from([1, 1, 1, 1], "/api/articles")).await;
        assert_eq!(store.len(), 2);

        // api windows are one minute, general windows fifteen
        clock.advance(chrono::Duration::minutes(2));
        assert_eq!(router.purge_expired().await, 1);

        clock.advance(chrono::Duration::minutes(15));
        assert_eq!(router.purge_expired().await, 1);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_from_config() {
        let compiled = TollgateConfig::default().compile().unwrap();
        let router = PolicyRouter::from_config(
            compiled,
            Arc::new(MemoryStore::new()),
            Duration::from_millis(50),
        );
        assert!(router.evaluate(&from([3, 3, 3, 3], "/healthz")).await.is_admitted());
    }
}
