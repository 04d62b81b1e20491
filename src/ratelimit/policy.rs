//! Limiter policies: window, budget, key strategy and bypass rules for one scope.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use super::keys::{KeyGenerator, KeyStrategy};
use crate::access::SubscriptionTier;
use crate::error::{Result, TollgateError};
use crate::request::RequestContext;

/// Longest window a policy may use.
pub const MAX_WINDOW: Duration = Duration::from_secs(366 * 24 * 60 * 60);

/// Paths that never count against any budget under [`SkipRule::HealthCheck`].
pub const HEALTH_CHECK_PATHS: &[&str] = &["/health", "/healthz", "/ready", "/livez"];

/// Request budget for one window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LimitSpec {
    /// Same budget for every caller.
    Fixed(u64),
    /// Budget chosen by caller class.
    PerTier {
        anonymous: u64,
        free: u64,
        individual: u64,
        organization: u64,
    },
}

impl LimitSpec {
    /// The budget that applies to this request.
    pub fn resolve(&self, request: &RequestContext) -> u64 {
        match *self {
            LimitSpec::Fixed(limit) => limit,
            LimitSpec::PerTier {
                anonymous,
                free,
                individual,
                organization,
            } => {
                let identity = &request.identity;
                if !identity.is_authenticated {
                    return anonymous;
                }
                match identity.tier {
                    SubscriptionTier::Free => free,
                    SubscriptionTier::Individual => individual,
                    SubscriptionTier::Organization => organization,
                }
            }
        }
    }

    fn validate(&self, scope: &str) -> Result<()> {
        let budgets: Vec<(&str, u64)> = match self {
            LimitSpec::Fixed(limit) => vec![("max_requests", *limit)],
            LimitSpec::PerTier {
                anonymous,
                free,
                individual,
                organization,
            } => vec![
                ("anonymous", *anonymous),
                ("free", *free),
                ("individual", *individual),
                ("organization", *organization),
            ],
        };
        if let Some((name, _)) = budgets.iter().find(|(_, limit)| *limit == 0) {
            return Err(TollgateError::PolicyMisconfigured(format!(
                "scope '{}': {} must be a positive request count",
                scope, name
            )));
        }
        Ok(())
    }
}

/// Conditions under which a request bypasses the limiter entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipRule {
    /// Liveness and readiness probes.
    HealthCheck,
    /// Authenticated organization accounts.
    OrganizationTier,
}

impl SkipRule {
    pub fn matches(&self, request: &RequestContext) -> bool {
        match self {
            SkipRule::HealthCheck => HEALTH_CHECK_PATHS
                .iter()
                .any(|p| request.path == *p || request.path.starts_with(&format!("{}/", p))),
            SkipRule::OrganizationTier => {
                request.identity.is_authenticated
                    && request.identity.tier == SubscriptionTier::Organization
            }
        }
    }
}

/// What to do when the counter store cannot answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Admit the request and log.
    FailOpen,
    /// Deny the request and log.
    FailClosed,
}

/// A validated rate limit policy for one scope.
#[derive(Debug, Clone)]
pub struct LimiterPolicy {
    scope: String,
    window: Duration,
    max_requests: LimitSpec,
    key_generator: Arc<dyn KeyGenerator>,
    skip: Vec<SkipRule>,
    on_store_failure: FailurePolicy,
}

impl LimiterPolicy {
    /// Build a policy, rejecting empty scopes, zero or oversized windows and
    /// zero budgets.
    pub fn new(
        scope: impl Into<String>,
        window: Duration,
        max_requests: LimitSpec,
        key_generator: Arc<dyn KeyGenerator>,
    ) -> Result<Self> {
        let scope = scope.into();
        if scope.trim().is_empty() {
            return Err(TollgateError::PolicyMisconfigured(
                "scope name must not be empty".to_string(),
            ));
        }
        if window.is_zero() {
            return Err(TollgateError::PolicyMisconfigured(format!(
                "scope '{}': window must be longer than zero",
                scope
            )));
        }
        if window > MAX_WINDOW {
            return Err(TollgateError::PolicyMisconfigured(format!(
                "scope '{}': window of {}s exceeds the {}s maximum",
                scope,
                window.as_secs(),
                MAX_WINDOW.as_secs()
            )));
        }
        max_requests.validate(&scope)?;

        Ok(Self {
            scope,
            window,
            max_requests,
            key_generator,
            skip: Vec::new(),
            on_store_failure: FailurePolicy::FailOpen,
        })
    }

    /// Shorthand for a policy using one of the built-in key strategies.
    pub fn with_strategy(
        scope: impl Into<String>,
        window: Duration,
        max_requests: LimitSpec,
        strategy: KeyStrategy,
    ) -> Result<Self> {
        Self::new(scope, window, max_requests, Arc::new(strategy))
    }

    pub fn skip_when(mut self, rule: SkipRule) -> Self {
        if !self.skip.contains(&rule) {
            self.skip.push(rule);
        }
        self
    }

    pub fn on_store_failure(mut self, policy: FailurePolicy) -> Self {
        self.on_store_failure = policy;
        self
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn max_requests(&self) -> LimitSpec {
        self.max_requests
    }

    pub fn store_failure_policy(&self) -> FailurePolicy {
        self.on_store_failure
    }

    pub fn limit_for(&self, request: &RequestContext) -> u64 {
        self.max_requests.resolve(request)
    }

    pub fn key_for(&self, request: &RequestContext) -> String {
        self.key_generator.generate(request)
    }

    pub fn should_skip(&self, request: &RequestContext) -> bool {
        self.skip.iter().any(|rule| rule.matches(request))
    }
}
