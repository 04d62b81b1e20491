//! Rate limit rules configuration and matching.
//!
//! Scopes are declared as data (window, budget, key strategy name, skip rules)
//! and compiled once into [`LimiterPolicy`] values. Requests are matched to a
//! scope by path prefix; the first matching route wins and unmatched paths
//! fall through to the default scope.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::keys::KeyStrategy;
use super::policy::{FailurePolicy, LimitSpec, LimiterPolicy, SkipRule};
use crate::error::{Result, TollgateError};

/// Rate limit section of the configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default = "default_scopes")]
    pub scopes: HashMap<String, ScopeConfig>,
}

/// How request paths map onto scopes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Scope for paths no route matches
    #[serde(default = "default_scope_name")]
    pub default_scope: String,
    /// Routes, tried in order
    #[serde(default = "default_routes")]
    pub routes: Vec<RouteRule>,
}

/// A path prefix bound to a scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRule {
    pub prefix: String,
    pub scope: String,
}

/// Configuration for one scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeConfig {
    /// Window length in seconds
    pub window_secs: u64,
    /// Fixed budget or a per-tier table
    pub max_requests: LimitSpec,
    /// Name of the key strategy
    pub key: KeyStrategy,
    /// Conditions that bypass the limiter
    #[serde(default)]
    pub skip: Vec<SkipRule>,
    /// Fallback when the counter store is unavailable
    #[serde(default = "default_failure_policy")]
    pub on_store_failure: FailurePolicy,
}

fn default_scope_name() -> String {
    "general".to_string()
}

fn default_failure_policy() -> FailurePolicy {
    FailurePolicy::FailOpen
}

fn default_routes() -> Vec<RouteRule> {
    [
        ("/api/auth", "auth"),
        ("/login", "auth"),
        ("/register", "auth"),
        ("/api", "api"),
    ]
    .into_iter()
    .map(|(prefix, scope)| RouteRule {
        prefix: prefix.to_string(),
        scope: scope.to_string(),
    })
    .collect()
}

fn default_scopes() -> HashMap<String, ScopeConfig> {
    HashMap::from([
        (
            "general".to_string(),
            ScopeConfig {
                window_secs: 15 * 60,
                max_requests: LimitSpec::Fixed(100),
                key: KeyStrategy::Ip,
                skip: vec![SkipRule::HealthCheck],
                on_store_failure: FailurePolicy::FailOpen,
            },
        ),
        (
            "auth".to_string(),
            ScopeConfig {
                window_secs: 15 * 60,
                max_requests: LimitSpec::Fixed(5),
                key: KeyStrategy::IpCredential,
                skip: Vec::new(),
                on_store_failure: FailurePolicy::FailClosed,
            },
        ),
        (
            "api".to_string(),
            ScopeConfig {
                window_secs: 60,
                max_requests: LimitSpec::PerTier {
                    anonymous: 20,
                    free: 60,
                    individual: 300,
                    organization: 1000,
                },
                key: KeyStrategy::ApiKeySubjectIp,
                skip: vec![SkipRule::OrganizationTier, SkipRule::HealthCheck],
                on_store_failure: FailurePolicy::FailOpen,
            },
        ),
    ])
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            default_scope: default_scope_name(),
            routes: default_routes(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            routing: RoutingConfig::default(),
            scopes: default_scopes(),
        }
    }
}

impl ScopeConfig {
    /// Compile into a validated policy named `scope`.
    pub fn build(&self, scope: &str) -> Result<LimiterPolicy> {
        let policy = LimiterPolicy::with_strategy(
            scope,
            Duration::from_secs(self.window_secs),
            self.max_requests,
            self.key,
        )?;
        let policy = self
            .skip
            .iter()
            .fold(policy, |policy, rule| policy.skip_when(*rule));
        Ok(policy.on_store_failure(self.on_store_failure))
    }
}

impl RateLimitConfig {
    /// Load the rate limit section from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load the rate limit section from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| TollgateError::Config(format!("Failed to parse rate limit config: {}", e)))
    }

    /// Validate every scope and route and compile them into a route table.
    pub fn build(&self) -> Result<RouteTable> {
        let mut policies = HashMap::with_capacity(self.scopes.len());
        for (name, scope) in &self.scopes {
            let name = name.trim().to_ascii_lowercase();
            let policy = scope.build(&name)?;
            if policies.insert(name.clone(), Arc::new(policy)).is_some() {
                return Err(TollgateError::PolicyMisconfigured(format!(
                    "scope '{}' is declared more than once",
                    name
                )));
            }
        }

        let lookup = |scope: &str, context: &str| -> Result<String> {
            let scope = scope.trim().to_ascii_lowercase();
            if policies.contains_key(&scope) {
                Ok(scope)
            } else {
                Err(TollgateError::PolicyMisconfigured(format!(
                    "{} refers to undeclared scope '{}'",
                    context, scope
                )))
            }
        };

        let default_scope = lookup(&self.routing.default_scope, "default_scope")?;
        let mut routes = Vec::with_capacity(self.routing.routes.len());
        for route in &self.routing.routes {
            if !route.prefix.starts_with('/') {
                return Err(TollgateError::PolicyMisconfigured(format!(
                    "route prefix '{}' must start with '/'",
                    route.prefix
                )));
            }
            let scope = lookup(&route.scope, &format!("route '{}'", route.prefix))?;
            routes.push((route.prefix.clone(), scope));
        }

        Ok(RouteTable {
            policies,
            routes,
            default_scope,
        })
    }
}

/// Compiled policies plus the prefix routes that select them.
#[derive(Debug, Clone)]
pub struct RouteTable {
    policies: HashMap<String, Arc<LimiterPolicy>>,
    routes: Vec<(String, String)>,
    default_scope: String,
}

impl RouteTable {
    /// The policy for a request path.
    pub fn select(&self, path: &str) -> &Arc<LimiterPolicy> {
        let scope = self
            .routes
            .iter()
            .find(|(prefix, _)| prefix_matches(prefix, path))
            .map(|(_, scope)| scope)
            .unwrap_or(&self.default_scope);

        // build() only admits routes to declared scopes
        &self.policies[scope]
    }

    pub fn policy(&self, scope: &str) -> Option<&Arc<LimiterPolicy>> {
        self.policies.get(scope)
    }

    pub fn policies(&self) -> impl Iterator<Item = &Arc<LimiterPolicy>> {
        self.policies.values()
    }

    pub fn default_scope(&self) -> &str {
        &self.default_scope
    }
}

/// Segment-aware prefix match: `/api` covers `/api` and `/api/x`, not `/apix`.
fn prefix_matches(prefix: &str, path: &str) -> bool {
    if prefix == "/" {
        return true;
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/') || prefix.ends_with('/'),
        None => false,
    }
}
