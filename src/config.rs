//! Configuration management for Tollgate.
//!
//! Configuration is static: it is loaded and validated once at startup, and
//! any invalid tier name or unenforceable policy is fatal there rather than
//! at request time.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::access::TierMapping;
use crate::error::{Result, TollgateError};
use crate::ratelimit::{RateLimitConfig, RouteTable};

/// Prefix for environment overrides, e.g. `TOLLGATE__SERVER__LISTEN_ADDR`.
pub const ENV_PREFIX: &str = "TOLLGATE";

/// Main configuration for the Tollgate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TollgateConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Counter store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Tier vocabulary configuration
    #[serde(default)]
    pub tiers: TierConfig,

    /// Rate limiting scopes and routes
    #[serde(default)]
    pub rate_limits: RateLimitConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Per-request timeout in milliseconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            request_timeout_ms: default_request_timeout(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_request_timeout() -> u64 {
    1000
}

/// Counter store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Upper bound on a single store call in milliseconds
    #[serde(default = "default_store_timeout")]
    pub timeout_ms: u64,

    /// Pause before retrying a transient failure in milliseconds
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,

    /// How often expired counters are swept, in seconds
    #[serde(default = "default_purge_interval")]
    pub purge_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_store_timeout(),
            retry_backoff_ms: default_retry_backoff(),
            purge_interval_secs: default_purge_interval(),
        }
    }
}

fn default_store_timeout() -> u64 {
    50
}

fn default_retry_backoff() -> u64 {
    5
}

fn default_purge_interval() -> u64 {
    60
}

impl StoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs)
    }
}

/// Tier vocabulary configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierConfig {
    /// Subscription tier name -> highest content tier name it unlocks
    #[serde(default = "default_tier_mapping")]
    pub mapping: HashMap<String, String>,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            mapping: default_tier_mapping(),
        }
    }
}

fn default_tier_mapping() -> HashMap<String, String> {
    HashMap::from([
        ("free".to_string(), "free".to_string()),
        ("individual".to_string(), "premium".to_string()),
        ("organization".to_string(), "organization".to_string()),
    ])
}

impl TierConfig {
    pub fn build(&self) -> Result<TierMapping> {
        TierMapping::from_tokens(
            self.mapping
                .iter()
                .map(|(subscription, content)| (subscription.as_str(), content.as_str())),
        )
    }
}

/// Everything the engine needs at runtime, validated.
#[derive(Debug, Clone)]
pub struct CompiledConfig {
    pub tier_mapping: TierMapping,
    pub routes: RouteTable,
}

impl TollgateConfig {
    /// Load configuration from a YAML file, layered with `TOLLGATE__*`
    /// environment overrides.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        if !path.exists() {
            return Err(TollgateError::Config(format!(
                "configuration file {} does not exist",
                path.display()
            )));
        }

        let settings = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Yaml))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| TollgateError::Config(format!("Failed to parse configuration: {}", e)))
    }

    /// Validate the whole configuration and compile it for the runtime.
    pub fn compile(&self) -> Result<CompiledConfig> {
        if self.store.timeout_ms == 0 {
            return Err(TollgateError::Config(
                "store.timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.store.retry_backoff_ms >= self.store.timeout_ms {
            return Err(TollgateError::Config(format!(
                "store.retry_backoff_ms ({}) must be shorter than store.timeout_ms ({})",
                self.store.retry_backoff_ms, self.store.timeout_ms
            )));
        }

        let tier_mapping = self.tiers.build()?;
        let routes = self.rate_limits.build()?;

        info!(
            scopes = routes.policies().count(),
            default_scope = routes.default_scope(),
            "Configuration validated"
        );

        Ok(CompiledConfig {
            tier_mapping,
            routes,
        })
    }
}
