//! Rate limit key generation.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug};

use crate::request::RequestContext;

/// A counter key qualified by the scope it belongs to.
///
/// The same caller key in two scopes addresses two independent counters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopedKey {
    pub scope: String,
    pub key: String,
}

impl ScopedKey {
    pub fn new(scope: &str, key: &str) -> Self {
        Self {
            scope: scope.to_string(),
            key: key.to_string(),
        }
    }
}

impl fmt::Display for ScopedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scope, self.key)
    }
}

/// Turns a request into the key its quota is counted under.
pub trait KeyGenerator: Send + Sync + Debug {
    fn generate(&self, request: &RequestContext) -> String;
}

/// The built-in key strategies, selectable by name from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStrategy {
    /// Caller IP only.
    Ip,
    /// Caller IP combined with the submitted login identifier, so one address
    /// cannot burn another account's attempts and one account cannot be
    /// locked out from everywhere.
    IpCredential,
    /// API key if present, else subject id, else caller IP.
    ApiKeySubjectIp,
}

impl KeyStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyStrategy::Ip => "ip",
            KeyStrategy::IpCredential => "ip_credential",
            KeyStrategy::ApiKeySubjectIp => "api_key_subject_ip",
        }
    }
}

fn ip_key(request: &RequestContext) -> String {
    match request.client_ip {
        Some(ip) => format!("ip:{}", ip),
        None => "ip:unknown".to_string(),
    }
}

impl KeyGenerator for KeyStrategy {
    fn generate(&self, request: &RequestContext) -> String {
        match self {
            KeyStrategy::Ip => ip_key(request),
            KeyStrategy::IpCredential => match &request.credential {
                Some(credential) => {
                    format!("{}|cred:{}", ip_key(request), credential.to_lowercase())
                }
                None => ip_key(request),
            },
            KeyStrategy::ApiKeySubjectIp => {
                if let Some(api_key) = &request.api_key {
                    format!("key:{}", api_key)
                } else if let Some(subject) = &request.identity.subject_id {
                    format!("sub:{}", subject)
                } else {
                    ip_key(request)
                }
            }
        }
    }
}
