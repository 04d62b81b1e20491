//! Framework-neutral request views.

use serde::{de::Error as _, Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;

use crate::access::Identity;

/// Header carrying a caller's API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// An inbound request as seen by the policy layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InboundRequest {
    pub path: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub client_ip: Option<IpAddr>,
    /// Header names are stored lower-cased.
    #[serde(default, deserialize_with = "lowercase_headers")]
    pub headers: HashMap<String, String>,
    /// Login identifier (e.g. e-mail) submitted to an authentication endpoint.
    #[serde(default)]
    pub credential: Option<String>,
    /// Content tier token the requested item requires, if it is tiered content.
    #[serde(default)]
    pub required_tier: Option<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

/// Header names are case-insensitive, so two spellings of one name are ambiguous.
fn lowercase_headers<'de, D>(deserializer: D) -> Result<HashMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = HashMap::<String, String>::deserialize(deserializer)?;
    let mut headers = HashMap::with_capacity(raw.len());
    for (name, value) in raw {
        let name = name.to_ascii_lowercase();
        if headers.contains_key(&name) {
            return Err(D::Error::custom(format!("duplicate header '{}'", name)));
        }
        headers.insert(name, value);
    }
    Ok(headers)
}

impl InboundRequest {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            method: default_method(),
            ..Default::default()
        }
    }

    pub fn with_client_ip(mut self, ip: IpAddr) -> Self {
        self.client_ip = Some(ip);
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_credential(mut self, credential: impl Into<String>) -> Self {
        self.credential = Some(credential.into());
        self
    }

    pub fn with_required_tier(mut self, tier: impl Into<String>) -> Self {
        self.required_tier = Some(tier.into());
        self
    }

    /// Look up a header by name, ignoring case. Blank values count as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}

/// Everything a key generator, skip rule or limit table may look at.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub path: String,
    pub method: String,
    pub client_ip: Option<IpAddr>,
    pub api_key: Option<String>,
    pub credential: Option<String>,
    pub identity: Identity,
}

impl RequestContext {
    pub fn new(request: &InboundRequest, identity: Identity) -> Self {
        Self {
            path: request.path.clone(),
            method: request.method.clone(),
            client_ip: request.client_ip,
            api_key: request.header(API_KEY_HEADER).map(str::to_string),
            credential: request
                .credential
                .as_deref()
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string),
            identity,
        }
    }

    /// A bare context for an anonymous caller, handy when driving the limiter directly.
    pub fn anonymous(path: &str, client_ip: Option<IpAddr>) -> Self {
        Self {
            path: path.to_string(),
            method: default_method(),
            client_ip,
            api_key: None,
            credential: None,
            identity: Identity::anonymous(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_lookup_ignores_case() {
        let request = InboundRequest::new("/api/feed").with_header("X-Api-Key", "k1");
        assert_eq!(request.header("x-api-key"), Some("k1"));
        assert_eq!(request.header("X-API-KEY"), Some("k1"));
    }

    #[test]
    fn test_blank_values_are_absent() {
        let request = InboundRequest::new("/login")
            .with_header("x-api-key", "   ")
            .with_credential("  ");
        let ctx = RequestContext::new(&request, Identity::anonymous());
        assert_eq!(ctx.api_key, None);
        assert_eq!(ctx.credential, None);
    }

    #[test]
    fn test_deserialized_header_names_are_lowercased() {
        let request: InboundRequest = serde_json::from_str(
            r#"{"path": "/api/feed", "headers": {"X-Subject-Id": "reader-1"}}"#,
        )
        .unwrap();
        assert_eq!(request.headers.get("x-subject-id").map(String::as_str), Some("reader-1"));
        assert_eq!(request.header("X-SUBJECT-ID"), Some("reader-1"));
    }

    #[test]
    fn test_case_duplicate_headers_rejected() {
        let result = serde_json::from_str::<InboundRequest>(
            r#"{"path": "/api/feed", "headers": {"X-Subject-Id": "a", "x-subject-id": "b"}}"#,
        );
        let err = result.unwrap_err().to_string();
        assert!(err.contains("duplicate header 'x-subject-id'"), "{}", err);
    }

    #[test]
    fn test_deserialize_defaults() {
        let request: InboundRequest = serde_json::from_str(r#"{"path": "/news"}"#).unwrap();
        assert_eq!(request.method, "GET");
        assert!(request.client_ip.is_none());
        assert!(request.headers.is_empty());
    }
}
