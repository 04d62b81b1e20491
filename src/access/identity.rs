//! Caller identity and the resolver port that produces it.

use serde::{Deserialize, Serialize};

use super::tier::SubscriptionTier;
use crate::error::Result;
use crate::request::InboundRequest;

/// Who is calling, as far as this engine is concerned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub subject_id: Option<String>,
    pub tier: SubscriptionTier,
    pub is_authenticated: bool,
}

impl Identity {
    /// An unauthenticated caller at the lowest tier.
    pub fn anonymous() -> Self {
        Self {
            subject_id: None,
            tier: SubscriptionTier::Free,
            is_authenticated: false,
        }
    }

    pub fn authenticated(subject_id: impl Into<String>, tier: SubscriptionTier) -> Self {
        Self {
            subject_id: Some(subject_id.into()),
            tier,
            is_authenticated: true,
        }
    }
}

/// Port to the authentication subsystem.
///
/// Implementations consume identities that were already verified upstream;
/// they never check signatures themselves. `Ok(None)` means anonymous. An
/// unrecognised tier claim is an `InvalidTier` error, never a default.
pub trait IdentityResolver: Send + Sync {
    fn resolve(&self, request: &InboundRequest) -> Result<Option<Identity>>;
}

/// Default header carrying the verified subject id.
pub const SUBJECT_HEADER: &str = "x-subject-id";
/// Default header carrying the verified subscription tier.
pub const TIER_HEADER: &str = "x-subscription-tier";

/// Reads identity claims that an upstream gateway placed in request headers.
#[derive(Debug, Clone)]
pub struct HeaderIdentityResolver {
    subject_header: String,
    tier_header: String,
}

impl HeaderIdentityResolver {
    pub fn new(subject_header: impl Into<String>, tier_header: impl Into<String>) -> Self {
        Self {
            subject_header: subject_header.into(),
            tier_header: tier_header.into(),
        }
    }
}

impl Default for HeaderIdentityResolver {
    fn default() -> Self {
        Self::new(SUBJECT_HEADER, TIER_HEADER)
    }
}

impl IdentityResolver for HeaderIdentityResolver {
    fn resolve(&self, request: &InboundRequest) -> Result<Option<Identity>> {
        let Some(subject) = request.header(&self.subject_header) else {
            return Ok(None);
        };

        // A signed-in account without a tier claim is on the free plan.
        let tier = match request.header(&self.tier_header) {
            Some(token) => token.parse()?,
            None => SubscriptionTier::Free,
        };

        Ok(Some(Identity::authenticated(subject, tier)))
    }
}
