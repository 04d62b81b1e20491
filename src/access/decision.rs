//! Content access decisions.

use tracing::trace;

use super::identity::Identity;
use super::tier::{ContentTier, Tier, TierMapping};
use crate::error::Result;
use crate::verdict::{Reason, Verdict};

/// Decides whether an identity may view content of a given tier.
///
/// Pure: holds only the static mapping table and needs no synchronization.
#[derive(Debug, Clone, Default)]
pub struct AccessEngine {
    mapping: TierMapping,
}

impl AccessEngine {
    pub fn new(mapping: TierMapping) -> Self {
        Self { mapping }
    }

    pub fn mapping(&self) -> &TierMapping {
        &self.mapping
    }

    /// Decide whether `identity` may view content requiring `required`.
    pub fn decide(&self, required: ContentTier, identity: &Identity) -> Verdict {
        let verdict = if !identity.is_authenticated {
            if required == ContentTier::Free {
                Verdict::access(true, Reason::AnonymousFreeOk)
            } else {
                Verdict::access(false, Reason::AnonymousDenied)
            }
        } else {
            match self.mapping.max_content_tier(identity.tier) {
                Some(unlocked) if unlocked.satisfies(&required) => {
                    Verdict::access(true, Reason::TierSufficient)
                }
                Some(_) => Verdict::access(false, Reason::TierInsufficient),
                None => Verdict::access(false, Reason::UnknownTier),
            }
        };

        trace!(
            required = %required,
            tier = %identity.tier,
            authenticated = identity.is_authenticated,
            reason = %verdict.reason,
            "Access decided"
        );

        verdict
    }

    /// Like [`decide`](Self::decide), for a required tier still in token form.
    pub fn decide_token(&self, required: &str, identity: &Identity) -> Result<Verdict> {
        let required: ContentTier = required.parse()?;
        Ok(self.decide(required, identity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::tier::SubscriptionTier;
    use crate::error::TollgateError;
    use std::collections::HashMap;

    fn member(tier: SubscriptionTier) -> Identity {
        Identity::authenticated("subject", tier)
    }

    #[test]
    fn test_anonymous_free_content() {
        let engine = AccessEngine::default();
        let verdict = engine.decide(ContentTier::Free, &Identity::anonymous());
        assert!(verdict.allowed);
        assert_eq!(verdict.reason, Reason::AnonymousFreeOk);
    }

    #[test]
    fn test_anonymous_premium_content() {
        let engine = AccessEngine::default();
        let verdict = engine.decide(ContentTier::Premium, &Identity::anonymous());
        assert!(!verdict.allowed);
        assert_eq!(verdict.reason, Reason::AnonymousDenied);
    }

    #[test]
    fn test_organization_reads_premium() {
        let engine = AccessEngine::default();
        let verdict = engine.decide(ContentTier::Premium, &member(SubscriptionTier::Organization));
        assert!(verdict.allowed);
        assert_eq!(verdict.reason, Reason::TierSufficient);

        let verdict = engine.decide(ContentTier::Exclusive, &member(SubscriptionTier::Organization));
        assert!(verdict.allowed);
    }

    #[test]
    fn test_individual_limits() {
        let engine = AccessEngine::default();
        let individual = member(SubscriptionTier::Individual);

        assert!(engine.decide(ContentTier::Premium, &individual).allowed);

        for required in [ContentTier::Exclusive, ContentTier::Organization] {
            let verdict = engine.decide(required, &individual);
            assert!(!verdict.allowed);
            assert_eq!(verdict.reason, Reason::TierInsufficient);
        }
    }

    #[test]
    fn test_free_member_only_free() {
        let engine = AccessEngine::default();
        let free = member(SubscriptionTier::Free);

        assert!(engine.decide(ContentTier::Free, &free).allowed);
        assert_eq!(engine.decide(ContentTier::Free, &free).reason, Reason::TierSufficient);
        assert!(!engine.decide(ContentTier::Premium, &free).allowed);
    }

    #[test]
    fn test_anonymous_ignores_claimed_tier() {
        let engine = AccessEngine::default();
        let spoofed = Identity {
            subject_id: None,
            tier: SubscriptionTier::Organization,
            is_authenticated: false,
        };
        let verdict = engine.decide(ContentTier::Premium, &spoofed);
        assert_eq!(verdict.reason, Reason::AnonymousDenied);
    }

    #[test]
    fn test_unmapped_tier_fails_closed() {
        let mapping = TierMapping {
            entries: HashMap::from([(SubscriptionTier::Free, ContentTier::Free)]),
        };
        let engine = AccessEngine::new(mapping);

        let verdict = engine.decide(ContentTier::Free, &member(SubscriptionTier::Organization));
        assert!(!verdict.allowed);
        assert_eq!(verdict.reason, Reason::UnknownTier);
    }

    #[test]
    fn test_unknown_required_token_is_error() {
        let engine = AccessEngine::default();
        let result = engine.decide_token("diamond", &member(SubscriptionTier::Organization));
        assert!(matches!(result, Err(TollgateError::InvalidTier(_))));
    }

    #[test]
    fn test_decide_token() {
        let engine = AccessEngine::default();
        let verdict = engine
            .decide_token("premium", &member(SubscriptionTier::Individual))
            .unwrap();
        assert!(verdict.allowed);
    }
}
