//! Subscription and content-access tiers.
//!
//! The two vocabularies are separate types. A subscription tier is only ever
//! compared against a content tier through a [`TierMapping`], which names the
//! highest content tier each subscription unlocks.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, TollgateError};

/// A totally ordered tier vocabulary.
pub trait Tier: Copy + Eq {
    /// Position of this tier in its vocabulary; higher subsumes lower.
    fn rank(&self) -> u8;

    /// Whether holding `self` is enough for something that requires `required`.
    fn satisfies(&self, required: &Self) -> bool {
        self.rank() >= required.rank()
    }
}

/// What a caller pays for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionTier {
    Free,
    Individual,
    Organization,
}

impl SubscriptionTier {
    /// Every subscription tier, lowest first.
    pub const ALL: [SubscriptionTier; 3] = [
        SubscriptionTier::Free,
        SubscriptionTier::Individual,
        SubscriptionTier::Organization,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionTier::Free => "free",
            SubscriptionTier::Individual => "individual",
            SubscriptionTier::Organization => "organization",
        }
    }
}

impl Tier for SubscriptionTier {
    fn rank(&self) -> u8 {
        match self {
            SubscriptionTier::Free => 0,
            SubscriptionTier::Individual => 1,
            SubscriptionTier::Organization => 2,
        }
    }
}

/// What a piece of content requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentTier {
    Free,
    Premium,
    Exclusive,
    Organization,
}

impl ContentTier {
    /// Every content tier, lowest first.
    pub const ALL: [ContentTier; 4] = [
        ContentTier::Free,
        ContentTier::Premium,
        ContentTier::Exclusive,
        ContentTier::Organization,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentTier::Free => "free",
            ContentTier::Premium => "premium",
            ContentTier::Exclusive => "exclusive",
            ContentTier::Organization => "organization",
        }
    }
}

impl Tier for ContentTier {
    fn rank(&self) -> u8 {
        match self {
            ContentTier::Free => 0,
            ContentTier::Premium => 1,
            ContentTier::Exclusive => 2,
            ContentTier::Organization => 3,
        }
    }
}

impl FromStr for SubscriptionTier {
    type Err = TollgateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(SubscriptionTier::Free),
            "individual" => Ok(SubscriptionTier::Individual),
            "organization" => Ok(SubscriptionTier::Organization),
            _ => Err(TollgateError::InvalidTier(format!(
                "unknown subscription tier '{}'",
                s
            ))),
        }
    }
}

impl FromStr for ContentTier {
    type Err = TollgateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(ContentTier::Free),
            "premium" => Ok(ContentTier::Premium),
            "exclusive" => Ok(ContentTier::Exclusive),
            "organization" => Ok(ContentTier::Organization),
            _ => Err(TollgateError::InvalidTier(format!(
                "unknown content tier '{}'",
                s
            ))),
        }
    }
}

impl fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for ContentTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Translation from subscription tier to the highest content tier it unlocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierMapping {
    pub(crate) entries: HashMap<SubscriptionTier, ContentTier>,
}

impl TierMapping {
    /// Build a mapping, rejecting it unless every subscription tier is covered.
    pub fn new(entries: HashMap<SubscriptionTier, ContentTier>) -> Result<Self> {
        if let Some(missing) = SubscriptionTier::ALL
            .iter()
            .find(|tier| !entries.contains_key(tier))
        {
            return Err(TollgateError::InvalidTier(format!(
                "tier mapping has no entry for subscription tier '{}'",
                missing
            )));
        }
        Ok(Self { entries })
    }

    /// Build a mapping from raw configuration tokens.
    pub fn from_tokens<'a, I>(tokens: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut entries = HashMap::new();
        for (subscription, content) in tokens {
            let subscription: SubscriptionTier = subscription.parse()?;
            let content: ContentTier = content.parse()?;
            if entries.insert(subscription, content).is_some() {
                return Err(TollgateError::InvalidTier(format!(
                    "tier mapping lists '{}' more than once",
                    subscription
                )));
            }
        }
        Self::new(entries)
    }

    /// The highest content tier a subscription unlocks.
    pub fn max_content_tier(&self, tier: SubscriptionTier) -> Option<ContentTier> {
        self.entries.get(&tier).copied()
    }
}

impl Default for TierMapping {
    fn default() -> Self {
        Self {
            entries: HashMap::from([
                (SubscriptionTier::Free, ContentTier::Free),
                (SubscriptionTier::Individual, ContentTier::Premium),
                (SubscriptionTier::Organization, ContentTier::Organization),
            ]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscription_order_is_total() {
        for a in SubscriptionTier::ALL {
            assert!(a.satisfies(&a));
            for b in SubscriptionTier::ALL {
                assert!(a.satisfies(&b) || b.satisfies(&a));
                if a.satisfies(&b) && b.satisfies(&a) {
                    assert_eq!(a, b);
                }
                for c in SubscriptionTier::ALL {
                    if a.satisfies(&b) && b.satisfies(&c) {
                        assert!(a.satisfies(&c));
                    }
                }
            }
        }
    }

    #[test]
    fn test_content_ranks_are_distinct() {
        let mut ranks: Vec<u8> = ContentTier::ALL.iter().map(Tier::rank).collect();
        ranks.dedup();
        assert_eq!(ranks.len(), ContentTier::ALL.len());
    }

    #[test]
    fn test_parse_tokens() {
        assert_eq!(" Premium ".parse::<ContentTier>().unwrap(), ContentTier::Premium);
        assert_eq!(
            "ORGANIZATION".parse::<SubscriptionTier>().unwrap(),
            SubscriptionTier::Organization
        );
    }

    #[test]
    fn test_unknown_token_is_invalid_tier() {
        let err = "platinum".parse::<SubscriptionTier>().unwrap_err();
        assert!(matches!(err, TollgateError::InvalidTier(_)));

        // a subscription name is not a content tier
        let err = "individual".parse::<ContentTier>().unwrap_err();
        assert!(matches!(err, TollgateError::InvalidTier(_)));
    }

    #[test]
    fn test_default_mapping() {
        let mapping = TierMapping::default();
        assert_eq!(
            mapping.max_content_tier(SubscriptionTier::Free),
            Some(ContentTier::Free)
        );
        assert_eq!(
            mapping.max_content_tier(SubscriptionTier::Individual),
            Some(ContentTier::Premium)
        );
        assert_eq!(
            mapping.max_content_tier(SubscriptionTier::Organization),
            Some(ContentTier::Organization)
        );
    }

    #[test]
    fn test_mapping_must_be_total() {
        let result = TierMapping::from_tokens([("free", "free"), ("individual", "premium")]);
        assert!(matches!(result, Err(TollgateError::InvalidTier(_))));
    }

    #[test]
    fn test_mapping_rejects_unknown_names() {
        let result = TierMapping::from_tokens([
            ("free", "free"),
            ("individual", "gold"),
            ("organization", "organization"),
        ]);
        assert!(matches!(result, Err(TollgateError::InvalidTier(_))));
    }

    #[test]
    fn test_mapping_rejects_duplicates() {
        let result = TierMapping::from_tokens([
            ("free", "free"),
            ("FREE", "premium"),
            ("individual", "premium"),
            ("organization", "organization"),
        ]);
        assert!(result.is_err());
    }
}
