//! Tier model, caller identity and content access decisions.

mod decision;
mod identity;
mod tier;

pub use decision::AccessEngine;
pub use identity::{HeaderIdentityResolver, Identity, IdentityResolver, SUBJECT_HEADER, TIER_HEADER};
pub use tier::{ContentTier, SubscriptionTier, Tier, TierMapping};
