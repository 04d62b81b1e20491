//! The engine's decision type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Machine-readable reason attached to every verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Reason {
    AnonymousFreeOk,
    AnonymousDenied,
    TierSufficient,
    TierInsufficient,
    UnknownTier,
    Skipped,
    Ok,
    LimitExceeded,
    /// Counter store failed and the scope admits traffic anyway.
    StoreFailOpen,
    /// Counter store failed and the scope denies traffic.
    StoreFailClosed,
}

impl Reason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reason::AnonymousFreeOk => "ANONYMOUS_FREE_OK",
            Reason::AnonymousDenied => "ANONYMOUS_DENIED",
            Reason::TierSufficient => "TIER_SUFFICIENT",
            Reason::TierInsufficient => "TIER_INSUFFICIENT",
            Reason::UnknownTier => "UNKNOWN_TIER",
            Reason::Skipped => "SKIPPED",
            Reason::Ok => "OK",
            Reason::LimitExceeded => "LIMIT_EXCEEDED",
            Reason::StoreFailOpen => "STORE_FAIL_OPEN",
            Reason::StoreFailClosed => "STORE_FAIL_CLOSED",
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An allow/deny decision plus the quota state behind it.
///
/// Access verdicts carry no window, so `reset_at` is `None` and the quota
/// fields are zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    pub reset_at: Option<DateTime<Utc>>,
    pub reason: Reason,
}

impl Verdict {
    pub(crate) fn access(allowed: bool, reason: Reason) -> Self {
        Self {
            allowed,
            limit: 0,
            remaining: 0,
            reset_at: None,
            reason,
        }
    }

    pub(crate) fn quota(
        allowed: bool,
        limit: u64,
        remaining: u64,
        reset_at: Option<DateTime<Utc>>,
        reason: Reason,
    ) -> Self {
        Self {
            allowed,
            limit,
            remaining,
            reset_at,
            reason,
        }
    }

    /// Whole seconds until `reset_at`, rounded up. `None` when there is no window.
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> Option<u64> {
        let reset_at = self.reset_at?;
        let millis = (reset_at - now).num_milliseconds().max(0) as u64;
        Some(millis.div_ceil(1000))
    }
}
