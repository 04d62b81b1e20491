//! Tollgate - Request Policy Engine
//!
//! This crate decides, per inbound request, whether it may proceed. Each
//! request is counted against the rate limit scope its path routes to, and
//! tiered content is checked against the caller's subscription tier. The
//! engine can be embedded as axum middleware or run as a standalone HTTP
//! decision service.

pub mod access;
pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
pub mod request;
pub mod router;
pub mod verdict;

pub use error::{Result, TollgateError};
pub use router::{Evaluation, PolicyOutcome, PolicyRouter};
pub use verdict::{Reason, Verdict};
