//! HTTP surface: embeddable middleware and the standalone decision service.

mod middleware;
mod response;
mod server;
mod service;

pub use middleware::{enforce, inbound_from, RequiredTier, CREDENTIAL_HEADER};
pub use response::{
    apply_outcome_headers, apply_rate_limit_headers, status_for, X_RATELIMIT_LIMIT,
    X_RATELIMIT_REMAINING, X_RATELIMIT_RESET,
};
pub use server::HttpServer;
pub use service::{build_app, decide, health};
