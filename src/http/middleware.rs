//! Policy enforcement middleware for applications embedding the engine.
//!
//! ```ignore
//! let app = Router::new()
//!     .route("/news/{id}", get(article))
//!     .layer(axum::middleware::from_fn_with_state(policy_router, enforce));
//! ```
//!
//! Tiered content is marked with a [`RequiredTier`] request extension by a
//! layer that runs before this one (added after it, so it wraps it).

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::warn;

use super::response::apply_rate_limit_headers;
use crate::access::ContentTier;
use crate::request::InboundRequest;
use crate::router::{PolicyOutcome, PolicyRouter};

/// Header carrying the login identifier on authentication endpoints.
pub const CREDENTIAL_HEADER: &str = "x-auth-credential";

/// Request extension naming the content tier the target requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequiredTier(pub ContentTier);

/// Build the framework-neutral view of an axum request.
pub fn inbound_from(request: &Request) -> InboundRequest {
    let headers: HashMap<String, String> = request
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();

    let client_ip: Option<IpAddr> = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    InboundRequest {
        path: request.uri().path().to_string(),
        method: request.method().as_str().to_string(),
        client_ip,
        credential: headers.get(CREDENTIAL_HEADER).cloned(),
        required_tier: request
            .extensions()
            .get::<RequiredTier>()
            .map(|RequiredTier(tier)| tier.as_str().to_string()),
        headers,
    }
}

/// Run the policy router before the wrapped handler.
pub async fn enforce(
    State(router): State<Arc<PolicyRouter>>,
    request: Request,
    next: Next,
) -> Response {
    let inbound = inbound_from(&request);
    let outcome = router.evaluate(&inbound).await;

    match outcome {
        PolicyOutcome::Admitted(evaluation) => {
            let mut response = next.run(request).await;
            apply_rate_limit_headers(response.headers_mut(), &evaluation.rate_limit);
            response
        }
        denied => {
            warn!(
                path = %inbound.path,
                scope = %denied.evaluation().scope,
                decision_id = %denied.evaluation().decision_id,
                "Request denied by policy"
            );
            denied.into_response()
        }
    }
}
