//! Standalone decision service.
//!
//! Proxies and gateways that cannot embed [`enforce`](super::enforce) ask for
//! a decision over HTTP instead. The response status mirrors what the
//! protected request should receive.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{debug, info, instrument, warn};

use super::response::{apply_outcome_headers, status_for};
use crate::request::InboundRequest;
use crate::router::PolicyRouter;

/// Decide whether the described request may proceed.
#[instrument(
    skip(router, request),
    fields(path = %request.path, method = %request.method)
)]
pub async fn decide(
    State(router): State<Arc<PolicyRouter>>,
    Json(request): Json<InboundRequest>,
) -> Response {
    debug!(
        client_ip = ?request.client_ip,
        required_tier = ?request.required_tier,
        "Processing decision request"
    );

    if request.path.is_empty() || !request.path.starts_with('/') {
        warn!("Received decision request without an absolute path");
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "path must be an absolute request path" })),
        )
            .into_response();
    }

    let outcome = router.evaluate(&request).await;

    info!(
        scope = %outcome.evaluation().scope,
        decision_id = %outcome.evaluation().decision_id,
        admitted = outcome.is_admitted(),
        "Decision made"
    );

    let mut headers = HeaderMap::new();
    apply_outcome_headers(&mut headers, &outcome);
    (status_for(&outcome), headers, Json(&outcome)).into_response()
}

pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

/// Build the decision service application.
pub fn build_app(router: Arc<PolicyRouter>, request_timeout: Duration) -> Router {
    Router::new()
        .route("/v1/decide", post(decide))
        .route("/health", get(health))
        .with_state(router)
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            request_timeout,
        ))
        .layer(TraceLayer::new_for_http())
}
