//! Mapping policy outcomes onto HTTP responses.
//!
//! Rate limit denials become `429` with `Retry-After`, tier denials `403`,
//! and fail-closed store outages `503` with `Retry-After`. Quota headers are
//! copied verbatim from the rate limit verdict.

use axum::{
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::router::PolicyOutcome;
use crate::verdict::Verdict;

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Status code for an outcome.
pub fn status_for(outcome: &PolicyOutcome) -> StatusCode {
    match outcome {
        PolicyOutcome::Admitted(_) => StatusCode::OK,
        PolicyOutcome::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
        PolicyOutcome::Forbidden(_) => StatusCode::FORBIDDEN,
        PolicyOutcome::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Echo a rate limit verdict as `X-RateLimit-*` headers.
pub fn apply_rate_limit_headers(headers: &mut HeaderMap, verdict: &Verdict) {
    if verdict.limit > 0 {
        headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(verdict.limit));
        headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(verdict.remaining));
    }
    if let Some(reset_at) = verdict.reset_at {
        headers.insert(X_RATELIMIT_RESET, HeaderValue::from(reset_at.timestamp()));
    }
}

/// All headers an outcome should carry.
pub fn apply_outcome_headers(headers: &mut HeaderMap, outcome: &PolicyOutcome) {
    let evaluation = outcome.evaluation();
    apply_rate_limit_headers(headers, &evaluation.rate_limit);

    if matches!(
        outcome,
        PolicyOutcome::RateLimited(_) | PolicyOutcome::Unavailable(_)
    ) {
        if let Some(secs) = evaluation.rate_limit.retry_after_secs(evaluation.evaluated_at) {
            headers.insert(header::RETRY_AFTER, HeaderValue::from(secs.max(1)));
        }
    }
}

fn message(outcome: &PolicyOutcome) -> &'static str {
    match outcome {
        PolicyOutcome::Admitted(_) => "Admitted",
        PolicyOutcome::RateLimited(_) => "Too many requests",
        PolicyOutcome::Forbidden(_) => "Subscription tier does not include this content",
        PolicyOutcome::Unavailable(_) => "Rate limiting temporarily unavailable",
    }
}

/// Error body for outcomes that stop a request at the middleware.
impl IntoResponse for PolicyOutcome {
    fn into_response(self) -> Response {
        let evaluation = self.evaluation();
        let reason = match (&evaluation.access, evaluation.rate_limit.allowed) {
            (Some(access), true) => access.reason,
            _ => evaluation.rate_limit.reason,
        };
        let body = json!({
            "error": message(&self),
            "reason": reason,
            "decision_id": evaluation.decision_id,
        });

        let mut response = (status_for(&self), Json(body)).into_response();
        apply_outcome_headers(response.headers_mut(), &self);
        response
    }
}
