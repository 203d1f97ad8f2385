use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;

use crate::{
    error::AppError,
    guard::limiter::RateLimitDecision,
    state::AppState,
};

const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// The client IP as seen by [`rate_limit_requests`], for handlers that key
/// their own counters by address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIp(pub String);

/// Extracts the real IP address from the request extensions.
///
/// # Arguments
///
/// * `req` - The incoming request.
///
/// # Returns
///
/// The IP address as a string, or "unknown" if not found.
pub fn extract_real_ip(req: &Request<Body>) -> String {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn set_rate_limit_headers(response: &mut Response, decision: &RateLimitDecision) {
    let headers = response.headers_mut();
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(decision.reset_after_secs));
}

/// A middleware that runs every request through the guard's block, burst and
/// rate-limit checks for the client IP.
///
/// Counter store outages are logged and let the request through.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `req` - The incoming request.
/// * `next` - The next middleware in the chain.
///
/// # Returns
///
/// A `Response` carrying `X-RateLimit-*` headers, or the guard's error.
pub async fn rate_limit_requests(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let ip = extract_real_ip(&req);
    req.extensions_mut().insert(ClientIp(ip.clone()));

    match state.guard.check_request(&ip).await {
        Ok(decision) => {
            let mut response = next.run(req).await;
            set_rate_limit_headers(&mut response, &decision);
            response
        }
        Err(e @ (AppError::Redis(_) | AppError::Store(_))) => {
            tracing::error!(ip = %ip, error = %e, "Limiter unavailable, allowing request");
            next.run(req).await
        }
        Err(e) => e.into_response(),
    }
}
