use axum::{
    extract::DefaultBodyLimit,
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use tower_cookies::CookieManagerLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnFailure, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::{handlers, middleware_layer, state::AppState};

/// Builds the application router.
///
/// Every route passes through the request limiter; session and signed routes
/// add their own authentication layer on top.
pub fn build_router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/api/auth/register", post(handlers::auth::register))
        .route("/api/auth/login", post(handlers::auth::login))
        .with_state(state.clone());

    let session_routes = Router::new()
        .route("/api/auth/logout", post(handlers::auth::logout))
        .route("/api/auth/me", get(handlers::auth::me))
        .route("/api/keys", post(handlers::auth::issue_api_key))
        .route("/api/fields/encrypt", post(handlers::fields::encrypt_fields))
        .route("/api/fields/decrypt", post(handlers::fields::decrypt_fields))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware_layer::auth::require_session,
        ))
        .with_state(state.clone());

    let signed_routes = Router::new()
        .route("/api/signed/echo", post(handlers::auth::signed_echo))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware_layer::signature::verify_signed_request,
        ))
        .with_state(state.clone());

    Router::new()
        .merge(public_routes)
        .merge(session_routes)
        .merge(signed_routes)
        .layer(from_fn_with_state(
            state.clone(),
            middleware_layer::rate_limit::rate_limit_requests,
        ))
        .layer(CookieManagerLayer::new())
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(false))
                .on_request(DefaultOnRequest::default().level(Level::DEBUG))
                .on_response(DefaultOnResponse::default().level(Level::DEBUG))
                .on_failure(DefaultOnFailure::default().level(Level::ERROR)),
        )
}
