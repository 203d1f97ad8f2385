use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};
use tower_cookies::Cookies;

use crate::{
    error::AppError,
    models::session::Session,
    services::session::SESSION_COOKIE,
    state::AppState,
};

/// A middleware that requires a valid session token to be present.
///
/// Tokens past half their lifetime are reissued and the cookie is replaced
/// on the way out.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `cookies` - The request cookies.
/// * `request` - The incoming request.
/// * `next` - The next middleware in the chain.
///
/// # Returns
///
/// A `Response` or an `AppError::Unauthorized`.
pub async fn require_session(
    State(state): State<AppState>,
    cookies: Cookies,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let token = cookies
        .get(SESSION_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .ok_or_else(|| {
            tracing::debug!("No session cookie found");
            AppError::Unauthorized
        })?;

    let refresh = state
        .sessions
        .refresh_session::<Session>(&token)
        .ok_or_else(|| {
            tracing::warn!("Rejected invalid or expired session token");
            AppError::Unauthorized
        })?;

    if let Some(renewed) = refresh.renewed_token {
        tracing::debug!(user_id = %refresh.data.user_id, "Session cookie renewed");
        cookies.add(state.sessions.session_cookie(renewed));
    }

    tracing::debug!(user_id = %refresh.data.user_id, "User authenticated");
    request.extensions_mut().insert(refresh.data);

    Ok(next.run(request).await)
}
