use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::Serialize;
use std::sync::Arc;
use tower_cookies::Cookies;

use crate::{
    crypto::password::PasswordHasher,
    error::{AppError, Result},
    middleware_layer::rate_limit::ClientIp,
    models::{api_key::ApiKeyData, session::Session},
    state::AppState,
    validation::auth::{validate_payload, ApiKeyRequest, LoginRequest, RegisterRequest},
};

/// The response payload for authentication-related requests.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse<T: Serialize> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> AuthResponse<T> {
    fn ok(message: &str, data: Option<T>) -> Json<Self> {
        Json(Self {
            success: true,
            message: message.to_string(),
            data,
        })
    }
}

/// The permission a key needs to call the signed echo route.
pub const ECHO_PERMISSION: &str = "read";

/// The response payload for a newly issued API key.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyResponse {
    pub api_key: String,
    /// Shown once; signs every request made with `api_key`.
    pub signing_secret: String,
    pub permissions: Vec<String>,
}

/// The response payload for a verified signed request.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedEchoResponse {
    pub user_id: String,
    pub key_id: String,
    pub permissions: Vec<String>,
    pub body: String,
}

async fn hash_password(hasher: Arc<dyn PasswordHasher>, password: String) -> Result<String> {
    tokio::task::spawn_blocking(move || hasher.hash(&password))
        .await
        .map_err(|e| AppError::Internal(format!("Hashing task failed: {}", e)))?
}

async fn verify_password(
    hasher: Arc<dyn PasswordHasher>,
    password: String,
    hash: String,
) -> Result<bool> {
    tokio::task::spawn_blocking(move || hasher.verify(&password, &hash))
        .await
        .map_err(|e| AppError::Internal(format!("Verification task failed: {}", e)))?
}

fn start_session(state: &AppState, cookies: &Cookies, session: &Session) -> Result<()> {
    let token = state.sessions.encrypt_session_data(session)?;
    cookies.add(state.sessions.session_cookie(token));
    Ok(())
}

/// Handles user registration.
#[axum::debug_handler]
pub async fn register(
    State(state): State<AppState>,
    cookies: Cookies,
    Json(payload): Json<RegisterRequest>,
) -> Result<Response> {
    validate_payload(&payload)?;

    let password_hash = hash_password(state.hasher.clone(), payload.password).await?;
    let user = state.users.create_user(&payload.email, password_hash).await?;

    tracing::info!(user_id = %user.id, "User registered");

    let session = Session {
        user_id: user.id.to_string(),
        email: user.email,
    };
    start_session(&state, &cookies, &session)?;

    Ok((
        StatusCode::CREATED,
        AuthResponse::ok("Registration successful. Welcome!", Some(session)),
    )
        .into_response())
}

/// Handles user login.
///
/// An attempt is reserved against both the IP and the account before any
/// credential work, so concurrent guesses cannot outrun the lockout.
#[axum::debug_handler]
pub async fn login(
    State(state): State<AppState>,
    Extension(ClientIp(ip)): Extension<ClientIp>,
    cookies: Cookies,
    Json(payload): Json<LoginRequest>,
) -> Result<Response> {
    validate_payload(&payload)?;
    let account = payload.email.trim().to_lowercase();

    let attempt = state.guard.begin_login(&ip, &account).await?;

    let user = state.users.find_by_email(&account).await;
    let verified = match &user {
        Some(user) => {
            verify_password(
                state.hasher.clone(),
                payload.password,
                user.password_hash.clone(),
            )
            .await?
        }
        None => false,
    };

    let user = match user {
        Some(user) if verified => user,
        _ => {
            let failure = state.guard.record_login_failure(&ip, &account, attempt).await?;
            if let Some(err) = failure.lockout_error() {
                tracing::warn!(ip = %ip, account = %account, "Login locked out");
                return Err(err);
            }
            return Err(AppError::Authentication(
                "Invalid email or password".to_string(),
            ));
        }
    };

    state.guard.record_login_success(&ip, &account).await?;

    let session = Session {
        user_id: user.id.to_string(),
        email: user.email,
    };
    start_session(&state, &cookies, &session)?;

    tracing::info!(user_id = %session.user_id, "User logged in");

    Ok((StatusCode::OK, AuthResponse::ok("Login successful", Some(session))).into_response())
}

/// Handles user logout.
#[axum::debug_handler]
pub async fn logout(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    cookies: Cookies,
) -> Result<Response> {
    cookies.add(state.sessions.clear_session_cookie());

    tracing::info!(user_id = %session.user_id, "User logged out");

    Ok((StatusCode::OK, AuthResponse::<()>::ok("Logout successful", None)).into_response())
}

/// Returns the identity carried by the current session.
pub async fn me(Extension(session): Extension<Session>) -> Json<AuthResponse<Session>> {
    AuthResponse::ok("Authenticated", Some(session))
}

/// Issues an API key for the current user.
#[axum::debug_handler]
pub async fn issue_api_key(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(payload): Json<ApiKeyRequest>,
) -> Result<Response> {
    validate_payload(&payload)?;

    let issued = state
        .api_keys
        .generate_api_key(&session.user_id, &payload.permissions)?;

    let data = ApiKeyResponse {
        api_key: issued.api_key,
        signing_secret: issued.signing_secret,
        permissions: payload.permissions,
    };
    Ok((StatusCode::CREATED, AuthResponse::ok("API key created", Some(data))).into_response())
}

/// Echoes a verified signed request back with the key's identity.
///
/// The key must grant [`ECHO_PERMISSION`].
pub async fn signed_echo(
    Extension(key): Extension<ApiKeyData>,
    body: String,
) -> Result<Json<AuthResponse<SignedEchoResponse>>> {
    if !key.has_permission(ECHO_PERMISSION) {
        tracing::warn!(key_id = %key.key_id, permission = ECHO_PERMISSION, "API key lacks permission");
        return Err(AppError::Forbidden(ECHO_PERMISSION.to_string()));
    }

    Ok(AuthResponse::ok(
        "Signature verified",
        Some(SignedEchoResponse {
            user_id: key.user_id,
            key_id: key.key_id,
            permissions: key.permissions,
            body,
        }),
    ))
}
