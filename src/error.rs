use axum::{
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// The crate's error type.
///
/// Cryptographic and signature failures deliberately collapse every cause into
/// a single variant so callers cannot tell a wrong key from a tampered payload.
#[derive(Error, Debug)]
pub enum AppError {
    /// A malformed encrypted payload. Only produced while parsing; `decrypt`
    /// reports it as [`AppError::Decryption`].
    #[error("Invalid payload format: {0}")]
    Format(String),

    /// Any decryption failure.
    #[error("Decryption failed")]
    Decryption,

    /// An encryption failure.
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// A signed request failed verification (expired or mismatched).
    #[error("Invalid request signature")]
    InvalidSignature,

    /// A rate limit was exceeded; the caller may retry later.
    #[error("Rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimitExceeded { retry_after_secs: u64 },

    /// The account is locked after repeated authentication failures.
    #[error("Account temporarily locked")]
    AccountLocked { retry_after_secs: u64 },

    /// The client IP is blocked.
    #[error("IP address temporarily blocked")]
    IpBlocked { retry_after_secs: u64 },

    /// An authentication error.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// An authorization error.
    #[error("Authorization failed")]
    Unauthorized,

    /// The caller is authenticated but lacks a permission.
    #[error("Missing permission: {0}")]
    Forbidden(String),

    /// A validation error.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A Redis error.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// A counter store error that did not come from Redis.
    #[error("Counter store error: {0}")]
    Store(String),

    /// An internal server error.
    #[error("Internal server error: {0}")]
    Internal(String),
}

/// A `Result` type that uses `AppError` as the error type.
pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// The machine-readable code placed in the response envelope.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Format(_) | AppError::Decryption => "DECRYPTION_FAILED",
            AppError::InvalidSignature => "INVALID_SIGNATURE",
            AppError::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            AppError::AccountLocked { .. } => "ACCOUNT_LOCKED",
            AppError::IpBlocked { .. } => "IP_BLOCKED",
            AppError::Authentication(_) | AppError::Unauthorized => "UNAUTHORIZED",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Encryption(_)
            | AppError::Serialization(_)
            | AppError::Redis(_)
            | AppError::Store(_)
            | AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Seconds the client should wait before retrying, when that is meaningful.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            AppError::RateLimitExceeded { retry_after_secs }
            | AppError::AccountLocked { retry_after_secs }
            | AppError::IpBlocked { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Format(ref msg) => {
                tracing::debug!("Payload format error: {}", msg);
                (StatusCode::BAD_REQUEST, "Decryption failed".to_string())
            }

            AppError::Decryption => {
                tracing::debug!("Decryption failed");
                (StatusCode::BAD_REQUEST, "Decryption failed".to_string())
            }

            AppError::Encryption(ref msg) => {
                tracing::error!("Encryption error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Encryption error".to_string())
            }

            AppError::InvalidSignature => {
                tracing::warn!("Rejected signed request");
                (StatusCode::UNAUTHORIZED, "Invalid request signature".to_string())
            }

            AppError::RateLimitExceeded { retry_after_secs } => {
                tracing::warn!(retry_after_secs, "Rate limit exceeded");
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    format!("Too many requests. Try again in {} seconds", retry_after_secs),
                )
            }

            AppError::AccountLocked { retry_after_secs } => {
                tracing::warn!(retry_after_secs, "Account locked");
                (
                    StatusCode::LOCKED,
                    format!(
                        "Too many failed login attempts. Try again in {} minutes",
                        retry_after_secs.div_ceil(60)
                    ),
                )
            }

            AppError::IpBlocked { retry_after_secs } => {
                tracing::warn!(retry_after_secs, "IP blocked");
                (
                    StatusCode::FORBIDDEN,
                    format!("Access temporarily blocked. Try again in {} seconds", retry_after_secs),
                )
            }

            AppError::Authentication(ref msg) => {
                tracing::warn!("Authentication failed: {}", msg);
                (StatusCode::UNAUTHORIZED, msg.clone())
            }

            AppError::Unauthorized => {
                tracing::warn!("Authorization failed");
                (StatusCode::UNAUTHORIZED, "Unauthorized".to_string())
            }

            AppError::Forbidden(ref permission) => {
                tracing::warn!(permission = %permission, "Permission denied");
                (
                    StatusCode::FORBIDDEN,
                    format!("Missing permission: {}", permission),
                )
            }

            AppError::Validation(ref msg) => {
                tracing::debug!("Validation error: {}", msg);
                (StatusCode::BAD_REQUEST, msg.clone())
            }

            AppError::Serialization(ref msg) => {
                tracing::error!("Serialization error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }

            AppError::Redis(ref e) => {
                tracing::error!("Redis error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Cache error".to_string())
            }

            AppError::Store(ref msg) => {
                tracing::error!("Counter store error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Cache error".to_string())
            }

            AppError::Internal(ref msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = sonic_rs::to_string(&sonic_rs::json!({
            "success": false,
            "error": {
                "code": self.code(),
                "message": message,
            }
        }))
        .unwrap_or_else(|_| {
            r#"{"success":false,"error":{"code":"INTERNAL_ERROR","message":"Internal server error"}}"#
                .to_string()
        });

        let mut response = (
            status,
            [(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))],
            body,
        )
            .into_response();

        if let Some(secs) = self.retry_after_secs() {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }

        response
    }
}
