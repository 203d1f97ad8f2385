use garde::Validate;
use serde::Deserialize;

use crate::error::{AppError, Result};

/// The request payload for user registration.
#[derive(Deserialize, Validate, Debug)]
pub struct RegisterRequest {
    #[garde(email, length(max = 255))]
    pub email: String,
    #[garde(length(min = 8, max = 128))]
    pub password: String,
}

/// The request payload for user login.
#[derive(Deserialize, Validate, Debug)]
pub struct LoginRequest {
    #[garde(length(min = 1, max = 255))]
    pub email: String,
    #[garde(length(min = 1, max = 128))]
    pub password: String,
}

/// The request payload for issuing an API key.
#[derive(Deserialize, Validate, Debug, Default)]
pub struct ApiKeyRequest {
    #[serde(default)]
    #[garde(length(max = 32), inner(length(min = 1, max = 64)))]
    pub permissions: Vec<String>,
}

/// Runs garde validation, mapping the report to `AppError::Validation`.
///
/// # Arguments
///
/// * `payload` - The payload to validate.
///
/// # Returns
///
/// A `Result<()>` indicating whether the payload is valid.
pub fn validate_payload<T: Validate<Context = ()>>(payload: &T) -> Result<()> {
    payload
        .validate()
        .map_err(|report| AppError::Validation(report.to_string().trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_rejects_bad_email_and_short_password() {
        let bad = RegisterRequest {
            email: "not-an-email".into(),
            password: "short".into(),
        };
        let err = validate_payload(&bad).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let good = RegisterRequest {
            email: "ada@example.com".into(),
            password: "correct horse battery".into(),
        };
        assert!(validate_payload(&good).is_ok());
    }

    #[test]
    fn empty_permission_names_are_rejected() {
        let request = ApiKeyRequest {
            permissions: vec!["read".into(), String::new()],
        };
        assert!(validate_payload(&request).is_err());
    }
}
