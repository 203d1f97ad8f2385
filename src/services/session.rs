use chrono::Duration;
use serde::{Serialize, de::DeserializeOwned};
use tower_cookies::Cookie;
use tower_cookies::cookie::SameSite;
use tower_cookies::cookie::time::Duration as CookieDuration;

use crate::clock::SharedClock;
use crate::crypto::aes::SecretCipher;
use crate::error::{AppError, Result};
use crate::models::session::SessionRecord;

/// The name of the session cookie.
pub const SESSION_COOKIE: &str = "sessionToken";

/// The outcome of presenting a session token for refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRefresh<T> {
    /// The payload carried by the presented token.
    pub data: T,
    /// A replacement token, issued once the presented one is past half its
    /// lifetime.
    pub renewed_token: Option<String>,
}

/// Issues and opens encrypted, expiring session tokens.
#[derive(Clone)]
pub struct SessionTokenManager {
    cipher: SecretCipher,
    max_age: Duration,
    clock: SharedClock,
    secure_cookies: bool,
}

impl SessionTokenManager {
    /// Creates a manager whose tokens live for `max_age`.
    pub fn new(cipher: SecretCipher, max_age: Duration, clock: SharedClock) -> Self {
        Self {
            cipher,
            max_age,
            clock,
            secure_cookies: false,
        }
    }

    /// Marks issued cookies `Secure`. Enable in production.
    pub fn with_secure_cookies(mut self, secure: bool) -> Self {
        self.secure_cookies = secure;
        self
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Stamps `payload` with its lifetime and encrypts it into a token.
    pub fn encrypt_session_data<T: Serialize>(&self, payload: &T) -> Result<String> {
        let now = self.clock.now();
        let record = SessionRecord {
            data: payload,
            created_at: now,
            expires_at: now + self.max_age,
        };

        let json = sonic_rs::to_string(&record)
            .map_err(|e| AppError::Serialization(format!("Session serialization failed: {}", e)))?;

        self.cipher.encrypt(&json)
    }

    /// Opens a token, returning the payload with its timestamps.
    ///
    /// Returns `None` for undecryptable, malformed and expired tokens alike.
    pub fn decrypt_session_record<T: DeserializeOwned>(&self, token: &str) -> Option<SessionRecord<T>> {
        let json = match self.cipher.decrypt(token) {
            Ok(json) => json,
            Err(_) => {
                tracing::debug!("Session token rejected");
                return None;
            }
        };

        let record: SessionRecord<T> = match sonic_rs::from_str(&json) {
            Ok(record) => record,
            Err(e) => {
                tracing::debug!(error = %e, "Session token rejected");
                return None;
            }
        };

        if !record.is_live_at(self.clock.now()) {
            tracing::debug!("Session token rejected");
            return None;
        }

        Some(record)
    }

    /// Opens a token, returning only the payload.
    pub fn decrypt_session_data<T: DeserializeOwned>(&self, token: &str) -> Option<T> {
        self.decrypt_session_record(token).map(|record| record.data)
    }

    /// Opens a token and, once it is past half of its lifetime, issues a new
    /// one carrying the same payload. The presented token is never modified.
    pub fn refresh_session<T>(&self, token: &str) -> Option<SessionRefresh<T>>
    where
        T: Serialize + DeserializeOwned,
    {
        let record: SessionRecord<T> = self.decrypt_session_record(token)?;

        let renewed_token = if record.age_at(self.clock.now()) > self.max_age / 2 {
            match self.encrypt_session_data(&record.data) {
                Ok(token) => {
                    tracing::debug!("Session token renewed");
                    Some(token)
                }
                Err(e) => {
                    // the old token is still valid, so keep serving it
                    tracing::warn!(error = %e, "Failed to renew session token");
                    None
                }
            }
        } else {
            None
        };

        Some(SessionRefresh {
            data: record.data,
            renewed_token,
        })
    }

    /// Builds the `sessionToken` cookie carrying `token`.
    pub fn session_cookie(&self, token: String) -> Cookie<'static> {
        let mut cookie = Cookie::new(SESSION_COOKIE, token);
        cookie.set_http_only(true);
        cookie.set_secure(self.secure_cookies);
        cookie.set_same_site(SameSite::Strict);
        cookie.set_max_age(CookieDuration::seconds(self.max_age.num_seconds()));
        cookie.set_path("/");
        cookie
    }

    /// Builds a cookie that clears the session on the client.
    pub fn clear_session_cookie(&self) -> Cookie<'static> {
        let mut cookie = self.session_cookie(String::new());
        cookie.set_max_age(CookieDuration::seconds(0));
        cookie
    }
}
