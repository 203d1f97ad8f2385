use crate::clock::SharedClock;
use crate::crypto::aes::SecretCipher;
use crate::crypto::digest::{generate_hmac, verify_hmac};
use crate::crypto::token::generate_secure_token;
use crate::error::{AppError, Result};
use crate::models::api_key::ApiKeyData;
use zeroize::Zeroizing;

/// Every API key starts with this prefix.
pub const API_KEY_PREFIX: &str = "ak_";
/// Default replay window for signed requests, in milliseconds.
pub const DEFAULT_SIGNATURE_MAX_AGE_MS: i64 = 300_000;

const KEY_ID_BYTES: usize = 16;
const SIGNING_KEY_LABEL: &str = "rampart:api-key-signing";

/// Builds the canonical `METHOD:URL:BODY:TIMESTAMP` string that gets signed.
pub fn canonical_request(method: &str, url: &str, body: &str, timestamp: i64) -> String {
    format!("{}:{}:{}:{}", method, url, body, timestamp)
}

/// Signs a request with HMAC-SHA256, returning lowercase hex.
pub fn generate_request_signature(
    method: &str,
    url: &str,
    body: &str,
    timestamp: i64,
    secret: &str,
) -> String {
    let canonical = canonical_request(method, url, body, timestamp);
    generate_hmac(canonical.as_bytes(), secret.as_bytes())
}

/// A freshly issued key and the secret its requests are signed with.
///
/// The key travels in `X-API-Key` on every request; the signing secret never
/// leaves the client after issuance.
#[derive(Debug, Clone)]
pub struct IssuedApiKey {
    pub api_key: String,
    pub signing_secret: String,
}

/// Issues API keys and verifies signed requests.
#[derive(Clone)]
pub struct ApiKeyManager {
    cipher: SecretCipher,
    signing_key: Zeroizing<String>,
    clock: SharedClock,
    signature_max_age_ms: i64,
}

impl ApiKeyManager {
    pub fn new(cipher: SecretCipher, clock: SharedClock) -> Self {
        let signing_key = cipher.subkey(SIGNING_KEY_LABEL);
        Self {
            cipher,
            signing_key,
            clock,
            signature_max_age_ms: DEFAULT_SIGNATURE_MAX_AGE_MS,
        }
    }

    /// Overrides the replay window used by [`ApiKeyManager::verify_request`].
    pub fn with_signature_max_age_ms(mut self, max_age_ms: i64) -> Self {
        self.signature_max_age_ms = max_age_ms;
        self
    }

    pub fn signature_max_age_ms(&self) -> i64 {
        self.signature_max_age_ms
    }

    /// Issues a new key for `user_id`.
    ///
    /// # Returns
    ///
    /// The `ak_` key, an encrypted payload of the key's claims, together with
    /// its signing secret.
    pub fn generate_api_key(&self, user_id: &str, permissions: &[String]) -> Result<IssuedApiKey> {
        let data = ApiKeyData {
            user_id: user_id.to_string(),
            permissions: permissions.to_vec(),
            created_at: self.clock.now(),
            key_id: generate_secure_token(KEY_ID_BYTES),
        };

        let json = sonic_rs::to_string(&data)
            .map_err(|e| AppError::Serialization(format!("API key serialization failed: {}", e)))?;

        let sealed = self.cipher.encrypt(&json)?;
        tracing::info!(user_id = %data.user_id, key_id = %data.key_id, "API key issued");
        Ok(IssuedApiKey {
            api_key: format!("{}{}", API_KEY_PREFIX, sealed),
            signing_secret: self.signing_secret(&data),
        })
    }

    /// The secret that requests made with `key` must be signed with.
    ///
    /// Re-derived from the key id on every check, so nothing is stored.
    pub fn signing_secret(&self, key: &ApiKeyData) -> String {
        generate_hmac(key.key_id.as_bytes(), self.signing_key.as_bytes())
    }

    /// Opens an API key. Any malformed, foreign or tampered key yields `None`.
    pub fn validate_api_key(&self, key: &str) -> Option<ApiKeyData> {
        let sealed = key.strip_prefix(API_KEY_PREFIX)?;

        let json = self.cipher.decrypt(sealed).ok()?;
        match sonic_rs::from_str::<ApiKeyData>(&json) {
            Ok(data) => Some(data),
            Err(e) => {
                tracing::debug!(error = %e, "API key payload rejected");
                None
            }
        }
    }

    /// Verifies a request signature against the replay window `max_age_ms`.
    ///
    /// Stale timestamps and wrong signatures both return `false`.
    #[allow(clippy::too_many_arguments)]
    pub fn verify_request_signature(
        &self,
        method: &str,
        url: &str,
        body: &str,
        timestamp: i64,
        signature: &str,
        secret: &str,
        max_age_ms: i64,
    ) -> bool {
        let skew = self.clock.now_ms().saturating_sub(timestamp).saturating_abs();
        if skew > max_age_ms {
            tracing::debug!(skew_ms = skew, "Signed request outside replay window");
            return false;
        }

        let canonical = canonical_request(method, url, body, timestamp);
        verify_hmac(canonical.as_bytes(), signature, secret.as_bytes())
    }

    /// Checks a request made with `key` against its signing secret and the
    /// configured replay window, mapped to [`AppError::InvalidSignature`].
    pub fn verify_request(
        &self,
        method: &str,
        url: &str,
        body: &str,
        timestamp: i64,
        signature: &str,
        key: &ApiKeyData,
    ) -> Result<()> {
        let secret = Zeroizing::new(self.signing_secret(key));
        if self.verify_request_signature(
            method,
            url,
            body,
            timestamp,
            signature,
            &secret,
            self.signature_max_age_ms,
        ) {
            Ok(())
        } else {
            Err(AppError::InvalidSignature)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::crypto::payload::is_encrypted;
    use chrono::{Duration, TimeZone, Utc};
    use std::sync::Arc;

    const T: i64 = 1_700_000_000_000;

    fn manager(clock: &ManualClock) -> ApiKeyManager {
        ApiKeyManager::new(
            SecretCipher::with_iterations("api-key-test-secret", 1_000),
            Arc::new(clock.clone()),
        )
    }

    fn clock_at(ms: i64) -> ManualClock {
        ManualClock::new(Utc.timestamp_millis_opt(ms).unwrap())
    }

    #[test]
    fn issued_key_validates_back_to_its_claims() {
        let clock = clock_at(T);
        let keys = manager(&clock);
        let perms = vec!["messages:read".to_string(), "messages:write".to_string()];

        let key = keys.generate_api_key("u1", &perms).unwrap().api_key;
        assert!(key.starts_with("ak_"));
        assert!(is_encrypted(&key[3..]));

        let data = keys.validate_api_key(&key).unwrap();
        assert_eq!(data.user_id, "u1");
        assert_eq!(data.permissions, perms);
        assert_eq!(data.created_at.timestamp_millis(), T);
        assert_eq!(data.key_id.len(), 32);
    }

    #[test]
    fn keys_for_same_user_differ() {
        let clock = clock_at(T);
        let keys = manager(&clock);
        let a = keys.generate_api_key("u1", &[]).unwrap();
        let b = keys.generate_api_key("u1", &[]).unwrap();
        assert_ne!(a.signing_secret, b.signing_secret);

        let a = keys.validate_api_key(&a.api_key).unwrap();
        let b = keys.validate_api_key(&b.api_key).unwrap();
        assert_ne!(a.key_id, b.key_id);
    }

    #[test]
    fn signing_secret_is_not_the_key() {
        let clock = clock_at(T);
        let keys = manager(&clock);
        let issued = keys.generate_api_key("u1", &[]).unwrap();
        let data = keys.validate_api_key(&issued.api_key).unwrap();

        assert_ne!(issued.signing_secret, issued.api_key);
        assert_eq!(keys.signing_secret(&data), issued.signing_secret);

        // a manager under another server secret derives something else
        let other = ApiKeyManager::new(
            SecretCipher::with_iterations("another-server-secret", 1_000),
            Arc::new(clock.clone()),
        );
        assert_ne!(other.signing_secret(&data), issued.signing_secret);
    }

    #[test]
    fn requests_signed_with_the_key_itself_are_rejected() {
        let clock = clock_at(T);
        let keys = manager(&clock);
        let issued = keys.generate_api_key("u1", &[]).unwrap();
        let data = keys.validate_api_key(&issued.api_key).unwrap();

        let forged = generate_request_signature("POST", "/api/msg", "{}", T, &issued.api_key);
        assert!(keys.verify_request("POST", "/api/msg", "{}", T, &forged, &data).is_err());

        let genuine = generate_request_signature("POST", "/api/msg", "{}", T, &issued.signing_secret);
        assert!(keys.verify_request("POST", "/api/msg", "{}", T, &genuine, &data).is_ok());
    }

    #[test]
    fn invalid_keys_are_rejected_without_error() {
        let clock = clock_at(T);
        let keys = manager(&clock);
        let key = keys.generate_api_key("u1", &[]).unwrap().api_key;

        assert!(keys.validate_api_key(&key[3..]).is_none());
        assert!(keys.validate_api_key(&format!("sk_{}", &key[3..])).is_none());
        assert!(keys.validate_api_key("ak_").is_none());
        assert!(keys.validate_api_key("ak_not:a:real:key").is_none());

        let mut tampered = key.clone();
        let last = tampered.pop().unwrap();
        tampered.push(if last == '0' { '1' } else { '0' });
        assert!(keys.validate_api_key(&tampered).is_none());
    }

    #[test]
    fn signature_is_hmac_of_canonical_string() {
        let sig = generate_request_signature("POST", "/api/msg", "{}", T, "K");
        let expected = generate_hmac(format!("POST:/api/msg:{{}}:{}", T).as_bytes(), b"K");
        assert_eq!(sig, expected);
    }

    #[test]
    fn fresh_signature_verifies() {
        let clock = clock_at(T + 1_000);
        let keys = manager(&clock);
        let sig = generate_request_signature("POST", "/api/msg", "{}", T, "K");

        assert!(keys.verify_request_signature("POST", "/api/msg", "{}", T, &sig, "K", 300_000));
        assert!(!keys.verify_request_signature("POST", "/api/msg", "{\"a\":1}", T, &sig, "K", 300_000));
        assert!(!keys.verify_request_signature("GET", "/api/msg", "{}", T, &sig, "K", 300_000));
        assert!(!keys.verify_request_signature("POST", "/api/msg", "{}", T, &sig, "K2", 300_000));
    }

    #[test]
    fn replayed_signature_is_rejected_even_if_correct() {
        let clock = clock_at(T + 300_001);
        let keys = manager(&clock);
        let sig = generate_request_signature("POST", "/api/msg", "{}", T, "K");

        assert!(!keys.verify_request_signature("POST", "/api/msg", "{}", T, &sig, "K", 300_000));

        clock.advance(Duration::milliseconds(-1));
        assert!(keys.verify_request_signature("POST", "/api/msg", "{}", T, &sig, "K", 300_000));
    }

    #[test]
    fn future_timestamps_are_bounded_too() {
        let clock = clock_at(T - 300_001);
        let keys = manager(&clock);
        let sig = generate_request_signature("POST", "/api/msg", "{}", T, "K");
        assert!(!keys.verify_request_signature("POST", "/api/msg", "{}", T, &sig, "K", 300_000));
    }

    #[test]
    fn expired_and_mismatched_requests_fail_identically() {
        let clock = clock_at(T + 400_000);
        let keys = manager(&clock);
        let issued = keys.generate_api_key("u1", &[]).unwrap();
        let data = keys.validate_api_key(&issued.api_key).unwrap();
        let good = generate_request_signature("POST", "/api/msg", "{}", T, &issued.signing_secret);
        let fresh_ts = T + 400_000;

        let expired = keys.verify_request("POST", "/api/msg", "{}", T, &good, &data).unwrap_err();
        let mismatch = keys
            .verify_request("POST", "/api/msg", "{}", fresh_ts, "deadbeef", &data)
            .unwrap_err();
        assert_eq!(expired.to_string(), mismatch.to_string());
        assert_eq!(expired.code(), mismatch.code());
    }
}
