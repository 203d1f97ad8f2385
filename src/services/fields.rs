use serde_json::Value;

use crate::crypto::aes::SecretCipher;
use crate::crypto::payload::is_encrypted;
use crate::error::{AppError, Result};

/// Encrypts and decrypts named fields of JSON records.
///
/// Encryption is not idempotent: running [`FieldCipher::encrypt_user_fields`]
/// over a record whose fields are already ciphertext wraps them a second time,
/// and one [`FieldCipher::decrypt_user_fields`] pass only removes the outer
/// layer. Each write path must encrypt exactly once.
#[derive(Clone)]
pub struct FieldCipher {
    cipher: SecretCipher,
}

impl FieldCipher {
    pub fn new(cipher: SecretCipher) -> Self {
        Self { cipher }
    }

    /// Returns a copy of `record` with the named fields encrypted.
    ///
    /// Strings are encrypted as-is; objects and arrays are serialized to JSON
    /// first. Missing fields and other value types are left untouched.
    pub fn encrypt_user_fields(&self, record: &Value, field_names: &[&str]) -> Result<Value> {
        let mut out = record.clone();
        let Some(fields) = out.as_object_mut() else {
            return Ok(out);
        };

        for name in field_names {
            let Some(value) = fields.get_mut(*name) else {
                continue;
            };

            let plaintext = match &*value {
                Value::String(s) => s.clone(),
                Value::Object(_) | Value::Array(_) => serde_json::to_string(&*value)
                    .map_err(|e| AppError::Serialization(format!("Field {} serialization failed: {}", name, e)))?,
                _ => continue,
            };

            *value = Value::String(self.cipher.encrypt(&plaintext)?);
        }

        Ok(out)
    }

    /// Returns a copy of `record` with the named fields decrypted.
    ///
    /// Only string values that look like ciphertext are touched. Decrypted
    /// text that parses as JSON is restored as a JSON value. A field that fails
    /// to decrypt is logged and left as it was; the remaining fields are still
    /// processed.
    pub fn decrypt_user_fields(&self, record: &Value, field_names: &[&str]) -> Value {
        let mut out = record.clone();
        let Some(fields) = out.as_object_mut() else {
            return out;
        };

        for name in field_names {
            let Some(value) = fields.get_mut(*name) else {
                continue;
            };
            let Value::String(text) = &*value else {
                continue;
            };
            if !is_encrypted(text) {
                continue;
            }

            match self.cipher.decrypt(text) {
                Ok(plaintext) => {
                    *value = serde_json::from_str(&plaintext).unwrap_or(Value::String(plaintext));
                }
                Err(e) => {
                    tracing::warn!(field = %name, error = %e, "Failed to decrypt field, leaving it as-is");
                }
            }
        }

        out
    }
}
