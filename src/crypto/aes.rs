use aes_gcm::{
    AesGcm, Nonce,
    aead::{Aead, KeyInit, consts::U16},
    aes::Aes256,
};
use rand::RngCore;
use rand::rngs::OsRng;
use zeroize::Zeroizing;

use crate::crypto::digest::generate_hmac;
use crate::crypto::kdf::{self, DEFAULT_ITERATIONS};
use crate::crypto::payload::{EncryptedPayload, IV_SIZE, SALT_SIZE, TAG_SIZE};
use crate::error::{AppError, Result};

/// AES-256-GCM with a 16-byte nonce.
type Aes256Gcm16 = AesGcm<Aes256, U16>;

/// Passphrase-based authenticated encryption.
///
/// Each call derives a fresh key from the configured secret and a random salt,
/// so the cipher holds no key material beyond the secret itself.
#[derive(Clone)]
pub struct SecretCipher {
    secret: Zeroizing<Vec<u8>>,
    iterations: u32,
}

impl SecretCipher {
    /// Creates a cipher using the default PBKDF2 iteration count.
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self::with_iterations(secret, DEFAULT_ITERATIONS)
    }

    /// Creates a cipher with an explicit PBKDF2 iteration count.
    pub fn with_iterations(secret: impl AsRef<[u8]>, iterations: u32) -> Self {
        Self {
            secret: Zeroizing::new(secret.as_ref().to_vec()),
            iterations,
        }
    }

    /// Derives an independent hex key for `label` from the secret.
    ///
    /// Subkeys for distinct labels are unrelated, and none reveals the secret.
    pub fn subkey(&self, label: &str) -> Zeroizing<String> {
        Zeroizing::new(generate_hmac(label.as_bytes(), &self.secret))
    }

    /// Encrypts `plaintext`, returning the `salt:iv:tag:ciphertext` string.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        encrypt_with(plaintext.as_bytes(), &self.secret, self.iterations)
            .map(|payload| payload.to_string())
    }

    /// Decrypts a payload produced by [`SecretCipher::encrypt`].
    ///
    /// Every failure is reported as [`AppError::Decryption`].
    pub fn decrypt(&self, payload: &str) -> Result<String> {
        let parsed: EncryptedPayload = payload.parse().map_err(|e| {
            tracing::debug!(error = %e, "Rejecting malformed payload");
            AppError::Decryption
        })?;

        let plaintext = decrypt_with(&parsed, &self.secret, self.iterations)?;

        String::from_utf8(plaintext).map_err(|_| {
            tracing::debug!("Decrypted payload is not UTF-8");
            AppError::Decryption
        })
    }
}

impl std::fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretCipher")
            .field("iterations", &self.iterations)
            .finish_non_exhaustive()
    }
}

/// Encrypts `plaintext` under a key derived from `secret`.
///
/// # Arguments
///
/// * `plaintext` - The data to encrypt.
/// * `secret` - The passphrase.
/// * `iterations` - PBKDF2 rounds.
///
/// # Returns
///
/// The payload with a fresh salt, IV and authentication tag.
pub fn encrypt_with(plaintext: &[u8], secret: &[u8], iterations: u32) -> Result<EncryptedPayload> {
    let mut salt = [0u8; SALT_SIZE];
    OsRng.fill_bytes(&mut salt);
    let mut iv = [0u8; IV_SIZE];
    OsRng.fill_bytes(&mut iv);

    let key = kdf::derive_key(secret, &salt, iterations);
    let cipher = Aes256Gcm16::new(key.as_bytes().into());

    let mut sealed = cipher
        .encrypt(Nonce::<U16>::from_slice(&iv), plaintext)
        .map_err(|e| AppError::Encryption(format!("Encryption failed: {}", e)))?;

    // aes-gcm appends the tag to the ciphertext
    let tag_bytes = sealed.split_off(sealed.len() - TAG_SIZE);
    let mut tag = [0u8; TAG_SIZE];
    tag.copy_from_slice(&tag_bytes);

    Ok(EncryptedPayload {
        salt,
        iv,
        tag,
        ciphertext: sealed,
    })
}

/// Decrypts and authenticates `payload` under a key derived from `secret`.
pub fn decrypt_with(payload: &EncryptedPayload, secret: &[u8], iterations: u32) -> Result<Vec<u8>> {
    let key = kdf::derive_key(secret, &payload.salt, iterations);
    let cipher = Aes256Gcm16::new(key.as_bytes().into());

    let mut sealed = Vec::with_capacity(payload.ciphertext.len() + TAG_SIZE);
    sealed.extend_from_slice(&payload.ciphertext);
    sealed.extend_from_slice(&payload.tag);

    cipher
        .decrypt(Nonce::<U16>::from_slice(&payload.iv), sealed.as_slice())
        .map_err(|_| {
            tracing::debug!("Authentication tag mismatch");
            AppError::Decryption
        })
}
