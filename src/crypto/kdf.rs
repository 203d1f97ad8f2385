use pbkdf2::pbkdf2_hmac;
use sha2::Sha512;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// The size of the AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;
/// PBKDF2 rounds used unless a caller overrides them.
pub const DEFAULT_ITERATIONS: u32 = 100_000;

/// A secure key wrapper that ensures the key is zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SecureKey([u8; KEY_SIZE]);

impl SecureKey {
    /// Creates a new `SecureKey` from a byte array.
    pub fn new(key: [u8; KEY_SIZE]) -> Self {
        Self(key)
    }

    /// Returns a reference to the key as a byte array.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

/// Derives an AES-256 key from a secret and salt with PBKDF2-HMAC-SHA512.
///
/// # Arguments
///
/// * `secret` - The passphrase.
/// * `salt` - The per-payload salt.
/// * `iterations` - The number of PBKDF2 rounds.
///
/// # Returns
///
/// The derived key. Identical inputs always produce the identical key.
pub fn derive_key(secret: &[u8], salt: &[u8], iterations: u32) -> SecureKey {
    let mut key = [0u8; KEY_SIZE];
    pbkdf2_hmac::<Sha512>(secret, salt, iterations, &mut key);
    let secure = SecureKey::new(key);
    key.zeroize();
    secure
}
