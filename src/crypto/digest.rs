use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Returns the hex SHA-256 digest of `data`.
pub fn hash_data(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Returns the hex HMAC-SHA256 of `data` keyed with `secret`.
pub fn generate_hmac(data: &[u8], secret: &[u8]) -> String {
    // HMAC accepts keys of any length, so this cannot fail
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret)
        .unwrap_or_else(|_| unreachable!("HMAC can take key of any size"));
    mac.update(data);
    hex::encode(mac.finalize().into_bytes())
}

/// Verifies a hex HMAC-SHA256 signature in constant time.
pub fn verify_hmac(data: &[u8], signature: &str, secret: &[u8]) -> bool {
    let expected = generate_hmac(data, secret);
    constant_time_eq(expected.as_bytes(), signature.as_bytes())
}

/// Compares two byte strings without short-circuiting on the first difference.
///
/// Lengths are not secret; a length mismatch returns `false` immediately.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}
