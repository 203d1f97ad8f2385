use rand::RngCore;
use rand::rngs::OsRng;

/// Generates `len` random bytes from the OS CSPRNG, hex-encoded.
///
/// # Returns
///
/// A string of `2 * len` lowercase hex characters.
pub fn generate_secure_token(len: usize) -> String {
    let mut token = vec![0u8; len];
    OsRng.fill_bytes(&mut token);
    hex::encode(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_has_requested_length() {
        assert_eq!(generate_secure_token(16).len(), 32);
        assert_eq!(generate_secure_token(0), "");
    }

    #[test]
    fn tokens_do_not_repeat() {
        assert_ne!(generate_secure_token(32), generate_secure_token(32));
    }
}
