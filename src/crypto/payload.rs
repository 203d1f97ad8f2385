use std::fmt;
use std::str::FromStr;

use crate::error::{AppError, Result};

/// The size of the key-derivation salt in bytes.
pub const SALT_SIZE: usize = 16;
/// The size of the AES-GCM nonce in bytes.
pub const IV_SIZE: usize = 16;
/// The size of the AES-GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

const SEPARATOR: char = ':';

/// The decoded form of `salt:iv:tag:ciphertext`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedPayload {
    pub salt: [u8; SALT_SIZE],
    pub iv: [u8; IV_SIZE],
    pub tag: [u8; TAG_SIZE],
    pub ciphertext: Vec<u8>,
}

fn decode_fixed<const N: usize>(part: &str, name: &str) -> Result<[u8; N]> {
    let bytes = hex::decode(part)
        .map_err(|e| AppError::Format(format!("{} is not valid hex: {}", name, e)))?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| AppError::Format(format!("{} must be {} bytes, got {}", name, N, b.len())))
}

impl FromStr for EncryptedPayload {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(SEPARATOR).collect();
        if parts.len() != 4 {
            return Err(AppError::Format(format!(
                "expected 4 parts, got {}",
                parts.len()
            )));
        }

        Ok(Self {
            salt: decode_fixed(parts[0], "salt")?,
            iv: decode_fixed(parts[1], "iv")?,
            tag: decode_fixed(parts[2], "tag")?,
            ciphertext: hex::decode(parts[3])
                .map_err(|e| AppError::Format(format!("ciphertext is not valid hex: {}", e)))?,
        })
    }
}

impl fmt::Display for EncryptedPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{sep}{}{sep}{}{sep}{}",
            hex::encode(self.salt),
            hex::encode(self.iv),
            hex::encode(self.tag),
            hex::encode(&self.ciphertext),
            sep = SEPARATOR
        )
    }
}

/// Reports whether `text` looks like an encrypted payload.
///
/// This is a format check and nothing more: it says nothing about whether the
/// payload authenticates under any key. Use it only to skip values that were
/// never encrypted.
pub fn is_encrypted(text: &str) -> bool {
    text.parse::<EncryptedPayload>().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEX16: &str = "00112233445566778899aabbccddeeff";

    #[test]
    fn parses_well_formed_payload() {
        let text = format!("{HEX16}:{HEX16}:{HEX16}:deadbeef");
        let payload: EncryptedPayload = text.parse().unwrap();
        assert_eq!(payload.ciphertext, vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(payload.to_string(), text);
    }

    #[test]
    fn rejects_wrong_part_count() {
        let text = format!("{HEX16}:{HEX16}:{HEX16}");
        assert!(matches!(
            text.parse::<EncryptedPayload>(),
            Err(AppError::Format(_))
        ));
        assert!(!is_encrypted(&format!("{HEX16}:{HEX16}:{HEX16}:00:00")));
    }

    #[test]
    fn heuristic_rejects_plain_text_and_short_fields() {
        assert!(!is_encrypted("plain text"));
        assert!(!is_encrypted("a:b:c:d"));
        assert!(!is_encrypted(&format!("{HEX16}:{HEX16}:abcd:00")));
        assert!(!is_encrypted(&format!("{HEX16}:{HEX16}:{HEX16}:zz")));
    }
}
