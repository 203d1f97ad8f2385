use argon2::{
    Algorithm, Argon2, Params, ParamsBuilder, Version,
    password_hash::{PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString},
};
use rand::RngCore;
use rand::rngs::OsRng;
use zeroize::Zeroize;

use crate::error::{AppError, Result};

/// Hashes and verifies passwords.
///
/// Login flows depend on this trait rather than a concrete algorithm so cost
/// parameters can be tuned per deployment and kept cheap in tests.
pub trait PasswordHasher: Send + Sync {
    /// Produces a self-describing (PHC) hash of `password`.
    fn hash(&self, password: &str) -> Result<String>;

    /// Checks `password` against a hash produced by [`PasswordHasher::hash`].
    fn verify(&self, password: &str, hash: &str) -> Result<bool>;
}

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy)]
pub struct Argon2Cost {
    /// Memory cost in MB.
    pub memory_mb: u32,
    /// Number of passes.
    pub iterations: u32,
    /// Degree of parallelism.
    pub parallelism: u32,
}

impl Default for Argon2Cost {
    fn default() -> Self {
        Self {
            memory_mb: 19,
            iterations: 2,
            parallelism: 1,
        }
    }
}

/// Argon2id password hashing.
#[derive(Debug, Clone)]
pub struct Argon2Hasher {
    params: Params,
}

impl Argon2Hasher {
    /// Creates a hasher with the given cost.
    pub fn new(cost: Argon2Cost) -> Result<Self> {
        let memory_kib = cost.memory_mb.checked_mul(1024).ok_or_else(|| {
            AppError::Validation(format!("Argon2 memory cost of {} MB is too large", cost.memory_mb))
        })?;

        let params = ParamsBuilder::new()
            .m_cost(memory_kib)
            .t_cost(cost.iterations)
            .p_cost(cost.parallelism)
            .build()
            .map_err(|e| AppError::Validation(format!("Invalid Argon2 params: {}", e)))?;

        Ok(Self { params })
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }
}

impl PasswordHasher for Argon2Hasher {
    fn hash(&self, password: &str) -> Result<String> {
        let mut password_bytes = password.as_bytes().to_vec();

        let mut salt_bytes = [0u8; 16];
        OsRng.fill_bytes(&mut salt_bytes);
        let salt = SaltString::encode_b64(&salt_bytes)
            .map_err(|e| AppError::Encryption(format!("Salt encoding error: {}", e)))?;

        let hash = self
            .argon2()
            .hash_password(&password_bytes, &salt)
            .map_err(|e| AppError::Encryption(format!("Argon2 hash error: {}", e)))?
            .to_string();

        password_bytes.zeroize();
        tracing::debug!("Password hashed with Argon2id");
        Ok(hash)
    }

    fn verify(&self, password: &str, hash: &str) -> Result<bool> {
        let mut password_bytes = password.as_bytes().to_vec();
        let parsed_hash = PasswordHash::new(hash)
            .map_err(|e| AppError::Encryption(format!("Hash parse error: {}", e)))?;

        let result = self
            .argon2()
            .verify_password(&password_bytes, &parsed_hash)
            .is_ok();

        password_bytes.zeroize();
        Ok(result)
    }
}
