use std::env;
use std::str::FromStr;
use std::time::Duration;
use anyhow::{Context, Result};
use zeroize::Zeroizing;

use crate::crypto::kdf::DEFAULT_ITERATIONS;
use crate::crypto::password::Argon2Cost;
use crate::guard::limiter::{BruteForcePolicy, BurstPolicy, GuardConfig, RateLimitPolicy};
use crate::services::api_keys::DEFAULT_SIGNATURE_MAX_AGE_MS;

/// The shortest accepted encryption secret.
pub const MIN_SECRET_LEN: usize = 32;

/// The application's configuration.
#[derive(Clone)]
pub struct Config {
    /// The passphrase all payloads are encrypted under.
    pub encryption_secret: Zeroizing<String>,
    /// Whether the service runs in production (enables `Secure` cookies).
    pub production: bool,
    /// The address the HTTP server binds to.
    pub bind_addr: String,
    /// The URL of the Redis server. Limiter state stays in-process when unset.
    pub redis_url: Option<String>,
    /// The lifetime of a session in days.
    pub session_duration_days: i64,
    /// PBKDF2 rounds for payload key derivation.
    pub kdf_iterations: u32,
    /// Argon2id cost for password hashes.
    pub password_cost: Argon2Cost,
    /// Rate limiting and lockout thresholds.
    pub guard: GuardConfig,
    /// Replay window for signed requests.
    pub signature_max_age_ms: i64,
}

fn env_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("Invalid {}", name)),
        Err(_) => Ok(default),
    }
}

fn secs(name: &str, default: u64) -> Result<Duration> {
    env_or(name, default).map(Duration::from_secs)
}

/// Rejects limits that would disable a guard or divide by zero.
fn validate_guard(guard: &GuardConfig) -> Result<()> {
    let counts = [
        ("RATE_LIMIT_MAX", guard.requests.max_requests),
        ("MAX_LOGIN_ATTEMPTS", guard.account_lockout.max_attempts),
        ("MAX_IP_LOGIN_ATTEMPTS", guard.ip_lockout.max_attempts),
        ("BURST_THRESHOLD", guard.burst.threshold),
    ];
    let windows = [
        ("RATE_LIMIT_WINDOW_SECS", guard.requests.window),
        ("LOGIN_WINDOW_SECS", guard.account_lockout.window),
        ("LOCKOUT_DURATION_SECS", guard.account_lockout.lockout),
        ("BURST_WINDOW_SECS", guard.burst.window),
        ("BURST_BLOCK_SECS", guard.burst.base_block),
    ];

    if let Some((name, _)) = counts.iter().find(|(_, value)| *value == 0) {
        anyhow::bail!("{} must be positive", name);
    }
    if let Some((name, _)) = windows.iter().find(|(_, value)| value.is_zero()) {
        anyhow::bail!("{} must be positive", name);
    }
    Ok(())
}

impl Config {
    /// Creates a new `Config` from environment variables.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `Config`.
    pub fn from_env() -> Result<Self> {
        let encryption_secret = Zeroizing::new(
            env::var("ENCRYPTION_SECRET")
                .context("ENCRYPTION_SECRET must be set (generate with: openssl rand -hex 32)")?,
        );

        if encryption_secret.len() < MIN_SECRET_LEN {
            anyhow::bail!("ENCRYPTION_SECRET must be at least {} characters", MIN_SECRET_LEN);
        }

        let session_duration_days: i64 = env_or("SESSION_DURATION_DAYS", 7)?;
        if !(7..=30).contains(&session_duration_days) {
            anyhow::bail!("SESSION_DURATION_DAYS must be between 7 and 30");
        }

        let defaults = GuardConfig::default();
        let guard = GuardConfig {
            requests: RateLimitPolicy::new(
                "requests",
                env_or("RATE_LIMIT_MAX", defaults.requests.max_requests)?,
                secs("RATE_LIMIT_WINDOW_SECS", defaults.requests.window.as_secs())?,
            ),
            account_lockout: BruteForcePolicy {
                max_attempts: env_or("MAX_LOGIN_ATTEMPTS", defaults.account_lockout.max_attempts)?,
                window: secs("LOGIN_WINDOW_SECS", defaults.account_lockout.window.as_secs())?,
                lockout: secs("LOCKOUT_DURATION_SECS", defaults.account_lockout.lockout.as_secs())?,
            },
            ip_lockout: BruteForcePolicy {
                max_attempts: env_or("MAX_IP_LOGIN_ATTEMPTS", defaults.ip_lockout.max_attempts)?,
                window: secs("LOGIN_WINDOW_SECS", defaults.ip_lockout.window.as_secs())?,
                lockout: secs("LOCKOUT_DURATION_SECS", defaults.ip_lockout.lockout.as_secs())?,
            },
            burst: BurstPolicy {
                threshold: env_or("BURST_THRESHOLD", defaults.burst.threshold)?,
                window: secs("BURST_WINDOW_SECS", defaults.burst.window.as_secs())?,
                base_block: secs("BURST_BLOCK_SECS", defaults.burst.base_block.as_secs())?,
            },
        };

        validate_guard(&guard)?;

        let cost = Argon2Cost::default();

        Ok(Self {
            encryption_secret,
            production: env::var("APP_ENV").unwrap_or_else(|_| "development".to_string())
                == "production",
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:3000".to_string()),
            redis_url: env::var("REDIS_URL").ok().filter(|url| !url.is_empty()),
            session_duration_days,
            kdf_iterations: env_or("KDF_ITERATIONS", DEFAULT_ITERATIONS)?,
            password_cost: Argon2Cost {
                memory_mb: env_or("ARGON2_MEMORY_MB", cost.memory_mb)?,
                iterations: env_or("ARGON2_ITERATIONS", cost.iterations)?,
                parallelism: env_or("ARGON2_PARALLELISM", cost.parallelism)?,
            },
            guard,
            signature_max_age_ms: env_or("SIGNATURE_MAX_AGE_MS", DEFAULT_SIGNATURE_MAX_AGE_MS)?,
        })
    }

    /// A configuration with the given secret and cheap crypto costs, for tests
    /// and local tooling.
    pub fn for_testing(encryption_secret: &str) -> Self {
        Self {
            encryption_secret: Zeroizing::new(encryption_secret.to_string()),
            production: false,
            bind_addr: "127.0.0.1:0".to_string(),
            redis_url: None,
            session_duration_days: 7,
            kdf_iterations: 1_000,
            password_cost: Argon2Cost {
                memory_mb: 1,
                iterations: 1,
                parallelism: 1,
            },
            guard: GuardConfig::default(),
            signature_max_age_ms: DEFAULT_SIGNATURE_MAX_AGE_MS,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("production", &self.production)
            .field("bind_addr", &self.bind_addr)
            .field("redis_url", &self.redis_url.as_ref().map(|_| "<set>"))
            .field("session_duration_days", &self.session_duration_days)
            .field("kdf_iterations", &self.kdf_iterations)
            .field("guard", &self.guard)
            .field("signature_max_age_ms", &self.signature_max_age_ms)
            .finish_non_exhaustive()
    }
}
