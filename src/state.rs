use std::sync::Arc;
use std::time::Duration;

use crate::clock::SharedClock;
use crate::config::Config;
use crate::crypto::aes::SecretCipher;
use crate::crypto::password::{Argon2Hasher, PasswordHasher};
use crate::error::Result;
use crate::guard::limiter::RateLimitGuard;
use crate::guard::redis_store::RedisStore;
use crate::guard::store::{Counter, CounterStore, MemoryStore};
use crate::repositories::user::UserRepository;
use crate::services::api_keys::ApiKeyManager;
use crate::services::fields::FieldCipher;
use crate::services::session::SessionTokenManager;

/// How often the in-process limiter store is swept.
pub const LIMITER_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// The counter store picked at startup.
#[derive(Clone)]
pub enum LimiterStore {
    Memory(MemoryStore),
    Redis(RedisStore),
}

impl CounterStore for LimiterStore {
    async fn get(&self, key: &str) -> Result<Option<Counter>> {
        match self {
            LimiterStore::Memory(store) => store.get(key).await,
            LimiterStore::Redis(store) => store.get(key).await,
        }
    }

    async fn incr(&self, key: &str, window: Duration) -> Result<Counter> {
        match self {
            LimiterStore::Memory(store) => store.incr(key, window).await,
            LimiterStore::Redis(store) => store.incr(key, window).await,
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        match self {
            LimiterStore::Memory(store) => store.expire(key, ttl).await,
            LimiterStore::Redis(store) => store.expire(key, ttl).await,
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match self {
            LimiterStore::Memory(store) => store.delete(key).await,
            LimiterStore::Redis(store) => store.delete(key).await,
        }
    }
}

/// The application's state.
#[derive(Clone)]
pub struct AppState {
    /// The application's configuration.
    pub config: Arc<Config>,
    /// Session token issuance.
    pub sessions: SessionTokenManager,
    /// API key issuance and request signatures.
    pub api_keys: ApiKeyManager,
    /// Per-field record encryption.
    pub fields: FieldCipher,
    /// Rate limiting and lockout.
    pub guard: Arc<RateLimitGuard<LimiterStore>>,
    /// Password hashing.
    pub hasher: Arc<dyn PasswordHasher>,
    /// Registered users.
    pub users: UserRepository,
    /// The time source shared by every service.
    pub clock: SharedClock,
}

impl AppState {
    /// Creates a new `AppState`, connecting to Redis when configured.
    ///
    /// # Arguments
    ///
    /// * `config` - The application's configuration.
    /// * `clock` - The time source.
    pub async fn new(config: &Config, clock: SharedClock) -> Result<Self> {
        let store = match &config.redis_url {
            Some(url) => LimiterStore::Redis(RedisStore::connect(url, "rampart:").await?),
            None => {
                let store = MemoryStore::new(clock.clone());
                store.spawn_sweeper(LIMITER_SWEEP_INTERVAL);
                tracing::info!("✅ In-memory limiter store initialized (single instance only)");
                LimiterStore::Memory(store)
            }
        };

        Self::with_store(config, clock, store)
    }

    /// Creates a new `AppState` over an existing limiter store.
    pub fn with_store(config: &Config, clock: SharedClock, store: LimiterStore) -> Result<Self> {
        let cipher = SecretCipher::with_iterations(
            config.encryption_secret.as_bytes(),
            config.kdf_iterations,
        );

        let sessions = SessionTokenManager::new(
            cipher.clone(),
            chrono::Duration::days(config.session_duration_days),
            clock.clone(),
        )
        .with_secure_cookies(config.production);

        let api_keys = ApiKeyManager::new(cipher.clone(), clock.clone())
            .with_signature_max_age_ms(config.signature_max_age_ms);

        let hasher = Argon2Hasher::new(config.password_cost)?;

        Ok(AppState {
            config: Arc::new(config.clone()),
            sessions,
            api_keys,
            fields: FieldCipher::new(cipher),
            guard: Arc::new(RateLimitGuard::new(store, config.guard.clone())),
            hasher: Arc::new(hasher),
            users: UserRepository::new(),
            clock,
        })
    }
}
