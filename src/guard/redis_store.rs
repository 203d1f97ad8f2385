use redis::aio::ConnectionManager;
use std::time::Duration;

use crate::error::Result;
use crate::guard::store::{Counter, CounterStore};

// INCR and set the expiry in one step so a crash between the two can never
// leave a counter without a TTL.
const INCR_WITH_WINDOW: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return {count, redis.call('PTTL', KEYS[1])}
"#;

/// A [`CounterStore`] shared by every instance pointing at the same Redis.
#[derive(Clone)]
pub struct RedisStore {
    redis: ConnectionManager,
    prefix: String,
}

impl RedisStore {
    /// Wraps a connection manager. Keys are namespaced under `prefix`.
    pub fn new(redis: ConnectionManager, prefix: impl Into<String>) -> Self {
        Self {
            redis,
            prefix: prefix.into(),
        }
    }

    /// Connects to `redis_url`.
    pub async fn connect(redis_url: &str, prefix: impl Into<String>) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let redis = ConnectionManager::new(client).await?;
        tracing::info!("✅ Redis Connection Manager initialized for rate limiting");
        Ok(Self::new(redis, prefix))
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}

fn ttl_from_pttl(pttl: i64) -> Duration {
    // PTTL is -1 for keys without expiry and -2 for missing keys
    Duration::from_millis(pttl.max(0) as u64)
}

impl CounterStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Counter>> {
        let key = self.key(key);
        let (count, pttl): (Option<u64>, i64) = redis::pipe()
            .cmd("GET")
            .arg(&key)
            .cmd("PTTL")
            .arg(&key)
            .query_async(&mut self.redis.clone())
            .await?;

        Ok(count.map(|count| Counter {
            count,
            ttl: ttl_from_pttl(pttl),
        }))
    }

    async fn incr(&self, key: &str, window: Duration) -> Result<Counter> {
        let (count, pttl): (u64, i64) = redis::Script::new(INCR_WITH_WINDOW)
            .key(self.key(key))
            .arg(window.as_millis() as u64)
            .invoke_async(&mut self.redis.clone())
            .await?;

        Ok(Counter {
            count,
            ttl: ttl_from_pttl(pttl),
        })
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let _: i64 = redis::cmd("PEXPIRE")
            .arg(self.key(key))
            .arg(ttl.as_millis() as u64)
            .query_async(&mut self.redis.clone())
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let _: i64 = redis::cmd("DEL")
            .arg(self.key(key))
            .query_async(&mut self.redis.clone())
            .await?;
        Ok(())
    }
}
