use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::clock::SharedClock;
use crate::error::{AppError, Result};

/// A counter and the time left before it expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Counter {
    pub count: u64,
    pub ttl: Duration,
}

impl Counter {
    /// The remaining lifetime rounded up to whole seconds, never zero.
    pub fn retry_after_secs(&self) -> u64 {
        self.ttl.as_millis().div_ceil(1000).max(1) as u64
    }
}

/// Expiring counters keyed by string.
///
/// The limiter talks to its state only through this trait, so the in-process
/// map can be swapped for a shared cache without touching call sites.
pub trait CounterStore: Send + Sync + 'static {
    /// Reads a live counter.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Counter>>> + Send;

    /// Increments a counter, creating it with lifetime `window` if it is absent
    /// or expired. An existing counter keeps its expiry.
    fn incr(&self, key: &str, window: Duration) -> impl Future<Output = Result<Counter>> + Send;

    /// Resets the lifetime of a live counter to `ttl`. Missing keys are ignored.
    fn expire(&self, key: &str, ttl: Duration) -> impl Future<Output = Result<()>> + Send;

    /// Removes a counter.
    fn delete(&self, key: &str) -> impl Future<Output = Result<()>> + Send;
}

#[derive(Debug)]
struct Entry {
    count: u64,
    expires_at: DateTime<Utc>,
}

impl Entry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    fn snapshot(&self, now: DateTime<Utc>) -> Counter {
        Counter {
            count: self.count,
            ttl: (self.expires_at - now).to_std().unwrap_or_default(),
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    last_sweep: Option<DateTime<Utc>>,
}

impl Inner {
    fn sweep(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now));
        self.last_sweep = Some(now);
        before - self.entries.len()
    }

    /// Sweeps at most once per `LAZY_SWEEP_INTERVAL_MS` so a busy map is not
    /// rescanned on every request.
    fn maybe_sweep(&mut self, now: DateTime<Utc>) {
        let due = match self.last_sweep {
            Some(last) => (now - last).num_milliseconds() >= LAZY_SWEEP_INTERVAL_MS,
            None => true,
        };
        if due {
            self.sweep(now);
        }
    }
}

const LAZY_SWEEP_INTERVAL_MS: i64 = 1_000;

/// An in-process [`CounterStore`].
///
/// All mutations happen under one map lock that is never held across I/O.
/// Expired entries are evicted lazily on writes, and optionally by a
/// background sweeper.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    clock: SharedClock,
}

impl MemoryStore {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            clock,
        }
    }

    /// Drops every expired entry, returning how many were removed.
    pub async fn sweep(&self) -> usize {
        let now = self.clock.now();
        self.inner.lock().await.sweep(now)
    }

    /// The number of entries currently held, live or not.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Starts a task that sweeps the store every `interval`.
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let removed = store.sweep().await;
                if removed > 0 {
                    tracing::debug!(removed, "Swept expired limiter entries");
                }
            }
        })
    }
}

impl CounterStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Counter>> {
        let now = self.clock.now();
        let inner = self.inner.lock().await;
        Ok(inner
            .entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.snapshot(now)))
    }

    async fn incr(&self, key: &str, window: Duration) -> Result<Counter> {
        let now = self.clock.now();
        let window = chrono::Duration::from_std(window)
            .map_err(|e| AppError::Store(format!("Invalid window: {}", e)))?;

        let mut inner = self.inner.lock().await;
        inner.maybe_sweep(now);

        let entry = inner
            .entries
            .entry(key.to_string())
            .and_modify(|entry| {
                if entry.is_live(now) {
                    entry.count += 1;
                } else {
                    entry.count = 1;
                    entry.expires_at = now + window;
                }
            })
            .or_insert_with(|| Entry {
                count: 1,
                expires_at: now + window,
            });

        Ok(entry.snapshot(now))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let now = self.clock.now();
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| AppError::Store(format!("Invalid ttl: {}", e)))?;

        let mut inner = self.inner.lock().await;
        if let Some(entry) = inner.entries.get_mut(key) {
            if entry.is_live(now) {
                entry.expires_at = now + ttl;
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.inner.lock().await.entries.remove(key);
        Ok(())
    }
}
