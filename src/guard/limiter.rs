use std::time::Duration;

use crate::error::{AppError, Result};
use crate::guard::store::CounterStore;

/// A fixed request budget per key per window.
#[derive(Debug, Clone)]
pub struct RateLimitPolicy {
    /// Namespaces the counters, so one key can be limited by several policies.
    pub name: String,
    pub max_requests: u64,
    pub window: Duration,
}

impl RateLimitPolicy {
    pub fn new(name: impl Into<String>, max_requests: u64, window: Duration) -> Self {
        Self {
            name: name.into(),
            max_requests,
            window,
        }
    }
}

/// Failure budget before a key is locked out.
#[derive(Debug, Clone, Copy)]
pub struct BruteForcePolicy {
    /// Failures within `window` that trigger a block.
    pub max_attempts: u64,
    /// How long failures are remembered when no block is reached.
    pub window: Duration,
    /// How long a block lasts.
    pub lockout: Duration,
}

/// Short-window burst thresholds.
#[derive(Debug, Clone, Copy)]
pub struct BurstPolicy {
    pub threshold: u64,
    pub window: Duration,
    /// Block duration per burst level.
    pub base_block: Duration,
}

/// Limits used by [`RateLimitGuard`].
#[derive(Debug, Clone)]
pub struct GuardConfig {
    pub requests: RateLimitPolicy,
    pub account_lockout: BruteForcePolicy,
    pub ip_lockout: BruteForcePolicy,
    pub burst: BurstPolicy,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            requests: RateLimitPolicy::new("requests", 100, Duration::from_secs(15 * 60)),
            account_lockout: BruteForcePolicy {
                max_attempts: 5,
                window: Duration::from_secs(15 * 60),
                lockout: Duration::from_secs(15 * 60),
            },
            ip_lockout: BruteForcePolicy {
                max_attempts: 20,
                window: Duration::from_secs(15 * 60),
                lockout: Duration::from_secs(15 * 60),
            },
            burst: BurstPolicy {
                threshold: 50,
                window: Duration::from_secs(10),
                base_block: Duration::from_secs(60),
            },
        }
    }
}

/// What a brute-force counter tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Ip,
    Account,
}

impl Scope {
    fn as_str(self) -> &'static str {
        match self {
            Scope::Ip => "ip",
            Scope::Account => "account",
        }
    }

    fn blocked_error(self, retry_after_secs: u64) -> AppError {
        match self {
            Scope::Ip => AppError::IpBlocked { retry_after_secs },
            Scope::Account => AppError::AccountLocked { retry_after_secs },
        }
    }
}

/// An allowed request and the budget left in its window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub limit: u64,
    pub remaining: u64,
    pub reset_after_secs: u64,
}

/// The state of one brute-force key after a recorded failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStatus {
    /// Still under the threshold.
    Accumulating { attempts: u64, remaining: u64 },
    /// The failure tripped the threshold; the key is now blocked.
    Blocked { retry_after_secs: u64 },
}

/// Attempt positions reserved for one login.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoginAttempt {
    pub ip: u64,
    pub account: u64,
}

/// The outcome of a login failure for both the IP and the account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoginFailure {
    pub ip: FailureStatus,
    pub account: FailureStatus,
}

impl LoginFailure {
    pub fn is_blocked(&self) -> bool {
        matches!(self.ip, FailureStatus::Blocked { .. })
            || matches!(self.account, FailureStatus::Blocked { .. })
    }

    /// The error to report once this failure tripped a block. An account lock
    /// wins over an IP block.
    pub fn lockout_error(&self) -> Option<AppError> {
        match (self.account, self.ip) {
            (FailureStatus::Blocked { retry_after_secs }, _) => {
                Some(Scope::Account.blocked_error(retry_after_secs))
            }
            (_, FailureStatus::Blocked { retry_after_secs }) => {
                Some(Scope::Ip.blocked_error(retry_after_secs))
            }
            _ => None,
        }
    }
}

/// Short-window request statistics for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BurstReport {
    pub is_burst: bool,
    /// `request_count / threshold` once over the threshold, else zero.
    pub burst_level: u64,
    pub request_count: u64,
}

/// Rate limiting, burst detection and brute-force lockout over a
/// [`CounterStore`].
///
/// Rate-limit and burst counters are charged on every attempt. Brute-force
/// counters are charged when a login is reserved, before any credential
/// check, and cleared when it succeeds.
#[derive(Clone)]
pub struct RateLimitGuard<S> {
    store: S,
    config: GuardConfig,
}

fn rate_key(policy: &str, key: &str) -> String {
    format!("rate_limit:{}:{}", policy, key)
}

fn attempts_key(scope: Scope, key: &str) -> String {
    format!("login_attempts:{}:{}", scope.as_str(), key)
}

fn blocked_key(scope: Scope, key: &str) -> String {
    format!("blocked:{}:{}", scope.as_str(), key)
}

fn burst_key(key: &str, window: Duration) -> String {
    format!("burst:{}:{}", window.as_secs(), key)
}

impl<S: CounterStore> RateLimitGuard<S> {
    pub fn new(store: S, config: GuardConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Charges one request to `key` under `policy`.
    ///
    /// # Returns
    ///
    /// The remaining budget, or [`AppError::RateLimitExceeded`] once the count
    /// passes `max_requests`.
    pub async fn check_rate_limit(&self, policy: &RateLimitPolicy, key: &str) -> Result<RateLimitDecision> {
        let counter = self.store.incr(&rate_key(&policy.name, key), policy.window).await?;

        if counter.count > policy.max_requests {
            tracing::warn!(
                policy = %policy.name,
                key = %key,
                count = counter.count,
                limit = policy.max_requests,
                "Rate limit exceeded"
            );
            return Err(AppError::RateLimitExceeded {
                retry_after_secs: counter.retry_after_secs(),
            });
        }

        Ok(RateLimitDecision {
            limit: policy.max_requests,
            remaining: policy.max_requests - counter.count,
            reset_after_secs: counter.retry_after_secs(),
        })
    }

    /// Runs the per-request pipeline for a client IP: block check, burst
    /// detection, then the general request budget.
    pub async fn check_request(&self, ip: &str) -> Result<RateLimitDecision> {
        self.check_blocked(Scope::Ip, ip).await?;
        self.enforce_burst(ip).await?;
        self.check_rate_limit(&self.config.requests, ip).await
    }

    /// Fails with the scope's block error while `key` is blocked.
    pub async fn check_blocked(&self, scope: Scope, key: &str) -> Result<()> {
        match self.store.get(&blocked_key(scope, key)).await? {
            Some(block) => Err(scope.blocked_error(block.retry_after_secs())),
            None => Ok(()),
        }
    }

    pub async fn check_ip_blocked(&self, ip: &str) -> Result<()> {
        self.check_blocked(Scope::Ip, ip).await
    }

    /// Blocks `key` for `duration`, extending any shorter block in place.
    pub async fn block(&self, scope: Scope, key: &str, duration: Duration) -> Result<()> {
        let block_key = blocked_key(scope, key);
        let current = self.store.incr(&block_key, duration).await?;
        // a fresh block already has `duration`; never shorten a longer one
        if current.ttl < duration {
            self.store.expire(&block_key, duration).await?;
        }
        tracing::warn!(scope = scope.as_str(), key = %key, secs = duration.as_secs(), "Key blocked");
        Ok(())
    }

    pub async fn block_ip(&self, ip: &str, duration: Duration) -> Result<()> {
        self.block(Scope::Ip, ip, duration).await
    }

    /// Clears the block and failure history for `key`.
    pub async fn unblock(&self, scope: Scope, key: &str) -> Result<()> {
        self.store.delete(&blocked_key(scope, key)).await?;
        self.store.delete(&attempts_key(scope, key)).await?;
        tracing::info!(scope = scope.as_str(), key = %key, "Key unblocked");
        Ok(())
    }

    /// Rejects a login before any credential check if either the IP or the
    /// account is blocked.
    pub async fn check_login_allowed(&self, ip: &str, account: &str) -> Result<()> {
        self.check_blocked(Scope::Ip, ip).await?;
        self.check_blocked(Scope::Account, account).await
    }

    /// The failures currently counted against `key`.
    pub async fn failed_attempts(&self, scope: Scope, key: &str) -> Result<u64> {
        Ok(self
            .store
            .get(&attempts_key(scope, key))
            .await?
            .map_or(0, |c| c.count))
    }

    fn lockout_policy(&self, scope: Scope) -> BruteForcePolicy {
        match scope {
            Scope::Ip => self.config.ip_lockout,
            Scope::Account => self.config.account_lockout,
        }
    }

    /// Blocks `key` for the policy's lockout, returning the retry delay.
    async fn lock_out(&self, scope: Scope, key: &str, policy: BruteForcePolicy) -> Result<u64> {
        self.block(scope, key, policy.lockout).await?;
        // a fresh budget once the block lifts
        self.store.delete(&attempts_key(scope, key)).await?;
        Ok(policy.lockout.as_secs().max(1))
    }

    /// Charges one attempt to `key` before its credentials are checked.
    ///
    /// The increment is atomic in the store, so however many attempts race,
    /// at most `max_attempts` of them are handed out per window. Any attempt
    /// past that locks the key.
    ///
    /// # Returns
    ///
    /// The attempt's position in the window, or the scope's block error.
    pub async fn reserve_attempt(&self, scope: Scope, key: &str) -> Result<u64> {
        self.check_blocked(scope, key).await?;

        let policy = self.lockout_policy(scope);
        let attempts = self.store.incr(&attempts_key(scope, key), policy.window).await?;

        // a racing attempt may have locked the key after the first check
        self.check_blocked(scope, key).await?;

        if attempts.count > policy.max_attempts {
            tracing::warn!(scope = scope.as_str(), key = %key, attempts = attempts.count, "Attempt budget exhausted");
            let retry_after_secs = self.lock_out(scope, key, policy).await?;
            return Err(scope.blocked_error(retry_after_secs));
        }

        Ok(attempts.count)
    }

    /// Settles a reserved attempt that failed. The attempt that reaches
    /// `max_attempts` locks the key.
    pub async fn settle_failure(&self, scope: Scope, key: &str, attempt: u64) -> Result<FailureStatus> {
        let policy = self.lockout_policy(scope);

        if attempt < policy.max_attempts {
            tracing::debug!(scope = scope.as_str(), key = %key, attempts = attempt, "Authentication failure recorded");
            return Ok(FailureStatus::Accumulating {
                attempts: attempt,
                remaining: policy.max_attempts - attempt,
            });
        }

        let retry_after_secs = self.lock_out(scope, key, policy).await?;
        Ok(FailureStatus::Blocked { retry_after_secs })
    }

    /// Records one authentication failure for `key` that was not reserved
    /// up front.
    pub async fn record_failure(&self, scope: Scope, key: &str) -> Result<FailureStatus> {
        if let Some(block) = self.store.get(&blocked_key(scope, key)).await? {
            return Ok(FailureStatus::Blocked {
                retry_after_secs: block.retry_after_secs(),
            });
        }

        let policy = self.lockout_policy(scope);
        let attempts = self.store.incr(&attempts_key(scope, key), policy.window).await?;
        self.settle_failure(scope, key, attempts.count).await
    }

    /// Reserves a login attempt for both the IP and the account. Blocked
    /// keys are rejected before anything is charged.
    pub async fn begin_login(&self, ip: &str, account: &str) -> Result<LoginAttempt> {
        self.check_login_allowed(ip, account).await?;

        Ok(LoginAttempt {
            ip: self.reserve_attempt(Scope::Ip, ip).await?,
            account: self.reserve_attempt(Scope::Account, account).await?,
        })
    }

    /// Settles a failed login reserved with [`RateLimitGuard::begin_login`].
    pub async fn record_login_failure(&self, ip: &str, account: &str, attempt: LoginAttempt) -> Result<LoginFailure> {
        Ok(LoginFailure {
            ip: self.settle_failure(Scope::Ip, ip, attempt.ip).await?,
            account: self.settle_failure(Scope::Account, account, attempt.account).await?,
        })
    }

    /// Clears failure history after a successful login.
    pub async fn record_login_success(&self, ip: &str, account: &str) -> Result<()> {
        self.store.delete(&attempts_key(Scope::Ip, ip)).await?;
        self.store.delete(&attempts_key(Scope::Account, account)).await
    }

    /// Counts a request in a short window and reports whether `key` is
    /// bursting.
    pub async fn detect_burst(&self, key: &str, threshold: u64, window_secs: u64) -> Result<BurstReport> {
        let window = Duration::from_secs(window_secs);
        let counter = self.store.incr(&burst_key(key, window), window).await?;

        let is_burst = counter.count > threshold;
        Ok(BurstReport {
            is_burst,
            burst_level: if is_burst { counter.count / threshold.max(1) } else { 0 },
            request_count: counter.count,
        })
    }

    /// Detects bursts with the configured policy and blocks a bursting IP for
    /// `base_block * burst_level`.
    pub async fn enforce_burst(&self, ip: &str) -> Result<BurstReport> {
        let policy = self.config.burst;
        let report = self
            .detect_burst(ip, policy.threshold, policy.window.as_secs())
            .await?;

        if report.is_burst {
            let level = u32::try_from(report.burst_level).unwrap_or(u32::MAX);
            let duration = policy.base_block.saturating_mul(level);
            tracing::warn!(
                ip = %ip,
                burst_level = report.burst_level,
                request_count = report.request_count,
                "Request burst detected"
            );
            self.block_ip(ip, duration).await?;
            return Err(AppError::IpBlocked {
                retry_after_secs: duration.as_secs().max(1),
            });
        }

        Ok(report)
    }
}
