//! Per-identity lockout with exponential backoff.
//!
//! Flow Overview:
//! 1) Every authentication attempt asks `may_attempt` first.
//! 2) Failures accumulate; reaching the threshold locks the identity for
//!    `initial_lockout`, doubling per further failure up to `max_lockout`.
//! 3) A success clears the record.
//!
//! Lockout is keyed by identity, never by fingerprint, so varying the secret
//! does not reset it. A failure recorded while already locked still counts
//! and re-arms the window from now.

use anyhow::{ensure, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use tracing::debug;

use super::identity::Identity;

const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
const DEFAULT_INITIAL_LOCKOUT: Duration = Duration::from_secs(10);
const DEFAULT_MAX_LOCKOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LockoutPolicy {
    threshold: u32,
    initial_lockout: Duration,
    max_lockout: Duration,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl LockoutPolicy {
    /// Default policy: lock after 3 failures, 10s doubling up to 30s.
    #[must_use]
    pub fn new() -> Self {
        Self {
            threshold: DEFAULT_FAILURE_THRESHOLD,
            initial_lockout: DEFAULT_INITIAL_LOCKOUT,
            max_lockout: DEFAULT_MAX_LOCKOUT,
        }
    }

    #[must_use]
    pub fn with_threshold(mut self, threshold: u32) -> Self {
        self.threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_initial_lockout(mut self, lockout: Duration) -> Self {
        self.initial_lockout = lockout;
        self
    }

    #[must_use]
    pub fn with_max_lockout(mut self, lockout: Duration) -> Self {
        self.max_lockout = lockout;
        self
    }

    #[must_use]
    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    #[must_use]
    pub fn initial_lockout(&self) -> Duration {
        self.initial_lockout
    }

    #[must_use]
    pub fn max_lockout(&self) -> Duration {
        self.max_lockout
    }

    /// Lockout length after `failures` consecutive failures:
    /// `min(max_lockout, initial_lockout * 2^(failures - threshold))`.
    #[must_use]
    pub fn backoff(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(self.threshold);
        let factor = 1_u32.checked_shl(exponent).unwrap_or(u32::MAX);
        self.initial_lockout
            .saturating_mul(factor)
            .min(self.max_lockout)
    }

    /// # Errors
    /// Returns an error for a zero threshold, a zero initial lockout, or a
    /// maximum shorter than the initial lockout.
    pub fn validate(&self) -> Result<()> {
        ensure!(self.threshold > 0, "failure threshold must be at least 1");
        ensure!(
            !self.initial_lockout.is_zero(),
            "initial lockout must be greater than zero"
        );
        ensure!(
            self.max_lockout >= self.initial_lockout,
            "max lockout must not be shorter than the initial lockout"
        );
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Locked { retry_after: Duration },
}

#[derive(Clone, Copy, Debug)]
struct FailureRecord {
    failure_count: u32,
    locked_until: Option<Instant>,
    last_failure_at: Instant,
}

#[derive(Debug)]
pub struct RateLimiter {
    policy: LockoutPolicy,
    records: Mutex<HashMap<Identity, FailureRecord>>,
    attempts: Mutex<HashMap<Identity, Arc<Mutex<()>>>>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(policy: LockoutPolicy) -> Self {
        Self {
            policy,
            records: Mutex::new(HashMap::new()),
            attempts: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn policy(&self) -> &LockoutPolicy {
        &self.policy
    }

    /// Check whether `identity` may try to authenticate now.
    ///
    /// An expired lockout is cleared here; the failure count is kept so the
    /// next failure backs off further.
    pub async fn may_attempt(&self, identity: &Identity) -> Decision {
        let now = Instant::now();
        let mut records = self.records.lock().await;
        let Some(record) = records.get_mut(identity) else {
            return Decision::Allowed;
        };

        match record.locked_until {
            Some(until) if until > now => Decision::Locked {
                retry_after: until - now,
            },
            Some(_) => {
                record.locked_until = None;
                debug!(
                    identity = %identity,
                    failures = record.failure_count,
                    "lockout expired"
                );
                Decision::Allowed
            }
            None => Decision::Allowed,
        }
    }

    /// Count a failed attempt. Returns the lockout applied, if any.
    pub async fn record_failure(&self, identity: &Identity) -> Option<Duration> {
        let now = Instant::now();
        let mut records = self.records.lock().await;
        let record = records
            .entry(identity.clone())
            .or_insert_with(|| FailureRecord {
                failure_count: 0,
                locked_until: None,
                last_failure_at: now,
            });

        record.failure_count = record.failure_count.saturating_add(1);
        record.last_failure_at = now;

        if record.failure_count >= self.policy.threshold {
            let lockout = self.policy.backoff(record.failure_count);
            record.locked_until = Some(now + lockout);
            Some(lockout)
        } else {
            None
        }
    }

    pub async fn record_success(&self, identity: &Identity) {
        self.records.lock().await.remove(identity);
    }

    pub async fn failure_count(&self, identity: &Identity) -> u32 {
        self.records
            .lock()
            .await
            .get(identity)
            .map_or(0, |record| record.failure_count)
    }

    /// Serialize attempts for one identity.
    ///
    /// Hold the guard across check, authenticate and record so two parallel
    /// wrong secrets cannot both pass `may_attempt` before either counts.
    pub async fn attempt_guard(&self, identity: &Identity) -> OwnedMutexGuard<()> {
        let lock = {
            let mut attempts = self.attempts.lock().await;
            Arc::clone(attempts.entry(identity.clone()).or_default())
        };
        lock.lock_owned().await
    }

    /// Drop records that are not locked and whose last failure is older
    /// than `retention`, plus attempt guards nobody holds.
    /// Returns the number of failure records removed.
    pub async fn purge_stale(&self, retention: Duration) -> usize {
        let now = Instant::now();
        let removed = {
            let mut records = self.records.lock().await;
            let before = records.len();
            records.retain(|_, record| {
                record.locked_until.is_some_and(|until| until > now)
                    || now.duration_since(record.last_failure_at) < retention
            });
            before - records.len()
        };

        self.attempts
            .lock()
            .await
            .retain(|_, lock| Arc::strong_count(lock) > 1);

        removed
    }

    pub async fn tracked_identities(&self) -> usize {
        self.records.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(raw: &str) -> Identity {
        Identity::parse(raw).unwrap()
    }

    fn scenario_policy() -> LockoutPolicy {
        LockoutPolicy::new()
            .with_threshold(3)
            .with_initial_lockout(Duration::from_secs(10))
            .with_max_lockout(Duration::from_secs(30))
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = scenario_policy();
        assert_eq!(policy.backoff(3), Duration::from_secs(10));
        assert_eq!(policy.backoff(4), Duration::from_secs(20));
        assert_eq!(policy.backoff(5), Duration::from_secs(30));
        assert_eq!(policy.backoff(6), Duration::from_secs(30));
        assert_eq!(policy.backoff(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn validate_rejects_zero_threshold() {
        assert!(LockoutPolicy::new().validate().is_ok());
        assert!(LockoutPolicy::new().with_threshold(0).validate().is_err());
        assert!(LockoutPolicy::new()
            .with_initial_lockout(Duration::ZERO)
            .validate()
            .is_err());
        assert!(LockoutPolicy::new()
            .with_max_lockout(Duration::from_secs(5))
            .validate()
            .is_err());
    }

    #[tokio::test]
    async fn allows_identity_without_failures() {
        let limiter = RateLimiter::new(scenario_policy());
        assert_eq!(
            limiter.may_attempt(&identity("user@example.com")).await,
            Decision::Allowed
        );
        assert_eq!(limiter.tracked_identities().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn locks_after_threshold_and_unlocks_after_initial_lockout() {
        let limiter = RateLimiter::new(scenario_policy());
        let user = identity("u@x.com");

        assert_eq!(limiter.record_failure(&user).await, None);
        assert_eq!(limiter.record_failure(&user).await, None);
        assert_eq!(limiter.may_attempt(&user).await, Decision::Allowed);
        assert_eq!(
            limiter.record_failure(&user).await,
            Some(Duration::from_secs(10))
        );

        assert_eq!(
            limiter.may_attempt(&user).await,
            Decision::Locked {
                retry_after: Duration::from_secs(10)
            }
        );

        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(
            limiter.may_attempt(&user).await,
            Decision::Locked {
                retry_after: Duration::from_secs(6)
            }
        );

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(limiter.may_attempt(&user).await, Decision::Allowed);
        assert_eq!(limiter.failure_count(&user).await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_lockouts_back_off_to_cap() {
        let limiter = RateLimiter::new(scenario_policy());
        let user = identity("u@x.com");

        for _ in 0..3 {
            limiter.record_failure(&user).await;
        }

        for expected in [20, 30, 30] {
            let current = match limiter.may_attempt(&user).await {
                Decision::Locked { retry_after } => retry_after,
                Decision::Allowed => panic!("expected an active lockout"),
            };
            tokio::time::advance(current).await;
            assert_eq!(limiter.may_attempt(&user).await, Decision::Allowed);
            assert_eq!(
                limiter.record_failure(&user).await,
                Some(Duration::from_secs(expected))
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failure_while_locked_extends_lockout() {
        let limiter = RateLimiter::new(scenario_policy());
        let user = identity("u@x.com");

        for _ in 0..3 {
            limiter.record_failure(&user).await;
        }
        tokio::time::advance(Duration::from_secs(5)).await;

        assert_eq!(
            limiter.record_failure(&user).await,
            Some(Duration::from_secs(20))
        );
        assert_eq!(limiter.failure_count(&user).await, 4);
        assert_eq!(
            limiter.may_attempt(&user).await,
            Decision::Locked {
                retry_after: Duration::from_secs(20)
            }
        );
    }

    #[tokio::test]
    async fn success_resets_failure_count() {
        let limiter = RateLimiter::new(scenario_policy());
        let user = identity("u@x.com");

        limiter.record_failure(&user).await;
        limiter.record_failure(&user).await;
        limiter.record_success(&user).await;
        assert_eq!(limiter.failure_count(&user).await, 0);

        // Needs a fresh run of three failures to lock again.
        limiter.record_failure(&user).await;
        limiter.record_failure(&user).await;
        assert_eq!(limiter.may_attempt(&user).await, Decision::Allowed);
    }

    #[tokio::test]
    async fn identities_are_isolated() {
        let limiter = RateLimiter::new(scenario_policy());
        let first = identity("user1@example.com");
        let second = identity("user2@example.com");

        for _ in 0..3 {
            limiter.record_failure(&first).await;
        }

        assert!(matches!(
            limiter.may_attempt(&first).await,
            Decision::Locked { .. }
        ));
        assert_eq!(limiter.may_attempt(&second).await, Decision::Allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn purge_stale_keeps_active_lockouts() {
        let limiter = RateLimiter::new(scenario_policy());
        let locked = identity("locked@x.com");
        let idle = identity("idle@x.com");

        limiter.record_failure(&idle).await;
        tokio::time::advance(Duration::from_secs(60)).await;
        for _ in 0..5 {
            limiter.record_failure(&locked).await;
        }

        let removed = limiter.purge_stale(Duration::from_secs(30)).await;
        assert_eq!(removed, 1);
        assert_eq!(limiter.failure_count(&idle).await, 0);
        assert_eq!(limiter.failure_count(&locked).await, 5);
    }

    #[tokio::test]
    async fn attempt_guard_serializes_same_identity() {
        let limiter = Arc::new(RateLimiter::new(scenario_policy()));
        let user = identity("u@x.com");

        let guard = limiter.attempt_guard(&user).await;

        let contender = {
            let limiter = Arc::clone(&limiter);
            let user = user.clone();
            tokio::spawn(async move {
                let _guard = limiter.attempt_guard(&user).await;
            })
        };

        tokio::task::yield_now().await;
        assert!(!contender.is_finished());

        // Other identities are not blocked.
        let _other = limiter.attempt_guard(&identity("v@x.com")).await;

        drop(guard);
        contender.await.unwrap();
    }
}
