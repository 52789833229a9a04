//! Session cache keyed by credential fingerprint.
//!
//! Flow Overview:
//! 1) Derive the fingerprint and take that fingerprint's slot lock.
//! 2) A live entry is a hit; an entry older than the eviction horizon is
//!    dropped on the spot and treated as a miss.
//! 3) On a miss, take the identity's attempt guard, ask the rate limiter,
//!    call the authenticator and record the outcome.
//! 4) Only successful logins are stored.
//!
//! The slot lock is held across the remote call, so at most one login per
//! fingerprint is in flight; callers queued on the same slot see the stored
//! handle as a cache hit. The map lock itself is only held to look up or
//! create a slot, which keeps different fingerprints fully parallel.
//! Locks are always taken slot first, then attempt guard.

use secrecy::SecretString;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, instrument};

use super::authenticator::Authenticator;
use super::error::{AuthError, GateError};
use super::events::{FailureKind, GateEvent, Observers, RequestContext};
use super::identity::{Fingerprint, Identity};
use super::rate_limit::{Decision, RateLimiter};

pub const DEFAULT_EVICTION_HORIZON: Duration = Duration::from_secs(12 * 60 * 60);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Origin {
    FromCache,
    NewlyCreated,
}

impl Origin {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FromCache => "session_from_cache",
            Self::NewlyCreated => "new_session_created",
        }
    }
}

#[derive(Clone, Debug)]
pub struct Session<H> {
    pub handle: H,
    pub origin: Origin,
}

#[derive(Clone, Debug)]
pub struct SessionEntry<H> {
    pub fingerprint: Fingerprint,
    pub handle: H,
    pub created_at: Instant,
    pub last_used_at: Instant,
}

impl<H> SessionEntry<H> {
    fn new(fingerprint: Fingerprint, handle: H, now: Instant) -> Self {
        Self {
            fingerprint,
            handle,
            created_at: now,
            last_used_at: now,
        }
    }

    /// Age is measured from creation; use does not extend it.
    #[must_use]
    pub fn is_expired(&self, now: Instant, horizon: Duration) -> bool {
        now.duration_since(self.created_at) > horizon
    }
}

type Slot<H> = Mutex<Option<SessionEntry<H>>>;

pub struct SessionCache<H> {
    authenticator: Arc<dyn Authenticator<Handle = H>>,
    limiter: Arc<RateLimiter>,
    observers: Observers,
    eviction_horizon: Duration,
    slots: Mutex<HashMap<Fingerprint, Arc<Slot<H>>>>,
}

impl<H: Clone + Send + Sync + 'static> SessionCache<H> {
    #[must_use]
    pub fn new(
        authenticator: Arc<dyn Authenticator<Handle = H>>,
        limiter: Arc<RateLimiter>,
        eviction_horizon: Duration,
    ) -> Self {
        Self {
            authenticator,
            limiter,
            observers: Observers::new(),
            eviction_horizon,
            slots: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_observers(mut self, observers: Observers) -> Self {
        self.observers = observers;
        self
    }

    #[must_use]
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    #[must_use]
    pub fn eviction_horizon(&self) -> Duration {
        self.eviction_horizon
    }

    /// Return a live session for the credentials, logging in on a miss.
    ///
    /// # Errors
    /// `RateLimited` while the identity is locked out (the authenticator is
    /// not contacted), `AuthenticationFailed` or `UpstreamUnavailable` when
    /// the login fails. Every failed login is counted once.
    #[instrument(skip_all, fields(identity = %identity))]
    pub async fn get_session(
        &self,
        identity: &Identity,
        secret: &SecretString,
        ctx: RequestContext,
    ) -> Result<Session<H>, GateError> {
        let fingerprint = Fingerprint::derive(identity, secret);
        let slot = self.slot(fingerprint).await;
        let mut entry = slot.lock().await;
        let now = Instant::now();

        if entry
            .as_ref()
            .is_some_and(|current| current.is_expired(now, self.eviction_horizon))
        {
            debug!(fingerprint = %fingerprint, "evicting expired session");
            *entry = None;
        }

        if let Some(current) = entry.as_mut() {
            current.last_used_at = now;
            self.observers.emit(&GateEvent::CacheHit {
                identity: identity.clone(),
            });
            return Ok(Session {
                handle: current.handle.clone(),
                origin: Origin::FromCache,
            });
        }

        self.observers.emit(&GateEvent::CacheMiss {
            identity: identity.clone(),
        });

        match self.login(identity, secret, ctx).await {
            Ok(handle) => {
                *entry = Some(SessionEntry::new(fingerprint, handle.clone(), Instant::now()));
                Ok(Session {
                    handle,
                    origin: Origin::NewlyCreated,
                })
            }
            Err(err) => {
                drop(entry);
                self.release(fingerprint, &slot).await;
                Err(err)
            }
        }
    }

    async fn login(
        &self,
        identity: &Identity,
        secret: &SecretString,
        ctx: RequestContext,
    ) -> Result<H, GateError> {
        let _attempt = self.limiter.attempt_guard(identity).await;

        if let Decision::Locked { retry_after } = self.limiter.may_attempt(identity).await {
            debug!(
                retry_after_secs = retry_after.as_secs(),
                "login refused during lockout"
            );
            return Err(GateError::RateLimited { retry_after });
        }

        match self.authenticator.authenticate(identity, secret).await {
            Ok(handle) => {
                self.limiter.record_success(identity).await;
                self.observers.emit(&GateEvent::AuthSucceeded {
                    identity: identity.clone(),
                });
                Ok(handle)
            }
            Err(err) => {
                let kind = match &err {
                    AuthError::Rejected => FailureKind::Rejected,
                    AuthError::Unavailable(reason) => {
                        error!("Authentication error for '{identity}': {reason}");
                        FailureKind::Upstream
                    }
                };
                self.observers.emit(&GateEvent::AuthFailed {
                    identity: identity.clone(),
                    client_addr: ctx.client_addr,
                    kind,
                });

                if let Some(duration) = self.limiter.record_failure(identity).await {
                    let failures = self.limiter.failure_count(identity).await;
                    self.observers.emit(&GateEvent::LockoutEngaged {
                        identity: identity.clone(),
                        failures,
                        duration,
                    });
                }

                Err(err.into())
            }
        }
    }

    async fn slot(&self, fingerprint: Fingerprint) -> Arc<Slot<H>> {
        let mut slots = self.slots.lock().await;
        Arc::clone(slots.entry(fingerprint).or_default())
    }

    // Drop an empty slot nobody else holds. Slots are only cloned under the
    // map lock, so the strong count cannot grow while we hold it.
    async fn release(&self, fingerprint: Fingerprint, slot: &Arc<Slot<H>>) {
        let mut slots = self.slots.lock().await;
        let is_current = slots
            .get(&fingerprint)
            .is_some_and(|current| Arc::ptr_eq(current, slot));
        if !is_current || Arc::strong_count(slot) > 2 {
            return;
        }
        let empty = slot.try_lock().is_ok_and(|entry| entry.is_none());
        if empty {
            slots.remove(&fingerprint);
        }
    }

    /// Drop the entry for these credentials, e.g. when the remote side
    /// reports the session as dead. Returns whether an entry was removed.
    pub async fn invalidate(&self, identity: &Identity, secret: &SecretString) -> bool {
        let fingerprint = Fingerprint::derive(identity, secret);
        let slot = {
            let slots = self.slots.lock().await;
            match slots.get(&fingerprint) {
                Some(slot) => Arc::clone(slot),
                None => return false,
            }
        };
        let removed = slot.lock().await.take().is_some();
        self.release(fingerprint, &slot).await;
        removed
    }

    /// Remove expired entries and idle empty slots. Slots with a login in
    /// flight or queued callers are left alone.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let horizon = self.eviction_horizon;
        let mut slots = self.slots.lock().await;
        let before = slots.len();
        slots.retain(|_, slot| {
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            match slot.try_lock() {
                Ok(entry) => entry
                    .as_ref()
                    .is_some_and(|current| !current.is_expired(now, horizon)),
                Err(_) => true,
            }
        });
        before - slots.len()
    }

    /// Number of live, unexpired entries not currently being refreshed.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let slots = self.slots.lock().await;
        slots
            .values()
            .filter(|slot| {
                slot.try_lock().is_ok_and(|entry| {
                    entry
                        .as_ref()
                        .is_some_and(|current| !current.is_expired(now, self.eviction_horizon))
                })
            })
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
