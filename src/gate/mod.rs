//! Allow-listed, rate-limited session gate.
//!
//! Flow Overview:
//! 1) The allow-list rejects unknown identities before any state is touched.
//! 2) The session cache returns a live handle or logs in, consulting the
//!    rate limiter before every remote attempt.
//!
//! The gate is an owned component: build it once and share clones (it is a
//! pair of `Arc`s) with every caller.

pub mod allow_list;
pub mod authenticator;
pub mod config;
pub mod error;
pub mod events;
pub mod failure_log;
pub mod identity;
pub mod rate_limit;
pub mod session;

pub use self::allow_list::AllowList;
pub use self::authenticator::{
    Authenticator, HttpAuthenticator, MockAuthenticator, RemoteSession,
};
pub use self::config::GateConfig;
pub use self::error::{AuthError, GateError};
pub use self::events::{GateEvent, GateObserver, Observers, RequestContext, TracingObserver};
pub use self::identity::{Fingerprint, Identity};
pub use self::rate_limit::{Decision, LockoutPolicy, RateLimiter};
pub use self::session::{Origin, Session, SessionCache};

use anyhow::{Context, Result};
use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use self::config::DEFAULT_FAILURE_RETENTION;
use self::events::ClientAddr;
use self::failure_log::FailureLog;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub sessions: usize,
    pub failure_records: usize,
}

pub struct Gate<H> {
    allow_list: Arc<AllowList>,
    cache: Arc<SessionCache<H>>,
    failure_retention: Duration,
}

impl<H> Clone for Gate<H> {
    fn clone(&self) -> Self {
        Self {
            allow_list: Arc::clone(&self.allow_list),
            cache: Arc::clone(&self.cache),
            failure_retention: self.failure_retention,
        }
    }
}

impl<H: Clone + Send + Sync + 'static> Gate<H> {
    #[must_use]
    pub fn new(allow_list: AllowList, cache: SessionCache<H>) -> Self {
        Self {
            allow_list: Arc::new(allow_list),
            cache: Arc::new(cache),
            failure_retention: DEFAULT_FAILURE_RETENTION,
        }
    }

    #[must_use]
    pub fn with_failure_retention(mut self, retention: Duration) -> Self {
        self.failure_retention = retention;
        self
    }

    #[must_use]
    pub fn allow_list(&self) -> &AllowList {
        &self.allow_list
    }

    #[must_use]
    pub fn cache(&self) -> &SessionCache<H> {
        &self.cache
    }

    #[must_use]
    pub fn limiter(&self) -> &RateLimiter {
        self.cache.limiter()
    }

    /// Check the allow-list, then fetch or create the session.
    ///
    /// # Errors
    /// `NotAllowed` for identities outside the allow-list (nothing else is
    /// consulted), otherwise whatever [`SessionCache::get_session`] returns.
    pub async fn get_session(
        &self,
        raw_identity: &str,
        secret: &SecretString,
        ctx: RequestContext,
    ) -> Result<Session<H>, GateError> {
        let Some(identity) =
            Identity::parse(raw_identity).filter(|identity| self.allow_list.contains(identity))
        else {
            warn!(
                identity = raw_identity.trim(),
                client_addr = %ClientAddr(ctx.client_addr),
                "identity not on the allow-list"
            );
            return Err(GateError::NotAllowed);
        };

        self.cache.get_session(&identity, secret, ctx).await
    }

    /// Drop expired sessions and stale failure records.
    pub async fn sweep(&self) -> SweepReport {
        SweepReport {
            sessions: self.cache.purge_expired().await,
            failure_records: self.cache.limiter().purge_stale(self.failure_retention).await,
        }
    }

    /// Run [`Gate::sweep`] every `every` until the task is aborted.
    pub fn spawn_sweeper(&self, every: Duration) -> JoinHandle<()> {
        let gate = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // First tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let report = gate.sweep().await;
                debug!(
                    sessions = report.sessions,
                    failure_records = report.failure_records,
                    "sweep complete"
                );
            }
        })
    }
}

impl Gate<RemoteSession> {
    /// Wire the gate from configuration.
    ///
    /// Mock mode swaps in [`MockAuthenticator`]; otherwise a login URL is
    /// required for [`HttpAuthenticator`]. An unreadable allow-list denies
    /// everyone. A failure log that cannot be opened is reported and skipped.
    ///
    /// # Errors
    /// Returns an error for an invalid lockout policy, a missing login URL
    /// outside mock mode, or an HTTP client that cannot be built.
    pub fn from_config(config: &GateConfig) -> Result<Self> {
        config.lockout().validate()?;

        let allow_list_path =
            AllowList::resolve_path(config.allow_list_path().map(std::path::Path::to_path_buf));
        let allow_list = AllowList::load_or_deny_all(&allow_list_path);

        let authenticator: Arc<dyn Authenticator<Handle = RemoteSession>> = if config.mock() {
            info!("mock mode enabled, remote logins are simulated");
            Arc::new(MockAuthenticator::new())
        } else {
            let login_url = config
                .login_url()
                .cloned()
                .context("a login URL is required unless mock mode is enabled")?;
            Arc::new(HttpAuthenticator::new(
                login_url,
                config.session_cookie().to_string(),
                config.auth_timeout(),
            )?)
        };

        let mut observers = Observers::new().with(Arc::new(TracingObserver));
        if let Some(path) = config.failure_log_path() {
            match FailureLog::open(path) {
                Ok(log) => observers.push(Arc::new(log)),
                Err(err) => warn!("{err:#}"),
            }
        }

        let limiter = Arc::new(RateLimiter::new(*config.lockout()));
        let cache = SessionCache::new(authenticator, limiter, config.eviction_horizon())
            .with_observers(observers);

        Ok(Self::new(allow_list, cache).with_failure_retention(config.failure_retention()))
    }
}
