use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use super::authenticator::DEFAULT_SESSION_COOKIE;
use super::rate_limit::LockoutPolicy;
use super::session::DEFAULT_EVICTION_HORIZON;

pub(crate) const DEFAULT_FAILURE_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);
const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug)]
pub struct GateConfig {
    eviction_horizon: Duration,
    lockout: LockoutPolicy,
    failure_retention: Duration,
    sweep_interval: Duration,
    mock: bool,
    allow_list_path: Option<PathBuf>,
    failure_log_path: Option<PathBuf>,
    login_url: Option<Url>,
    session_cookie: String,
    auth_timeout: Duration,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl GateConfig {
    /// Defaults: 12h eviction horizon, lock after 3 failures for 10s
    /// doubling up to 30s, real authenticator.
    #[must_use]
    pub fn new() -> Self {
        Self {
            eviction_horizon: DEFAULT_EVICTION_HORIZON,
            lockout: LockoutPolicy::new(),
            failure_retention: DEFAULT_FAILURE_RETENTION,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            mock: false,
            allow_list_path: None,
            failure_log_path: None,
            login_url: None,
            session_cookie: DEFAULT_SESSION_COOKIE.to_string(),
            auth_timeout: DEFAULT_AUTH_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_eviction_horizon(mut self, horizon: Duration) -> Self {
        self.eviction_horizon = horizon;
        self
    }

    #[must_use]
    pub fn with_lockout(mut self, lockout: LockoutPolicy) -> Self {
        self.lockout = lockout;
        self
    }

    #[must_use]
    pub fn with_failure_retention(mut self, retention: Duration) -> Self {
        self.failure_retention = retention;
        self
    }

    #[must_use]
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    #[must_use]
    pub fn with_mock(mut self, mock: bool) -> Self {
        self.mock = mock;
        self
    }

    #[must_use]
    pub fn with_allow_list_path(mut self, path: PathBuf) -> Self {
        self.allow_list_path = Some(path);
        self
    }

    #[must_use]
    pub fn with_failure_log_path(mut self, path: PathBuf) -> Self {
        self.failure_log_path = Some(path);
        self
    }

    #[must_use]
    pub fn with_login_url(mut self, url: Url) -> Self {
        self.login_url = Some(url);
        self
    }

    #[must_use]
    pub fn with_session_cookie(mut self, name: String) -> Self {
        self.session_cookie = name;
        self
    }

    #[must_use]
    pub fn with_auth_timeout(mut self, timeout: Duration) -> Self {
        self.auth_timeout = timeout;
        self
    }

    #[must_use]
    pub fn eviction_horizon(&self) -> Duration {
        self.eviction_horizon
    }

    #[must_use]
    pub fn lockout(&self) -> &LockoutPolicy {
        &self.lockout
    }

    #[must_use]
    pub fn failure_retention(&self) -> Duration {
        self.failure_retention
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }

    #[must_use]
    pub fn mock(&self) -> bool {
        self.mock
    }

    #[must_use]
    pub fn allow_list_path(&self) -> Option<&Path> {
        self.allow_list_path.as_deref()
    }

    #[must_use]
    pub fn failure_log_path(&self) -> Option<&Path> {
        self.failure_log_path.as_deref()
    }

    #[must_use]
    pub fn login_url(&self) -> Option<&Url> {
        self.login_url.as_ref()
    }

    #[must_use]
    pub fn session_cookie(&self) -> &str {
        &self.session_cookie
    }

    #[must_use]
    pub fn auth_timeout(&self) -> Duration {
        self.auth_timeout
    }
}
