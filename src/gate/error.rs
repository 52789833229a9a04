use std::time::Duration;
use thiserror::Error;

/// Failure reported by an [`Authenticator`](super::authenticator::Authenticator).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("credentials rejected")]
    Rejected,
    #[error("upstream unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateError {
    #[error("identity is not on the allow-list")]
    NotAllowed,
    #[error("too many failed authentication attempts, try again in {}s", .retry_after.as_secs().max(1))]
    RateLimited { retry_after: Duration },
    #[error("authentication failed")]
    AuthenticationFailed,
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),
}

impl GateError {
    /// Stable label for logs and client responses.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotAllowed => "not_allowed",
            Self::RateLimited { .. } => "rate_limited",
            Self::AuthenticationFailed => "authentication_failed",
            Self::UpstreamUnavailable(_) => "upstream_unavailable",
        }
    }
}

impl From<AuthError> for GateError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Rejected => Self::AuthenticationFailed,
            AuthError::Unavailable(reason) => Self::UpstreamUnavailable(reason),
        }
    }
}
