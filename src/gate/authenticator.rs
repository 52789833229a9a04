//! Remote login capability consumed by the session cache.
//!
//! The cache never branches on mock mode; it is handed either the
//! `HttpAuthenticator` or the deterministic `MockAuthenticator`.

use anyhow::{Context, Result};
use reqwest::{
    header::{HeaderMap, SET_COOKIE},
    redirect, Client, StatusCode,
};
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, info_span, Instrument};
use url::Url;

use super::error::AuthError;
use super::identity::Identity;

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

pub const DEFAULT_SESSION_COOKIE: &str = "PHPSESSID";

pub type AuthFuture<'a, H> = Pin<Box<dyn Future<Output = Result<H, AuthError>> + Send + 'a>>;

pub trait Authenticator: Send + Sync {
    type Handle: Clone + Send + Sync + 'static;

    /// Log in with the given credentials.
    ///
    /// Implementations enforce their own I/O timeout and report an overrun
    /// as `AuthError::Unavailable`.
    fn authenticate<'a>(
        &'a self,
        identity: &'a Identity,
        secret: &'a SecretString,
    ) -> AuthFuture<'a, Self::Handle>;
}

/// Authenticated session on the remote service.
#[derive(Clone, Debug)]
pub struct RemoteSession {
    identity: Identity,
    session_id: SecretString,
    mock: bool,
}

impl RemoteSession {
    #[must_use]
    pub fn new(identity: Identity, session_id: String, mock: bool) -> Self {
        Self {
            identity,
            session_id: SecretString::from(session_id),
            mock,
        }
    }

    #[must_use]
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    #[must_use]
    pub fn session_id(&self) -> &SecretString {
        &self.session_id
    }

    #[must_use]
    pub fn is_mock(&self) -> bool {
        self.mock
    }

    /// First and last four characters of the session id, e.g. `abcd...wxyz`.
    #[must_use]
    pub fn preview(&self) -> String {
        let chars: Vec<char> = self.session_id.expose_secret().chars().collect();
        if chars.len() <= 8 {
            return "*".repeat(chars.len());
        }
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{head}...{tail}")
    }
}

/// Offline authenticator: accepts every credential pair.
#[derive(Debug, Default)]
pub struct MockAuthenticator {
    calls: AtomicUsize,
}

impl MockAuthenticator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Session id derived from the identity only: `mock-<16 hex>`.
    #[must_use]
    pub fn session_id_for(identity: &Identity) -> String {
        let digest = Sha256::digest(identity.as_str().as_bytes());
        let mut id = String::from("mock-");
        for byte in &digest[..8] {
            let _ = write!(id, "{byte:02x}");
        }
        id
    }
}

impl Authenticator for MockAuthenticator {
    type Handle = RemoteSession;

    fn authenticate<'a>(
        &'a self,
        identity: &'a Identity,
        _secret: &'a SecretString,
    ) -> AuthFuture<'a, RemoteSession> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            debug!(identity = %identity, "mock authentication");
            Ok(RemoteSession::new(
                identity.clone(),
                Self::session_id_for(identity),
                true,
            ))
        })
    }
}

/// Form-less JSON login against the remote service.
///
/// POSTs `{"email", "password"}` to the login URL. A 2xx or 3xx response
/// carrying the session cookie is a success; 401, 403 or a response
/// without the cookie is a rejection; anything else is an outage.
#[derive(Debug, Clone)]
pub struct HttpAuthenticator {
    client: Client,
    login_url: Url,
    cookie_name: String,
}

impl HttpAuthenticator {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(login_url: Url, cookie_name: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(timeout)
            .redirect(redirect::Policy::none())
            .build()
            .context("Error creating reqwest client")?;

        Ok(Self {
            client,
            login_url,
            cookie_name,
        })
    }

    #[must_use]
    pub fn login_url(&self) -> &Url {
        &self.login_url
    }
}

impl Authenticator for HttpAuthenticator {
    type Handle = RemoteSession;

    fn authenticate<'a>(
        &'a self,
        identity: &'a Identity,
        secret: &'a SecretString,
    ) -> AuthFuture<'a, RemoteSession> {
        Box::pin(
            async move {
                let body = json!({
                    "email": identity.as_str(),
                    "password": secret.expose_secret(),
                });

                let response = self
                    .client
                    .post(self.login_url.clone())
                    .json(&body)
                    .send()
                    .await
                    .map_err(|err| AuthError::Unavailable(err.to_string()))?;

                let status = response.status();
                debug!("login response status: {status}");

                if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                    return Err(AuthError::Rejected);
                }
                if !(status.is_success() || status.is_redirection()) {
                    return Err(AuthError::Unavailable(format!(
                        "unexpected login status {status}"
                    )));
                }

                session_cookie(response.headers(), &self.cookie_name)
                    .map(|id| RemoteSession::new(identity.clone(), id, false))
                    .ok_or(AuthError::Rejected)
            }
            .instrument(info_span!("http.login", url = %self.login_url)),
        )
    }
}

/// Value of the named cookie from `Set-Cookie` headers, if non-empty.
pub(crate) fn session_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|cookie| cookie.split(';').next())
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, value)| key.trim() == name && !value.trim().is_empty())
        .map(|(_, value)| value.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn identity(raw: &str) -> Identity {
        Identity::parse(raw).unwrap()
    }

    #[test]
    fn preview_shows_edges_only() {
        let session = RemoteSession::new(identity("u@x.com"), "abcd1234567890wxyz".to_string(), false);
        assert_eq!(session.preview(), "abcd...wxyz");

        let short = RemoteSession::new(identity("u@x.com"), "abc".to_string(), false);
        assert_eq!(short.preview(), "***");
    }

    #[test]
    fn mock_session_id_is_deterministic() {
        let first = MockAuthenticator::session_id_for(&identity("u@x.com"));
        let second = MockAuthenticator::session_id_for(&identity("U@X.com"));
        assert_eq!(first, second);
        assert!(first.starts_with("mock-"));
        assert_eq!(first.len(), "mock-".len() + 16);
    }

    #[tokio::test]
    async fn mock_accepts_and_counts() {
        let mock = MockAuthenticator::new();
        let user = identity("u@x.com");
        let secret = SecretString::from("anything".to_string());

        let session = mock.authenticate(&user, &secret).await.unwrap();
        assert!(session.is_mock());
        assert_eq!(session.identity(), &user);
        assert_eq!(mock.calls(), 1);
    }

    #[test]
    fn session_cookie_picks_named_cookie() {
        let mut headers = HeaderMap::new();
        headers.append(SET_COOKIE, HeaderValue::from_static("lang=en; Path=/"));
        headers.append(
            SET_COOKIE,
            HeaderValue::from_static("PHPSESSID=s3ss10n; Path=/; HttpOnly"),
        );
        assert_eq!(
            session_cookie(&headers, "PHPSESSID"),
            Some("s3ss10n".to_string())
        );
        assert_eq!(session_cookie(&headers, "missing"), None);
    }

    #[test]
    fn session_cookie_ignores_empty_value() {
        let mut headers = HeaderMap::new();
        headers.append(SET_COOKIE, HeaderValue::from_static("PHPSESSID=; Max-Age=0"));
        assert_eq!(session_cookie(&headers, "PHPSESSID"), None);
    }
}
