use crate::cli::actions::{check::Args, Action};
use crate::gate::{GateConfig, LockoutPolicy};
use anyhow::{Context, Result};
use secrecy::SecretString;
use std::{net::IpAddr, path::PathBuf, time::Duration};
use url::Url;

fn seconds(matches: &clap::ArgMatches, name: &str) -> Option<Duration> {
    matches
        .get_one::<u64>(name)
        .copied()
        .map(Duration::from_secs)
}

/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let identity = matches
        .get_one::<String>("identity")
        .cloned()
        .context("missing required argument: --identity")?;
    let secret = matches
        .get_one::<String>("secret")
        .cloned()
        .map(SecretString::from)
        .context("missing required argument: --secret")?;

    Ok(Action::Check(Args {
        identity,
        secret,
        client_addr: matches.get_one::<IpAddr>("client-addr").copied(),
        repeat: matches.get_one::<u32>("repeat").copied().unwrap_or(1),
        config: gate_config(matches)?,
    }))
}

/// # Errors
/// Returns an error if the login URL does not parse or the lockout policy is
/// invalid.
pub fn gate_config(matches: &clap::ArgMatches) -> Result<GateConfig> {
    let mut lockout = LockoutPolicy::new();
    if let Some(threshold) = matches.get_one::<u32>("failure-threshold").copied() {
        lockout = lockout.with_threshold(threshold);
    }
    if let Some(initial) = seconds(matches, "initial-lockout") {
        lockout = lockout.with_initial_lockout(initial);
    }
    if let Some(max) = seconds(matches, "max-lockout") {
        lockout = lockout.with_max_lockout(max);
    }
    lockout.validate()?;

    let mut config = GateConfig::new()
        .with_lockout(lockout)
        .with_mock(matches.get_flag("mock"));

    if let Some(horizon) = seconds(matches, "eviction-horizon") {
        config = config.with_eviction_horizon(horizon);
    }
    if let Some(retention) = seconds(matches, "failure-retention") {
        config = config.with_failure_retention(retention);
    }
    if let Some(timeout) = seconds(matches, "auth-timeout") {
        config = config.with_auth_timeout(timeout);
    }
    if let Some(path) = matches.get_one::<PathBuf>("allow-list") {
        config = config.with_allow_list_path(path.clone());
    }
    if let Some(path) = matches.get_one::<PathBuf>("failure-log") {
        config = config.with_failure_log_path(path.clone());
    }
    if let Some(cookie) = matches.get_one::<String>("session-cookie") {
        config = config.with_session_cookie(cookie.clone());
    }
    if let Some(url) = matches.get_one::<String>("login-url") {
        let url = Url::parse(url).with_context(|| format!("invalid login URL: {url}"))?;
        config = config.with_login_url(url);
    }

    Ok(config)
}
