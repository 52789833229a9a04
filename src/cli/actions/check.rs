use crate::gate::{Gate, GateConfig, GateError, RemoteSession, RequestContext, Session};
use anyhow::Result;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::net::IpAddr;
use tracing::{debug, info};

#[derive(Debug)]
pub struct Args {
    pub identity: String,
    pub secret: SecretString,
    pub client_addr: Option<IpAddr>,
    pub repeat: u32,
    pub config: GateConfig,
}

/// One line of `check` output.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct CheckReport {
    pub identity: String,
    pub secret_length: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_status: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id_preview: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CheckReport {
    #[must_use]
    pub fn new(
        raw_identity: &str,
        secret: &SecretString,
        result: &Result<Session<RemoteSession>, GateError>,
    ) -> Self {
        let secret_length = secret.expose_secret().chars().count();
        match result {
            Ok(session) => Self {
                identity: session.handle.identity().to_string(),
                secret_length,
                cache_status: Some(session.origin.as_str()),
                session_id_preview: Some(session.handle.preview()),
                error: None,
                message: None,
            },
            Err(err) => Self {
                identity: raw_identity.trim().to_string(),
                secret_length,
                cache_status: None,
                session_id_preview: None,
                error: Some(err.kind()),
                message: Some(err.to_string()),
            },
        }
    }
}

/// Run `repeat` session lookups and print one JSON report per attempt.
/// # Errors
/// Returns an error if the gate cannot be built or the last attempt failed.
pub async fn execute(args: Args) -> Result<()> {
    let gate = Gate::from_config(&args.config)?;
    info!(
        allow_list = gate.allow_list().len(),
        mock = args.config.mock(),
        "gate ready"
    );

    let ctx = args
        .client_addr
        .map_or_else(RequestContext::default, RequestContext::from_addr);

    let sweeper = gate.spawn_sweeper(args.config.sweep_interval());

    let mut last = None;
    for attempt in 1..=args.repeat {
        let result = gate.get_session(&args.identity, &args.secret, ctx).await;
        let report = CheckReport::new(&args.identity, &args.secret, &result);
        debug!(attempt, ok = result.is_ok(), "check attempt complete");
        println!("{}", serde_json::to_string(&report)?);
        last = Some(result);
    }
    sweeper.abort();

    match last {
        Some(Err(err)) => Err(err.into()),
        _ => Ok(()),
    }
}
