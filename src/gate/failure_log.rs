//! Append-only authentication failure log for fail2ban style tooling.
//!
//! Line format:
//! `2024-05-01 12:00:00: sessiongate-auth: FAILED for user [u@x.com] from IP [10.0.0.7]`

use anyhow::{Context, Result};
use chrono::Local;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{error, info};

use super::events::{ClientAddr, GateEvent, GateObserver};

const LOG_TAG: &str = "sessiongate-auth";

#[derive(Debug)]
pub struct FailureLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl FailureLog {
    /// Open (or create) the log file, creating parent directories.
    ///
    /// # Errors
    /// Returns an error if the directory or file cannot be created.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open failure log at {}", path.display()))?;

        info!(path = %path.display(), "failure log configured");

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, line: &str) {
        let Ok(mut file) = self.file.lock() else {
            error!("failure log mutex poisoned");
            return;
        };
        if let Err(err) = writeln!(file, "{line}") {
            error!("Failed to write failure log {}: {err}", self.path.display());
        }
    }
}

pub(crate) fn format_failure(identity: &str, addr: ClientAddr, timestamp: &str) -> String {
    format!("{timestamp}: {LOG_TAG}: FAILED for user [{identity}] from IP [{addr}]")
}

impl GateObserver for FailureLog {
    fn on_event(&self, event: &GateEvent) {
        if let GateEvent::AuthFailed {
            identity,
            client_addr,
            ..
        } = event
        {
            let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
            self.append(&format_failure(
                identity.as_str(),
                ClientAddr(*client_addr),
                &timestamp,
            ));
        }
    }
}
