//! Observability hooks emitted by the session cache.

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::identity::Identity;

/// Per-request data supplied by the caller.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub client_addr: Option<IpAddr>,
}

impl RequestContext {
    #[must_use]
    pub fn from_addr(addr: IpAddr) -> Self {
        Self {
            client_addr: Some(addr),
        }
    }
}

/// Displays the caller address, or `unknown`.
#[derive(Clone, Copy, Debug)]
pub struct ClientAddr(pub Option<IpAddr>);

impl fmt::Display for ClientAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(addr) => write!(f, "{addr}"),
            None => f.write_str("unknown"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    Rejected,
    Upstream,
}

impl FailureKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rejected => "rejected",
            Self::Upstream => "upstream",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GateEvent {
    CacheHit {
        identity: Identity,
    },
    CacheMiss {
        identity: Identity,
    },
    AuthSucceeded {
        identity: Identity,
    },
    AuthFailed {
        identity: Identity,
        client_addr: Option<IpAddr>,
        kind: FailureKind,
    },
    LockoutEngaged {
        identity: Identity,
        failures: u32,
        duration: Duration,
    },
}

pub trait GateObserver: Send + Sync {
    fn on_event(&self, event: &GateEvent);
}

/// Fan-out to every registered observer.
#[derive(Clone, Default)]
pub struct Observers {
    observers: Vec<Arc<dyn GateObserver>>,
}

impl Observers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, observer: Arc<dyn GateObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn push(&mut self, observer: Arc<dyn GateObserver>) {
        self.observers.push(observer);
    }

    pub fn emit(&self, event: &GateEvent) {
        for observer in &self.observers {
            observer.on_event(event);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.observers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl fmt::Debug for Observers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observers")
            .field("len", &self.observers.len())
            .finish()
    }
}

/// Structured log records for every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingObserver;

impl GateObserver for TracingObserver {
    fn on_event(&self, event: &GateEvent) {
        match event {
            GateEvent::CacheHit { identity } => debug!(identity = %identity, "session cache hit"),
            GateEvent::CacheMiss { identity } => debug!(identity = %identity, "session cache miss"),
            GateEvent::AuthSucceeded { identity } => {
                info!(identity = %identity, "authentication successful");
            }
            GateEvent::AuthFailed {
                identity,
                client_addr,
                kind,
            } => warn!(
                identity = %identity,
                client_addr = %ClientAddr(*client_addr),
                kind = kind.as_str(),
                "authentication failed"
            ),
            GateEvent::LockoutEngaged {
                identity,
                failures,
                duration,
            } => warn!(
                identity = %identity,
                failures,
                lockout_secs = duration.as_secs(),
                "identity locked out"
            ),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::{GateEvent, GateObserver};
    use std::sync::Mutex;

    /// Records events for assertions.
    #[derive(Debug, Default)]
    pub(crate) struct RecordingObserver {
        events: Mutex<Vec<GateEvent>>,
    }

    impl RecordingObserver {
        pub(crate) fn events(&self) -> Vec<GateEvent> {
            self.events.lock().map(|e| e.clone()).unwrap_or_default()
        }
    }

    impl GateObserver for RecordingObserver {
        fn on_event(&self, event: &GateEvent) {
            if let Ok(mut events) = self.events.lock() {
                events.push(event.clone());
            }
        }
    }
}
