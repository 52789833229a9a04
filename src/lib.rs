//! # sessiongate
//!
//! Gates and caches authenticated sessions to a remote service.
//!
//! Three policies sit in front of every remote login:
//! - an allow-list of identities (unknown identities never reach the remote),
//! - a per-identity lockout with exponential backoff after repeated failures,
//! - a session cache keyed by credential fingerprint, with single-flight
//!   logins and lazy expiry.
//!
//! See [`gate::Gate`] for the entry point.

pub mod cli;
pub mod gate;
