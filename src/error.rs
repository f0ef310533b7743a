//! Error taxonomy for a protocol run.
//!
//! Transient failures inside the message pumps (relay hiccups, one bad
//! message) are logged and skipped at the call site; everything surfaced
//! through this type is fatal for the run.

use std::time::Duration;

use crate::engine::EngineError;
use crate::relay::RelayError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No protocol progress within the driver deadline.
    #[error("protocol made no progress within {0:?}")]
    Timeout(Duration),

    /// Missing or malformed caller input, a setup-message digest mismatch,
    /// or a signature that fails local shape checks.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Rejection from the MPC engine on a fatal path (session
    /// construction, finish, setup building).
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// HTTP failure on a critical relay path (register, start, setup
    /// upload/download).
    #[error(transparent)]
    Relay(#[from] RelayError),

    /// Failure to read a vault or read/write a local key share.
    #[error("persistence failed: {0}")]
    Persistence(String),

    /// The vault does not carry the share material the caller asked for.
    #[error("reconstruction failed: {0}")]
    Reconstruction(String),
}
