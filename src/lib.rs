//! Relay-coordinated participant for threshold ECDSA/EdDSA multi-party
//! computation: distributed key generation, signing, share refresh,
//! committee-change resharing, legacy-key migration and offline root-key
//! reconstruction.
//!
//! The crate drives an opaque round-message-passing MPC engine (see
//! [`engine::MpcEngine`]) to completion over a relay-mediated broadcast
//! medium: a session lifecycle against the relay, two concurrent message
//! pumps with deduplication and completion detection, a leader role that
//! constructs and publishes protocol parameters, and offline Lagrange
//! reconstruction of legacy shares.

pub mod common;
pub mod engine;
pub mod error;
pub mod messenger;
pub mod reconstruct;
pub mod relay;
pub mod service;
pub mod session;
pub mod state;
pub mod vault;

pub use error::Error;
pub use service::MpcService;
