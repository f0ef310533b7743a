//! Facade over the MPC engine.
//!
//! The engine is an external, handle-based facility; this module pins down
//! the contract the rest of the crate programs against. One engine variant
//! exists per curve, selected once per protocol run, and every subsequent
//! call site stays polymorphic over the trait objects.
//!
//! Handle discipline maps onto ownership: a protocol session is an owned
//! [`EngineSession`] released on drop, so every exit path (success, error,
//! timeout) frees it exactly once. Key shares cross the facade as opaque
//! byte strings, the same bytes that are persisted base64-encoded.

pub mod sim;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Curve {
    Ecdsa,
    Eddsa,
}

impl Curve {
    pub fn from_eddsa_flag(eddsa: bool) -> Self {
        if eddsa {
            Curve::Eddsa
        } else {
            Curve::Ecdsa
        }
    }
}

impl std::fmt::Display for Curve {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Curve::Ecdsa => write!(f, "ecdsa"),
            Curve::Eddsa => write!(f, "eddsa"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The engine refused the operation (bad message, wrong key share,
    /// protocol abort).
    #[error("engine rejected the operation: {0}")]
    Rejected(String),

    /// Bytes handed to the engine do not decode as the expected structure.
    #[error("malformed engine payload: {0}")]
    Malformed(String),
}

/// What a finished session hands back.
#[derive(Debug)]
pub enum SessionOutput {
    /// Keygen, refresh, reshare and migrate produce an opaque key share.
    Keyshare(Vec<u8>),
    /// Signing produces raw signature bytes (65 for ECDSA `r||s||v`,
    /// 64 for EdDSA).
    Signature(Vec<u8>),
    /// Root-key export produces the reconstructed secret scalar.
    Secret(Vec<u8>),
}

/// A live protocol session. Exclusively owned by the driver for the
/// lifetime of one run; dropping it releases the underlying resources.
pub trait EngineSession: Send {
    /// Non-blocking poll for the next outbound message. `None` means the
    /// engine has nothing to say right now.
    fn output_message(&mut self) -> Result<Option<Vec<u8>>, EngineError>;

    /// Receiver party for `message` at slot `index`. Enumerated from zero
    /// until `None`; no receivers exist at or beyond the first empty slot.
    fn message_receiver(
        &mut self,
        message: &[u8],
        index: usize,
    ) -> Result<Option<String>, EngineError>;

    /// Feed one inbound message. Returns `true` once the protocol has
    /// completed and [`EngineSession::finish`] may be called.
    fn input_message(&mut self, message: &[u8]) -> Result<bool, EngineError>;

    /// Consume the session and extract its result. Errors here are fatal
    /// for the run.
    fn finish(self: Box<Self>) -> Result<SessionOutput, EngineError>;
}

/// One engine variant (ECDSA or EdDSA). Selected once per run; all
/// sessions and key shares within the run go through the same variant.
pub trait MpcEngine: Send + Sync {
    fn curve(&self) -> Curve;

    /// Build a keygen (or key-refresh) setup message. `participants` is
    /// `t + 1`; `key_id` links a refresh to the share being refreshed and
    /// is absent for fresh keygen. Leader only.
    fn keygen_setup(
        &self,
        participants: u32,
        key_id: Option<&[u8]>,
        committee: &[u8],
    ) -> Result<Vec<u8>, EngineError>;

    fn keygen_session(
        &self,
        setup: &[u8],
        local_party: &str,
    ) -> Result<Box<dyn EngineSession>, EngineError>;

    /// Build a signing setup message embedding the digest to sign.
    /// Leader only.
    fn sign_setup(
        &self,
        key_id: &[u8],
        derive_path: &[u8],
        digest: &[u8],
        committee: &[u8],
    ) -> Result<Vec<u8>, EngineError>;

    fn sign_session(
        &self,
        setup: &[u8],
        local_party: &str,
        keyshare: &[u8],
    ) -> Result<Box<dyn EngineSession>, EngineError>;

    /// Extract the digest embedded in a signing setup message, so a
    /// follower can check it against its own digest before creating a
    /// session.
    fn decode_sign_digest(&self, setup: &[u8]) -> Result<Vec<u8>, EngineError>;

    /// Key refresh over an unchanged committee. Parties joining without an
    /// existing share pass `None`.
    fn refresh_session(
        &self,
        setup: &[u8],
        local_party: &str,
        keyshare: Option<&[u8]>,
    ) -> Result<Box<dyn EngineSession>, EngineError>;

    /// Migration of a legacy Lagrange-combined secret into an engine
    /// share. `legacy_secret` is the party's `ui` contribution, already in
    /// the curve-native byte order.
    fn migrate_session(
        &self,
        setup: &[u8],
        local_party: &str,
        public_key: &[u8],
        chain_code: &[u8; 32],
        legacy_secret: &[u8],
    ) -> Result<Box<dyn EngineSession>, EngineError>;

    /// Build a committee-change (Qc) reshare setup. `old_indices` and
    /// `new_indices` are positions within `committee`, which is the merged
    /// old/new roster. Leader only, and the leader must hold a share.
    fn qc_setup(
        &self,
        keyshare: &[u8],
        participants: u32,
        old_indices: &[u32],
        new_indices: &[u32],
        committee: &[u8],
    ) -> Result<Vec<u8>, EngineError>;

    fn qc_session(
        &self,
        setup: &[u8],
        local_party: &str,
        keyshare: Option<&[u8]>,
    ) -> Result<Box<dyn EngineSession>, EngineError>;

    /// Start a root-key export with this party as the receiver. Returns
    /// the receiver session plus the setup message the other holders need.
    fn export_session(
        &self,
        keyshare: &[u8],
    ) -> Result<(Box<dyn EngineSession>, Vec<u8>), EngineError>;

    /// Produce one holder's exporter message for the receiver's setup.
    fn exporter_message(&self, keyshare: &[u8], setup: &[u8]) -> Result<Vec<u8>, EngineError>;

    /// Compressed public key carried by a key share.
    fn keyshare_public_key(&self, keyshare: &[u8]) -> Result<Vec<u8>, EngineError>;

    /// Opaque key identifier linking signing setups to the share they
    /// must be used with.
    fn keyshare_key_id(&self, keyshare: &[u8]) -> Result<Vec<u8>, EngineError>;
}
