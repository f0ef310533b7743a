//! Protocol orchestrator.
//!
//! Every protocol mode follows the same skeleton: validate, register with
//! the relay, reach the setup exchange (leader builds and publishes the
//! setup message, followers download it), construct an engine session,
//! and hand it to the session driver. The mode-specific pieces are the
//! setup builder and the session constructor; they live in the per-mode
//! submodules.

mod keygen;
mod keysign;
mod migrate;
mod reshare;

pub use keysign::SignOutcome;
pub use reshare::{merge_committees, CommitteeChange};

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use log::info;

use crate::engine::MpcEngine;
use crate::error::Error;
use crate::relay::RelayClient;
use crate::session::{SessionDriver, DEFAULT_TIMEOUT};
use crate::state::LocalStateStore;

pub struct MpcService {
    relay: RelayClient,
    engine: Arc<dyn MpcEngine>,
    state: Arc<dyn LocalStateStore>,
    timeout: Duration,
}

impl MpcService {
    pub fn new(server: &str, engine: Arc<dyn MpcEngine>, state: Arc<dyn LocalStateStore>) -> Self {
        Self {
            relay: RelayClient::new(server),
            engine,
            state,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Override the driver's completion deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn driver(&self, session_id: &str, local_party: &str) -> SessionDriver {
        SessionDriver::new(self.relay.clone(), session_id, local_party)
            .with_timeout(self.timeout)
    }

    /// Register, reach the barrier and agree on the setup message.
    ///
    /// The leader waits until the whole committee has registered, builds
    /// the setup through `build`, publishes it and starts the session;
    /// followers wait for the start signal and download the same bytes.
    /// Returns the decoded setup message.
    async fn exchange_setup(
        &self,
        session_id: &str,
        local_party: &str,
        committee: &[String],
        is_leader: bool,
        build: impl FnOnce() -> Result<Vec<u8>, Error>,
    ) -> Result<Vec<u8>, Error> {
        self.relay.register_session(session_id, local_party).await?;

        let encoded = if is_leader {
            self.relay.wait_all_parties(session_id, committee).await?;
            info!("{}: committee complete, publishing setup message", session_id);

            let setup = build()?;
            let encoded = BASE64.encode(&setup);
            self.relay.upload_setup(session_id, &encoded).await?;
            self.relay.start_session(session_id, committee).await?;
            encoded
        } else {
            self.relay.wait_for_start(session_id).await?;
            self.relay.fetch_setup(session_id).await?
        };

        BASE64
            .decode(encoded.trim().as_bytes())
            .map_err(|e| Error::Validation(format!("setup message is not base64: {}", e)))
    }

    /// Load and decode the persisted share for a public key.
    fn load_keyshare(&self, public_key: &str) -> Result<Vec<u8>, Error> {
        let encoded = self.state.get(public_key)?;
        BASE64
            .decode(encoded.trim().as_bytes())
            .map_err(|e| Error::Persistence(format!("stored share is not base64: {}", e)))
    }

    /// Persist a freshly produced share, keyed by its hex public key.
    fn persist_keyshare(&self, keyshare: &[u8]) -> Result<String, Error> {
        let public_key = hex::encode(self.engine.keyshare_public_key(keyshare)?);
        self.state.save(&public_key, &BASE64.encode(keyshare))?;
        Ok(public_key)
    }
}

fn require_nonempty(value: &str, what: &str) -> Result<(), Error> {
    if value.is_empty() {
        return Err(Error::Validation(format!("{} is empty", what)));
    }
    Ok(())
}

fn require_committee(committee: &[String], what: &str) -> Result<(), Error> {
    if committee.is_empty() {
        return Err(Error::Validation(format!("{} is empty", what)));
    }
    if committee.iter().any(|p| p.is_empty()) {
        return Err(Error::Validation(format!("{} has an empty member", what)));
    }
    Ok(())
}
