//! Distributed key generation and same-committee key refresh.

use log::info;

use crate::common::{encode_committee, threshold, validate_chain_code};
use crate::engine::SessionOutput;
use crate::error::Error;

use super::{require_committee, require_nonempty, MpcService};

impl MpcService {
    /// Run distributed key generation and persist the resulting share.
    /// Returns the hex compressed public key of the new key.
    pub async fn keygen(
        &self,
        session_id: &str,
        chain_code: &str,
        local_party: &str,
        committee: &[String],
        is_leader: bool,
    ) -> Result<String, Error> {
        require_nonempty(session_id, "session id")?;
        require_nonempty(local_party, "local party id")?;
        require_committee(committee, "keygen committee")?;
        validate_chain_code(chain_code)?;

        info!(
            "keygen: session={} party={} committee={:?} leader={}",
            session_id, local_party, committee, is_leader
        );

        let setup = self
            .exchange_setup(session_id, local_party, committee, is_leader, || {
                let committee_bytes = encode_committee(committee)?;
                let t = threshold(committee.len())?;
                info!("{}: threshold is {}", session_id, t + 1);
                Ok(self
                    .engine
                    .keygen_setup((t + 1) as u32, None, &committee_bytes)?)
            })
            .await?;

        let session = self.engine.keygen_session(&setup, local_party)?;
        let output = self.driver(session_id, local_party).run(session).await?;

        match output {
            SessionOutput::Keyshare(keyshare) => {
                let public_key = self.persist_keyshare(&keyshare)?;
                info!("{}: keygen finished, public key {}", session_id, public_key);
                Ok(public_key)
            }
            _ => Err(Error::Validation(
                "keygen session returned no keyshare".to_string(),
            )),
        }
    }

    /// Refresh the shares of an existing key over an unchanged committee.
    /// Parties joining without a share pass an empty `public_key`.
    pub async fn refresh(
        &self,
        session_id: &str,
        public_key: &str,
        local_party: &str,
        committee: &[String],
        is_leader: bool,
    ) -> Result<String, Error> {
        require_nonempty(session_id, "session id")?;
        require_nonempty(local_party, "local party id")?;
        require_committee(committee, "refresh committee")?;

        info!(
            "refresh: session={} party={} public_key={} leader={}",
            session_id, local_party, public_key, is_leader
        );

        let keyshare = if public_key.is_empty() {
            None
        } else {
            Some(self.load_keyshare(public_key)?)
        };
        let key_id = match &keyshare {
            Some(bytes) => Some(self.engine.keyshare_key_id(bytes)?),
            None => None,
        };

        let setup = self
            .exchange_setup(session_id, local_party, committee, is_leader, || {
                let committee_bytes = encode_committee(committee)?;
                let t = threshold(committee.len())?;
                info!("{}: threshold is {}", session_id, t + 1);
                Ok(self.engine.keygen_setup(
                    (t + 1) as u32,
                    key_id.as_deref(),
                    &committee_bytes,
                )?)
            })
            .await?;

        let session = self
            .engine
            .refresh_session(&setup, local_party, keyshare.as_deref())?;
        let output = self.driver(session_id, local_party).run(session).await?;

        match output {
            SessionOutput::Keyshare(keyshare) => {
                let public_key = self.persist_keyshare(&keyshare)?;
                info!("{}: refresh finished, public key {}", session_id, public_key);
                Ok(public_key)
            }
            _ => Err(Error::Validation(
                "refresh session returned no keyshare".to_string(),
            )),
        }
    }
}
