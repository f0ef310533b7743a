//! Migration of a legacy vault key into an engine share.
//!
//! Each committee member extracts its Lagrange-adjusted legacy secret
//! from its vault and contributes it to a migration session; the engine
//! re-shares the combined key without it ever being assembled. The
//! migrated key must keep the vault's public key.

use log::{info, warn};

use crate::common::{encode_committee, threshold, validate_chain_code};
use crate::engine::SessionOutput;
use crate::error::Error;
use crate::reconstruct::legacy_secret;
use crate::vault::Vault;

use super::{require_committee, require_nonempty, MpcService};

impl MpcService {
    /// Migrate the vault's key for this engine's curve. The local party
    /// identity comes from the vault. Returns the hex public key, which
    /// is unchanged by the migration.
    pub async fn migrate(
        &self,
        session_id: &str,
        vault: &Vault,
        committee: &[String],
        is_leader: bool,
    ) -> Result<String, Error> {
        require_nonempty(session_id, "session id")?;
        require_committee(committee, "migration committee")?;

        let curve = self.engine.curve();
        let local_party = vault.local_party_id.clone();
        require_nonempty(&local_party, "vault local party id")?;

        let public_key_hex = vault.public_key(curve).to_string();
        require_nonempty(&public_key_hex, "vault public key")?;
        let public_key = hex::decode(&public_key_hex)
            .map_err(|e| Error::Validation(format!("vault public key is not hex: {}", e)))?;
        let chain_code = validate_chain_code(&vault.hex_chain_code)?;

        info!(
            "migrate: session={} party={} public_key={} committee={:?} leader={}",
            session_id, local_party, public_key_hex, committee, is_leader
        );

        // The legacy secret stays in scope only as long as the session
        // constructor needs it and is wiped when dropped.
        let ui = legacy_secret(vault, curve)?;

        let setup = self
            .exchange_setup(session_id, &local_party, committee, is_leader, || {
                let committee_bytes = encode_committee(committee)?;
                let t = threshold(committee.len())?;
                info!("{}: threshold is {}", session_id, t + 1);
                Ok(self
                    .engine
                    .keygen_setup((t + 1) as u32, None, &committee_bytes)?)
            })
            .await?;

        let session =
            self.engine
                .migrate_session(&setup, &local_party, &public_key, &chain_code, &ui)?;
        drop(ui);

        let output = self.driver(session_id, &local_party).run(session).await?;
        match output {
            SessionOutput::Keyshare(keyshare) => {
                let migrated = self.persist_keyshare(&keyshare)?;
                if migrated != public_key_hex {
                    warn!(
                        "{}: migrated public key {} differs from vault key {}",
                        session_id, migrated, public_key_hex
                    );
                }
                info!("{}: migration finished, public key {}", session_id, migrated);
                Ok(migrated)
            }
            _ => Err(Error::Validation(
                "migration session returned no keyshare".to_string(),
            )),
        }
    }
}
