//! Threshold signing.

use log::{error, info, warn};

use crate::common::{encode_committee, sha256};
use crate::engine::{Curve, SessionOutput};
use crate::error::Error;

use super::{require_committee, require_nonempty, MpcService};

/// Outcome of a signing run: the raw signature bytes plus the local
/// verification verdict. A failed verification is reported but does not
/// invalidate the bytes the engine returned.
#[derive(Debug)]
pub struct SignOutcome {
    pub signature: Vec<u8>,
    pub verified: bool,
}

impl MpcService {
    /// Sign `message` with the share persisted for `public_key`, together
    /// with the committee named in `signing_committee` (the `t + 1`
    /// participants of this run).
    pub async fn keysign(
        &self,
        session_id: &str,
        public_key: &str,
        message: &str,
        derive_path: &str,
        local_party: &str,
        signing_committee: &[String],
        is_leader: bool,
    ) -> Result<SignOutcome, Error> {
        require_nonempty(session_id, "session id")?;
        require_nonempty(public_key, "public key")?;
        require_nonempty(message, "message")?;
        require_nonempty(derive_path, "derive path")?;
        require_nonempty(local_party, "local party id")?;
        require_committee(signing_committee, "signing committee")?;

        info!(
            "keysign: session={} party={} public_key={} committee={:?} leader={}",
            session_id, local_party, public_key, signing_committee, is_leader
        );

        let keyshare = self.load_keyshare(public_key)?;
        let key_id = self.engine.keyshare_key_id(&keyshare)?;
        let digest = sha256(message.as_bytes());

        let setup = self
            .exchange_setup(
                session_id,
                local_party,
                signing_committee,
                is_leader,
                || {
                    let committee_bytes = encode_committee(signing_committee)?;
                    Ok(self.engine.sign_setup(
                        &key_id,
                        derive_path.as_bytes(),
                        &digest,
                        &committee_bytes,
                    )?)
                },
            )
            .await?;

        // A malicious leader could publish a setup for a different
        // payload; compare the embedded digest with our own before any
        // session exists.
        let embedded = self.engine.decode_sign_digest(&setup)?;
        if embedded != digest {
            return Err(Error::Validation(format!(
                "setup message digest {} does not match message digest {}",
                hex::encode(&embedded),
                hex::encode(digest)
            )));
        }

        let session = self.engine.sign_session(&setup, local_party, &keyshare)?;
        let output = self.driver(session_id, local_party).run(session).await?;

        let signature = match output {
            SessionOutput::Signature(signature) => signature,
            _ => {
                return Err(Error::Validation(
                    "signing session returned no signature".to_string(),
                ))
            }
        };

        let verified = self.verify_signature(public_key, &digest, &signature)?;
        if verified {
            info!("{}: signature verified against {}", session_id, public_key);
        } else {
            warn!(
                "{}: signature failed local verification against {}",
                session_id, public_key
            );
        }
        Ok(SignOutcome {
            signature,
            verified,
        })
    }

    /// Local sanity check of the engine's signature against the known
    /// public key. Shape errors are fatal; a verification mismatch is
    /// reported as `false`.
    fn verify_signature(
        &self,
        public_key: &str,
        digest: &[u8; 32],
        signature: &[u8],
    ) -> Result<bool, Error> {
        let key_bytes = hex::decode(public_key)
            .map_err(|e| Error::Validation(format!("public key is not hex: {}", e)))?;

        match self.engine.curve() {
            Curve::Ecdsa => {
                if signature.len() != 65 {
                    return Err(Error::Validation(format!(
                        "ecdsa signature must be 65 bytes, got {}",
                        signature.len()
                    )));
                }
                let verifying_key = k256::ecdsa::VerifyingKey::from_sec1_bytes(&key_bytes)
                    .map_err(|e| Error::Validation(format!("bad public key: {}", e)))?;
                let parsed = match k256::ecdsa::Signature::from_slice(&signature[..64]) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        error!("signature bytes do not parse: {}", e);
                        return Ok(false);
                    }
                };
                use k256::ecdsa::signature::hazmat::PrehashVerifier;
                Ok(verifying_key.verify_prehash(digest, &parsed).is_ok())
            }
            Curve::Eddsa => {
                if signature.len() != 64 {
                    return Err(Error::Validation(format!(
                        "eddsa signature must be 64 bytes, got {}",
                        signature.len()
                    )));
                }
                let key: [u8; 32] = key_bytes.as_slice().try_into().map_err(|_| {
                    Error::Validation("eddsa public key must be 32 bytes".to_string())
                })?;
                let verifying_key = ed25519_dalek::VerifyingKey::from_bytes(&key)
                    .map_err(|e| Error::Validation(format!("bad public key: {}", e)))?;
                let sig_bytes: [u8; 64] = match signature.try_into() {
                    Ok(bytes) => bytes,
                    Err(_) => return Ok(false),
                };
                let parsed = ed25519_dalek::Signature::from_bytes(&sig_bytes);
                use ed25519_dalek::Verifier;
                Ok(verifying_key.verify(digest, &parsed).is_ok())
            }
        }
    }
}
