//! In-process engine: a deterministic, round-based simulation of the
//! native MPC library behind the [`MpcEngine`] contract.
//!
//! Each protocol is modelled as a single broadcast round of per-party
//! packets followed by local completion, which is enough to exercise every
//! seam the orchestrator and driver care about: setup construction,
//! receiver enumeration, inbound application, completion detection and
//! result extraction. Keys and signatures are real secp256k1/Ed25519
//! values so the verification paths downstream run against genuine
//! material. Packets carry share material in the clear, so this engine is
//! for local committees and the test suite, never for production runs;
//! native bindings implement the same traits out of tree.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};

use curve25519_dalek::edwards::EdwardsPoint;
use k256::elliptic_curve::ops::Reduce;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::elliptic_curve::PrimeField;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};

use super::{Curve, EngineError, EngineSession, MpcEngine, SessionOutput};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum SetupKind {
    Keygen,
    Sign,
    Qc,
    Export,
}

/// Protocol parameters published by the leader. Opaque to everything
/// outside this module; the orchestrator only ever sees the bytes.
#[derive(Serialize, Deserialize)]
struct SimSetup {
    curve: Curve,
    kind: SetupKind,
    participants: u32,
    committee: Vec<String>,
    #[serde(default)]
    key_id: Option<Vec<u8>>,
    #[serde(default)]
    digest: Option<Vec<u8>>,
    #[serde(default)]
    derive_path: Option<String>,
    #[serde(default)]
    old_indices: Vec<u32>,
    #[serde(default)]
    new_indices: Vec<u32>,
    #[serde(default)]
    public_key: Option<Vec<u8>>,
    seed: [u8; 32],
}

impl SimSetup {
    fn parse(bytes: &[u8]) -> Result<Self, EngineError> {
        serde_json::from_slice(bytes)
            .map_err(|e| EngineError::Malformed(format!("setup message: {}", e)))
    }

    fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }
}

/// One party's round packet.
#[derive(Serialize, Deserialize)]
struct SimPacket {
    from: String,
    #[serde(default)]
    contribution: Option<[u8; 32]>,
    #[serde(default)]
    secret: Option<[u8; 32]>,
    #[serde(default)]
    ack: Option<Vec<u8>>,
    #[serde(default)]
    share: Option<[u8; 32]>,
}

impl SimPacket {
    fn parse(bytes: &[u8]) -> Result<Self, EngineError> {
        serde_json::from_slice(bytes)
            .map_err(|e| EngineError::Malformed(format!("round packet: {}", e)))
    }

    fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }
}

/// Serialized form of a key share, as returned by a finished session.
#[derive(Clone, Serialize, Deserialize)]
struct SimKeyshare {
    curve: Curve,
    party_id: String,
    committee: Vec<String>,
    participants: u32,
    public_key: Vec<u8>,
    key_id: Vec<u8>,
    group_secret: [u8; 32],
    share: [u8; 32],
}

impl SimKeyshare {
    fn parse(bytes: &[u8]) -> Result<Self, EngineError> {
        serde_json::from_slice(bytes)
            .map_err(|e| EngineError::Malformed(format!("keyshare: {}", e)))
    }

    fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }
}

enum SessionKind {
    Keygen,
    Refresh,
    Migrate { public_key: Vec<u8> },
    Qc,
    Sign { keyshare: SimKeyshare, digest: Vec<u8> },
    ExportReceiver { keyshare: SimKeyshare },
}

pub struct SimEngine {
    curve: Curve,
    sessions_created: AtomicUsize,
}

impl SimEngine {
    pub fn new(curve: Curve) -> Self {
        Self {
            curve,
            sessions_created: AtomicUsize::new(0),
        }
    }

    /// Number of sessions this engine has constructed. Lets tests assert
    /// that validation failures abort before a session is allocated.
    pub fn sessions_created(&self) -> usize {
        self.sessions_created.load(Ordering::SeqCst)
    }

    fn track(&self, session: SimSession) -> Box<dyn EngineSession> {
        self.sessions_created.fetch_add(1, Ordering::SeqCst);
        Box::new(session)
    }

    fn check_curve(&self, setup: &SimSetup) -> Result<(), EngineError> {
        if setup.curve != self.curve {
            return Err(EngineError::Rejected(format!(
                "setup is for {}, engine is {}",
                setup.curve, self.curve
            )));
        }
        Ok(())
    }

    fn random_seed() -> [u8; 32] {
        let mut seed = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut seed);
        seed
    }
}

struct SimSession {
    curve: Curve,
    kind: SessionKind,
    local_party: String,
    participants: u32,
    seed: [u8; 32],
    /// Parties whose packets complete the round (our own counts as
    /// received from the start).
    expected: BTreeSet<String>,
    received: BTreeMap<String, SimPacket>,
    outbound: VecDeque<Vec<u8>>,
    /// Receiver slots for outbound messages: the roster minus ourselves.
    recipients: Vec<String>,
    /// Parties that hold a share of the result.
    shareholders: Vec<String>,
    done: bool,
}

impl SimSession {
    fn round_complete(&self) -> bool {
        self.expected.iter().all(|p| self.received.contains_key(p))
    }

    fn accept(&mut self, packet: SimPacket) -> Result<bool, EngineError> {
        if !self.expected.contains(&packet.from) {
            return Err(EngineError::Rejected(format!(
                "packet from {} does not belong to this round",
                packet.from
            )));
        }
        self.received.insert(packet.from.clone(), packet);
        self.done = self.round_complete();
        Ok(self.done)
    }

    /// Resolve the group secret once the round is complete.
    fn group_secret(&self) -> Result<[u8; 32], EngineError> {
        match &self.kind {
            SessionKind::Keygen | SessionKind::Migrate { .. } => {
                let mut secret = [0u8; 32];
                for packet in self.received.values() {
                    let contribution = packet.contribution.ok_or_else(|| {
                        EngineError::Rejected(format!("{} sent no contribution", packet.from))
                    })?;
                    secret = scalar_add(self.curve, &secret, &contribution);
                }
                Ok(secret)
            }
            SessionKind::Refresh | SessionKind::Qc => {
                let mut agreed: Option<[u8; 32]> = None;
                for packet in self.received.values() {
                    if let Some(secret) = packet.secret {
                        match agreed {
                            None => agreed = Some(secret),
                            Some(prev) if prev == secret => {}
                            Some(_) => {
                                return Err(EngineError::Rejected(
                                    "share holders disagree on the key".to_string(),
                                ))
                            }
                        }
                    }
                }
                agreed.ok_or_else(|| {
                    EngineError::Rejected("no share holder participated".to_string())
                })
            }
            _ => Err(EngineError::Rejected(
                "session kind carries no key material".to_string(),
            )),
        }
    }

    fn finish_keyshare(&self) -> Result<SessionOutput, EngineError> {
        let secret = self.group_secret()?;
        let public_key = scalar_base(self.curve, &secret)?;

        if let SessionKind::Migrate { public_key: legacy } = &self.kind {
            if &public_key != legacy {
                return Err(EngineError::Rejected(
                    "migrated key does not match the legacy public key".to_string(),
                ));
            }
        }

        let share = match &self.kind {
            // Additive protocols: our own round contribution is our share.
            SessionKind::Keygen | SessionKind::Migrate { .. } => self
                .received
                .get(&self.local_party)
                .and_then(|p| p.contribution)
                .unwrap_or([0u8; 32]),
            // Re-randomised protocols: shares are derived from the session
            // seed so that they sum to the unchanged secret.
            _ => derive_shares(self.curve, &self.seed, &secret, &self.shareholders)
                .remove(&self.local_party)
                .unwrap_or([0u8; 32]),
        };

        let keyshare = SimKeyshare {
            curve: self.curve,
            party_id: self.local_party.clone(),
            committee: self.shareholders.clone(),
            participants: self.participants,
            key_id: sha256(&public_key).to_vec(),
            public_key,
            group_secret: secret,
            share,
        };
        Ok(SessionOutput::Keyshare(keyshare.encode()))
    }

    fn finish_signature(
        &self,
        keyshare: &SimKeyshare,
        digest: &[u8],
    ) -> Result<SessionOutput, EngineError> {
        let signature = match self.curve {
            Curve::Ecdsa => {
                let key = k256::ecdsa::SigningKey::from_bytes(&keyshare.group_secret.into())
                    .map_err(|e| EngineError::Rejected(format!("signing key: {}", e)))?;
                let (sig, recovery) = key
                    .sign_prehash_recoverable(digest)
                    .map_err(|e| EngineError::Rejected(format!("sign: {}", e)))?;
                let mut out = sig.to_bytes().to_vec();
                out.push(recovery.to_byte());
                out
            }
            Curve::Eddsa => {
                let scalar =
                    curve25519_dalek::Scalar::from_bytes_mod_order(keyshare.group_secret);
                let mut hash_prefix = [0u8; 32];
                hash_prefix.copy_from_slice(&Sha512::digest(keyshare.group_secret)[..32]);
                let expanded = ed25519_dalek::hazmat::ExpandedSecretKey {
                    scalar,
                    hash_prefix,
                };
                let pk: [u8; 32] = keyshare.public_key.as_slice().try_into().map_err(|_| {
                    EngineError::Malformed("eddsa public key must be 32 bytes".to_string())
                })?;
                let verifying_key = ed25519_dalek::VerifyingKey::from_bytes(&pk)
                    .map_err(|e| EngineError::Malformed(format!("public key: {}", e)))?;
                ed25519_dalek::hazmat::raw_sign::<Sha512>(&expanded, digest, &verifying_key)
                    .to_bytes()
                    .to_vec()
            }
        };
        Ok(SessionOutput::Signature(signature))
    }

    fn finish_secret(&self, keyshare: &SimKeyshare) -> Result<SessionOutput, EngineError> {
        let mut secret = [0u8; 32];
        for packet in self.received.values() {
            let share = packet.share.ok_or_else(|| {
                EngineError::Rejected(format!("{} sent no export share", packet.from))
            })?;
            secret = scalar_add(self.curve, &secret, &share);
        }
        if scalar_base(self.curve, &secret)? != keyshare.public_key {
            return Err(EngineError::Rejected(
                "reconstructed secret does not match the public key".to_string(),
            ));
        }
        Ok(SessionOutput::Secret(secret.to_vec()))
    }
}

impl EngineSession for SimSession {
    fn output_message(&mut self) -> Result<Option<Vec<u8>>, EngineError> {
        Ok(self.outbound.pop_front())
    }

    fn message_receiver(
        &mut self,
        _message: &[u8],
        index: usize,
    ) -> Result<Option<String>, EngineError> {
        Ok(self.recipients.get(index).cloned())
    }

    fn input_message(&mut self, message: &[u8]) -> Result<bool, EngineError> {
        if self.done {
            return Ok(true);
        }
        let packet = SimPacket::parse(message)?;
        self.accept(packet)
    }

    fn finish(self: Box<Self>) -> Result<SessionOutput, EngineError> {
        if !self.done {
            return Err(EngineError::Rejected(
                "session has not completed".to_string(),
            ));
        }
        match &self.kind {
            SessionKind::Keygen
            | SessionKind::Refresh
            | SessionKind::Migrate { .. }
            | SessionKind::Qc => self.finish_keyshare(),
            SessionKind::Sign { keyshare, digest } => {
                let (keyshare, digest) = (keyshare.clone(), digest.clone());
                self.finish_signature(&keyshare, &digest)
            }
            SessionKind::ExportReceiver { keyshare } => {
                let keyshare = keyshare.clone();
                self.finish_secret(&keyshare)
            }
        }
    }
}

impl MpcEngine for SimEngine {
    fn curve(&self) -> Curve {
        self.curve
    }

    fn keygen_setup(
        &self,
        participants: u32,
        key_id: Option<&[u8]>,
        committee: &[u8],
    ) -> Result<Vec<u8>, EngineError> {
        let committee = decode_committee(committee)?;
        if participants == 0 || participants as usize > committee.len() {
            return Err(EngineError::Rejected(format!(
                "{} participants out of a committee of {}",
                participants,
                committee.len()
            )));
        }
        Ok(SimSetup {
            curve: self.curve,
            kind: SetupKind::Keygen,
            participants,
            committee,
            key_id: key_id.map(|k| k.to_vec()),
            digest: None,
            derive_path: None,
            old_indices: Vec::new(),
            new_indices: Vec::new(),
            public_key: None,
            seed: Self::random_seed(),
        }
        .encode())
    }

    fn keygen_session(
        &self,
        setup: &[u8],
        local_party: &str,
    ) -> Result<Box<dyn EngineSession>, EngineError> {
        let setup = SimSetup::parse(setup)?;
        self.check_curve(&setup)?;
        expect_kind(&setup, SetupKind::Keygen)?;
        if setup.key_id.is_some() {
            return Err(EngineError::Rejected(
                "setup refreshes an existing key; use a refresh session".to_string(),
            ));
        }
        require_member(&setup.committee, local_party)?;

        let contribution = random_scalar(self.curve);
        let mut session = new_round_session(
            self.curve,
            SessionKind::Keygen,
            &setup,
            local_party,
            setup.committee.clone(),
            setup.committee.clone(),
        );
        session.stage_own_packet(SimPacket {
            from: local_party.to_string(),
            contribution: Some(contribution),
            secret: None,
            ack: None,
            share: None,
        });
        Ok(self.track(session))
    }

    fn sign_setup(
        &self,
        key_id: &[u8],
        derive_path: &[u8],
        digest: &[u8],
        committee: &[u8],
    ) -> Result<Vec<u8>, EngineError> {
        let committee = decode_committee(committee)?;
        Ok(SimSetup {
            curve: self.curve,
            kind: SetupKind::Sign,
            participants: committee.len() as u32,
            committee,
            key_id: Some(key_id.to_vec()),
            digest: Some(digest.to_vec()),
            derive_path: Some(String::from_utf8_lossy(derive_path).into_owned()),
            old_indices: Vec::new(),
            new_indices: Vec::new(),
            public_key: None,
            seed: Self::random_seed(),
        }
        .encode())
    }

    fn sign_session(
        &self,
        setup: &[u8],
        local_party: &str,
        keyshare: &[u8],
    ) -> Result<Box<dyn EngineSession>, EngineError> {
        let setup = SimSetup::parse(setup)?;
        self.check_curve(&setup)?;
        expect_kind(&setup, SetupKind::Sign)?;
        require_member(&setup.committee, local_party)?;

        let keyshare = SimKeyshare::parse(keyshare)?;
        if setup.key_id.as_deref() != Some(keyshare.key_id.as_slice()) {
            return Err(EngineError::Rejected(
                "setup was built for a different key".to_string(),
            ));
        }
        let digest = setup
            .digest
            .clone()
            .ok_or_else(|| EngineError::Malformed("signing setup carries no digest".to_string()))?;

        let ack = sha256_pair(local_party.as_bytes(), &digest).to_vec();
        let mut session = new_round_session(
            self.curve,
            SessionKind::Sign { keyshare, digest },
            &setup,
            local_party,
            setup.committee.clone(),
            setup.committee.clone(),
        );
        session.stage_own_packet(SimPacket {
            from: local_party.to_string(),
            contribution: None,
            secret: None,
            ack: Some(ack),
            share: None,
        });
        Ok(self.track(session))
    }

    fn decode_sign_digest(&self, setup: &[u8]) -> Result<Vec<u8>, EngineError> {
        let setup = SimSetup::parse(setup)?;
        expect_kind(&setup, SetupKind::Sign)?;
        setup
            .digest
            .ok_or_else(|| EngineError::Malformed("signing setup carries no digest".to_string()))
    }

    fn refresh_session(
        &self,
        setup: &[u8],
        local_party: &str,
        keyshare: Option<&[u8]>,
    ) -> Result<Box<dyn EngineSession>, EngineError> {
        let setup = SimSetup::parse(setup)?;
        self.check_curve(&setup)?;
        expect_kind(&setup, SetupKind::Keygen)?;
        require_member(&setup.committee, local_party)?;

        let carried = match keyshare {
            Some(bytes) => {
                let keyshare = SimKeyshare::parse(bytes)?;
                if let Some(key_id) = &setup.key_id {
                    if key_id != &keyshare.key_id {
                        return Err(EngineError::Rejected(
                            "keyshare does not match the key being refreshed".to_string(),
                        ));
                    }
                }
                Some(keyshare.group_secret)
            }
            None => None,
        };

        let mut session = new_round_session(
            self.curve,
            SessionKind::Refresh,
            &setup,
            local_party,
            setup.committee.clone(),
            setup.committee.clone(),
        );
        session.stage_own_packet(SimPacket {
            from: local_party.to_string(),
            contribution: None,
            secret: carried,
            ack: None,
            share: None,
        });
        Ok(self.track(session))
    }

    fn migrate_session(
        &self,
        setup: &[u8],
        local_party: &str,
        public_key: &[u8],
        _chain_code: &[u8; 32],
        legacy_secret: &[u8],
    ) -> Result<Box<dyn EngineSession>, EngineError> {
        let setup = SimSetup::parse(setup)?;
        self.check_curve(&setup)?;
        expect_kind(&setup, SetupKind::Keygen)?;
        require_member(&setup.committee, local_party)?;

        let mut padded = [0u8; 32];
        if legacy_secret.len() > 32 {
            return Err(EngineError::Malformed(
                "legacy secret is longer than the scalar size".to_string(),
            ));
        }
        match self.curve {
            // Big-endian scalars are left-padded, little-endian right-padded.
            Curve::Ecdsa => padded[32 - legacy_secret.len()..].copy_from_slice(legacy_secret),
            Curve::Eddsa => padded[..legacy_secret.len()].copy_from_slice(legacy_secret),
        }
        let contribution = reduce_scalar(self.curve, &padded);

        let mut session = new_round_session(
            self.curve,
            SessionKind::Migrate {
                public_key: public_key.to_vec(),
            },
            &setup,
            local_party,
            setup.committee.clone(),
            setup.committee.clone(),
        );
        session.stage_own_packet(SimPacket {
            from: local_party.to_string(),
            contribution: Some(contribution),
            secret: None,
            ack: None,
            share: None,
        });
        Ok(self.track(session))
    }

    fn qc_setup(
        &self,
        keyshare: &[u8],
        participants: u32,
        old_indices: &[u32],
        new_indices: &[u32],
        committee: &[u8],
    ) -> Result<Vec<u8>, EngineError> {
        let committee = decode_committee(committee)?;
        if old_indices.is_empty() || new_indices.is_empty() {
            return Err(EngineError::Rejected(
                "committee change needs both an old and a new roster".to_string(),
            ));
        }
        if old_indices
            .iter()
            .chain(new_indices.iter())
            .any(|&i| i as usize >= committee.len())
        {
            return Err(EngineError::Rejected(
                "roster index outside the combined committee".to_string(),
            ));
        }
        let keyshare = SimKeyshare::parse(keyshare)?;
        Ok(SimSetup {
            curve: self.curve,
            kind: SetupKind::Qc,
            participants,
            committee,
            key_id: Some(keyshare.key_id.clone()),
            digest: None,
            derive_path: None,
            old_indices: old_indices.to_vec(),
            new_indices: new_indices.to_vec(),
            public_key: Some(keyshare.public_key),
            seed: Self::random_seed(),
        }
        .encode())
    }

    fn qc_session(
        &self,
        setup: &[u8],
        local_party: &str,
        keyshare: Option<&[u8]>,
    ) -> Result<Box<dyn EngineSession>, EngineError> {
        let setup = SimSetup::parse(setup)?;
        self.check_curve(&setup)?;
        expect_kind(&setup, SetupKind::Qc)?;
        require_member(&setup.committee, local_party)?;

        let old_members: Vec<String> = setup
            .old_indices
            .iter()
            .map(|&i| setup.committee[i as usize].clone())
            .collect();
        let new_members: Vec<String> = setup
            .new_indices
            .iter()
            .map(|&i| setup.committee[i as usize].clone())
            .collect();

        let is_old = old_members.iter().any(|p| p == local_party);
        let carried = match (is_old, keyshare) {
            (true, Some(bytes)) => {
                let keyshare = SimKeyshare::parse(bytes)?;
                if setup.key_id.as_deref() != Some(keyshare.key_id.as_slice()) {
                    return Err(EngineError::Rejected(
                        "keyshare does not match the key being reshared".to_string(),
                    ));
                }
                Some(keyshare.group_secret)
            }
            (true, None) => {
                return Err(EngineError::Rejected(format!(
                    "{} is in the old committee but has no keyshare",
                    local_party
                )))
            }
            (false, _) => None,
        };

        // Every combined member sends a packet (joining members send a
        // bare acknowledgement), so completion always needs inbound
        // traffic from the rest of the roster.
        let mut session = new_round_session(
            self.curve,
            SessionKind::Qc,
            &setup,
            local_party,
            setup.committee.clone(),
            new_members,
        );
        session.stage_own_packet(SimPacket {
            from: local_party.to_string(),
            contribution: None,
            secret: carried,
            ack: None,
            share: None,
        });
        Ok(self.track(session))
    }

    fn export_session(
        &self,
        keyshare: &[u8],
    ) -> Result<(Box<dyn EngineSession>, Vec<u8>), EngineError> {
        let keyshare = SimKeyshare::parse(keyshare)?;
        let setup = SimSetup {
            curve: self.curve,
            kind: SetupKind::Export,
            participants: keyshare.participants,
            committee: keyshare.committee.clone(),
            key_id: Some(keyshare.key_id.clone()),
            digest: None,
            derive_path: None,
            old_indices: Vec::new(),
            new_indices: Vec::new(),
            public_key: Some(keyshare.public_key.clone()),
            seed: Self::random_seed(),
        };
        let setup_bytes = setup.encode();

        let mut session = new_round_session(
            self.curve,
            SessionKind::ExportReceiver {
                keyshare: keyshare.clone(),
            },
            &setup,
            &keyshare.party_id,
            setup.committee.clone(),
            setup.committee.clone(),
        );
        session.recipients.clear();
        session.stage_own_packet(SimPacket {
            from: keyshare.party_id.clone(),
            contribution: None,
            secret: None,
            ack: None,
            share: Some(keyshare.share),
        });
        Ok((self.track(session), setup_bytes))
    }

    fn exporter_message(&self, keyshare: &[u8], setup: &[u8]) -> Result<Vec<u8>, EngineError> {
        let setup = SimSetup::parse(setup)?;
        expect_kind(&setup, SetupKind::Export)?;
        let keyshare = SimKeyshare::parse(keyshare)?;
        if setup.public_key.as_deref() != Some(keyshare.public_key.as_slice()) {
            return Err(EngineError::Rejected(
                "keyshare belongs to a different key".to_string(),
            ));
        }
        Ok(SimPacket {
            from: keyshare.party_id.clone(),
            contribution: None,
            secret: None,
            ack: None,
            share: Some(keyshare.share),
        }
        .encode())
    }

    fn keyshare_public_key(&self, keyshare: &[u8]) -> Result<Vec<u8>, EngineError> {
        Ok(SimKeyshare::parse(keyshare)?.public_key)
    }

    fn keyshare_key_id(&self, keyshare: &[u8]) -> Result<Vec<u8>, EngineError> {
        Ok(SimKeyshare::parse(keyshare)?.key_id)
    }
}

impl SimSession {
    fn stage_own_packet(&mut self, packet: SimPacket) {
        if !self.recipients.is_empty() {
            self.outbound.push_back(packet.encode());
        }
        self.received.insert(self.local_party.clone(), packet);
        self.done = self.round_complete();
    }
}

fn new_round_session(
    curve: Curve,
    kind: SessionKind,
    setup: &SimSetup,
    local_party: &str,
    senders: Vec<String>,
    shareholders: Vec<String>,
) -> SimSession {
    SimSession {
        curve,
        kind,
        local_party: local_party.to_string(),
        participants: setup.participants,
        seed: setup.seed,
        expected: senders.into_iter().collect(),
        received: BTreeMap::new(),
        outbound: VecDeque::new(),
        recipients: setup
            .committee
            .iter()
            .filter(|p| p.as_str() != local_party)
            .cloned()
            .collect(),
        shareholders,
        done: false,
    }
}

fn decode_committee(bytes: &[u8]) -> Result<Vec<String>, EngineError> {
    if bytes.is_empty() {
        return Err(EngineError::Malformed("empty committee".to_string()));
    }
    bytes
        .split(|&b| b == 0)
        .map(|part| {
            String::from_utf8(part.to_vec())
                .map_err(|_| EngineError::Malformed("party id is not UTF-8".to_string()))
        })
        .collect()
}

fn expect_kind(setup: &SimSetup, kind: SetupKind) -> Result<(), EngineError> {
    if setup.kind != kind {
        return Err(EngineError::Rejected(format!(
            "setup kind {:?} cannot start a {:?} session",
            setup.kind, kind
        )));
    }
    Ok(())
}

fn require_member(committee: &[String], party: &str) -> Result<(), EngineError> {
    if committee.iter().any(|p| p == party) {
        Ok(())
    } else {
        Err(EngineError::Rejected(format!(
            "{} is not a member of this session",
            party
        )))
    }
}

fn sha256(input: &[u8]) -> [u8; 32] {
    Sha256::digest(input).into()
}

fn sha256_pair(a: &[u8], b: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(a);
    hasher.update(b);
    hasher.finalize().into()
}

fn random_scalar(curve: Curve) -> [u8; 32] {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    reduce_scalar(curve, &bytes)
}

/// Reduce arbitrary 32 bytes to a canonical scalar in the curve's native
/// byte order (big-endian for secp256k1, little-endian for Ed25519).
fn reduce_scalar(curve: Curve, bytes: &[u8; 32]) -> [u8; 32] {
    match curve {
        Curve::Ecdsa => {
            let scalar = <k256::Scalar as Reduce<k256::U256>>::reduce_bytes(&(*bytes).into());
            scalar.to_bytes().into()
        }
        Curve::Eddsa => curve25519_dalek::Scalar::from_bytes_mod_order(*bytes).to_bytes(),
    }
}

fn scalar_add(curve: Curve, a: &[u8; 32], b: &[u8; 32]) -> [u8; 32] {
    match curve {
        Curve::Ecdsa => {
            let a = <k256::Scalar as Reduce<k256::U256>>::reduce_bytes(&(*a).into());
            let b = <k256::Scalar as Reduce<k256::U256>>::reduce_bytes(&(*b).into());
            (a + b).to_bytes().into()
        }
        Curve::Eddsa => {
            let a = curve25519_dalek::Scalar::from_bytes_mod_order(*a);
            let b = curve25519_dalek::Scalar::from_bytes_mod_order(*b);
            (a + b).to_bytes()
        }
    }
}

fn scalar_sub(curve: Curve, a: &[u8; 32], b: &[u8; 32]) -> [u8; 32] {
    match curve {
        Curve::Ecdsa => {
            let a = <k256::Scalar as Reduce<k256::U256>>::reduce_bytes(&(*a).into());
            let b = <k256::Scalar as Reduce<k256::U256>>::reduce_bytes(&(*b).into());
            (a - b).to_bytes().into()
        }
        Curve::Eddsa => {
            let a = curve25519_dalek::Scalar::from_bytes_mod_order(*a);
            let b = curve25519_dalek::Scalar::from_bytes_mod_order(*b);
            (a - b).to_bytes()
        }
    }
}

/// Compressed public key for a secret scalar.
fn scalar_base(curve: Curve, secret: &[u8; 32]) -> Result<Vec<u8>, EngineError> {
    match curve {
        Curve::Ecdsa => {
            let scalar: Option<k256::Scalar> =
                k256::Scalar::from_repr((*secret).into()).into();
            let scalar = scalar
                .ok_or_else(|| EngineError::Malformed("non-canonical scalar".to_string()))?;
            let point = k256::ProjectivePoint::GENERATOR * scalar;
            if point == k256::ProjectivePoint::IDENTITY {
                return Err(EngineError::Rejected("secret scalar is zero".to_string()));
            }
            Ok(point.to_affine().to_encoded_point(true).as_bytes().to_vec())
        }
        Curve::Eddsa => {
            let scalar = curve25519_dalek::Scalar::from_bytes_mod_order(*secret);
            Ok(EdwardsPoint::mul_base(&scalar).compress().to_bytes().to_vec())
        }
    }
}

/// Derive fresh shares of `secret` for `roster`: every member but the last
/// takes a seed-derived scalar, the last takes the balancing remainder.
fn derive_shares(
    curve: Curve,
    seed: &[u8; 32],
    secret: &[u8; 32],
    roster: &[String],
) -> BTreeMap<String, [u8; 32]> {
    let mut shares = BTreeMap::new();
    let mut acc = [0u8; 32];
    for party in roster.iter().take(roster.len().saturating_sub(1)) {
        let mut hasher = Sha256::new();
        hasher.update(b"share-derive");
        hasher.update(seed);
        hasher.update(party.as_bytes());
        let derived = reduce_scalar(curve, &hasher.finalize().into());
        acc = scalar_add(curve, &acc, &derived);
        shares.insert(party.clone(), derived);
    }
    if let Some(last) = roster.last() {
        shares.insert(last.clone(), scalar_sub(curve, secret, &acc));
    }
    shares
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::encode_committee;

    fn committee(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    /// Pump a set of sessions against each other in memory until all
    /// report completion, then finish each one.
    fn run_to_completion(
        parties: &[String],
        mut sessions: Vec<Box<dyn EngineSession>>,
    ) -> Vec<SessionOutput> {
        let mut finished = vec![false; sessions.len()];
        for _ in 0..32 {
            let mut deliveries: Vec<(usize, Vec<u8>)> = Vec::new();
            for (i, session) in sessions.iter_mut().enumerate() {
                while let Some(message) = session.output_message().unwrap() {
                    let mut index = 0;
                    while let Some(to) = session.message_receiver(&message, index).unwrap() {
                        let target = parties.iter().position(|p| *p == to).unwrap();
                        deliveries.push((target, message.clone()));
                        index += 1;
                    }
                }
            }
            if deliveries.is_empty() {
                break;
            }
            for (target, message) in deliveries {
                finished[target] |= sessions[target].input_message(&message).unwrap();
            }
        }
        assert!(finished.iter().all(|f| *f), "sessions did not complete");
        sessions.into_iter().map(|s| s.finish().unwrap()).collect()
    }

    fn keygen_shares(curve: Curve, names: &[&str]) -> Vec<Vec<u8>> {
        let engine = SimEngine::new(curve);
        let parties = committee(names);
        let encoded = encode_committee(&parties).unwrap();
        let setup = engine.keygen_setup(2, None, &encoded).unwrap();
        let sessions = parties
            .iter()
            .map(|p| engine.keygen_session(&setup, p).unwrap())
            .collect();
        run_to_completion(&parties, sessions)
            .into_iter()
            .map(|out| match out {
                SessionOutput::Keyshare(bytes) => bytes,
                other => panic!("expected keyshare, got {:?}", other),
            })
            .collect()
    }

    #[test]
    fn keygen_agrees_on_one_public_key() {
        for curve in [Curve::Ecdsa, Curve::Eddsa] {
            let engine = SimEngine::new(curve);
            let shares = keygen_shares(curve, &["A", "B", "C"]);
            let keys: Vec<_> = shares
                .iter()
                .map(|s| engine.keyshare_public_key(s).unwrap())
                .collect();
            assert_eq!(keys[0], keys[1]);
            assert_eq!(keys[1], keys[2]);
            let expected = match curve {
                Curve::Ecdsa => 33,
                Curve::Eddsa => 32,
            };
            assert_eq!(keys[0].len(), expected);
        }
    }

    #[test]
    fn export_reconstructs_the_generated_key() {
        for curve in [Curve::Ecdsa, Curve::Eddsa] {
            let engine = SimEngine::new(curve);
            let shares = keygen_shares(curve, &["A", "B", "C"]);
            let (mut receiver, setup) = engine.export_session(&shares[0]).unwrap();
            let mut finished = false;
            for share in &shares[1..] {
                let message = engine.exporter_message(share, &setup).unwrap();
                finished = receiver.input_message(&message).unwrap();
            }
            assert!(finished);
            let secret = match receiver.finish().unwrap() {
                SessionOutput::Secret(secret) => secret,
                other => panic!("expected secret, got {:?}", other),
            };
            let mut fixed = [0u8; 32];
            fixed.copy_from_slice(&secret);
            assert_eq!(
                scalar_base(curve, &fixed).unwrap(),
                engine.keyshare_public_key(&shares[0]).unwrap()
            );
        }
    }

    #[test]
    fn sign_produces_a_verifiable_signature() {
        let engine = SimEngine::new(Curve::Ecdsa);
        let shares = keygen_shares(Curve::Ecdsa, &["A", "B"]);
        let digest = sha256(b"payload");
        let key_id = engine.keyshare_key_id(&shares[0]).unwrap();
        let parties = committee(&["A", "B"]);
        let encoded = encode_committee(&parties).unwrap();
        let setup = engine
            .sign_setup(&key_id, b"m/44/931/0/0/0", &digest, &encoded)
            .unwrap();
        assert_eq!(engine.decode_sign_digest(&setup).unwrap(), digest.to_vec());

        let sessions = parties
            .iter()
            .zip(&shares)
            .map(|(p, s)| engine.sign_session(&setup, p, s).unwrap())
            .collect();
        let outputs = run_to_completion(&parties, sessions);
        for out in outputs {
            let signature = match out {
                SessionOutput::Signature(sig) => sig,
                other => panic!("expected signature, got {:?}", other),
            };
            assert_eq!(signature.len(), 65);
            let public_key = engine.keyshare_public_key(&shares[0]).unwrap();
            let verifying_key =
                k256::ecdsa::VerifyingKey::from_sec1_bytes(&public_key).unwrap();
            let sig = k256::ecdsa::Signature::from_slice(&signature[..64]).unwrap();
            use k256::ecdsa::signature::hazmat::PrehashVerifier;
            verifying_key.verify_prehash(&digest, &sig).unwrap();
        }
    }

    #[test]
    fn sign_rejects_a_foreign_keyshare() {
        let engine = SimEngine::new(Curve::Ecdsa);
        let shares = keygen_shares(Curve::Ecdsa, &["A", "B"]);
        let other = keygen_shares(Curve::Ecdsa, &["A", "B"]);
        let digest = sha256(b"payload");
        let key_id = engine.keyshare_key_id(&shares[0]).unwrap();
        let parties = committee(&["A", "B"]);
        let encoded = encode_committee(&parties).unwrap();
        let setup = engine
            .sign_setup(&key_id, b"m", &digest, &encoded)
            .unwrap();
        assert!(engine.sign_session(&setup, "A", &other[0]).is_err());
    }

    #[test]
    fn refresh_preserves_the_public_key() {
        let engine = SimEngine::new(Curve::Eddsa);
        let shares = keygen_shares(Curve::Eddsa, &["A", "B", "C"]);
        let public_key = engine.keyshare_public_key(&shares[0]).unwrap();
        let key_id = engine.keyshare_key_id(&shares[0]).unwrap();

        let parties = committee(&["A", "B", "C"]);
        let encoded = encode_committee(&parties).unwrap();
        let setup = engine.keygen_setup(2, Some(&key_id), &encoded).unwrap();
        let sessions = parties
            .iter()
            .zip(&shares)
            .map(|(p, s)| engine.refresh_session(&setup, p, Some(s)).unwrap())
            .collect();
        let refreshed: Vec<Vec<u8>> = run_to_completion(&parties, sessions)
            .into_iter()
            .map(|out| match out {
                SessionOutput::Keyshare(bytes) => bytes,
                other => panic!("expected keyshare, got {:?}", other),
            })
            .collect();
        for share in &refreshed {
            assert_eq!(engine.keyshare_public_key(share).unwrap(), public_key);
        }
        // and the refreshed shares still reconstruct the same secret
        let (mut receiver, setup) = engine.export_session(&refreshed[0]).unwrap();
        let mut finished = false;
        for share in &refreshed[1..] {
            let message = engine.exporter_message(share, &setup).unwrap();
            finished = receiver.input_message(&message).unwrap();
        }
        assert!(finished);
        assert!(matches!(
            receiver.finish().unwrap(),
            SessionOutput::Secret(_)
        ));
    }

    #[test]
    fn finish_before_completion_is_rejected() {
        let engine = SimEngine::new(Curve::Ecdsa);
        let parties = committee(&["A", "B"]);
        let encoded = encode_committee(&parties).unwrap();
        let setup = engine.keygen_setup(2, None, &encoded).unwrap();
        let session = engine.keygen_session(&setup, "A").unwrap();
        assert!(session.finish().is_err());
    }
}
