//! Resharing across a committee change.
//!
//! The leader merges the old and new rosters into one combined committee
//! (first-occurrence order), derives the index vectors of each roster
//! within it, and builds the committee-change setup against its existing
//! share. Every combined member, joining or retiring, runs the session;
//! only members of the new committee persist the resulting share.

use log::info;

use crate::common::{encode_committee, threshold};
use crate::engine::SessionOutput;
use crate::error::Error;

use super::{require_committee, require_nonempty, MpcService};

/// The merged roster for a committee change, with each original roster
/// expressed as indices into it.
pub struct CommitteeChange {
    pub combined: Vec<String>,
    pub old_indices: Vec<u32>,
    pub new_indices: Vec<u32>,
}

/// Merge old and new committees preserving first-occurrence order.
pub fn merge_committees(old: &[String], new: &[String]) -> CommitteeChange {
    let mut combined: Vec<String> = Vec::new();
    for party in old.iter().chain(new.iter()) {
        if !combined.contains(party) {
            combined.push(party.clone());
        }
    }
    let position = |party: &String| combined.iter().position(|p| p == party).map(|i| i as u32);
    CommitteeChange {
        old_indices: old.iter().filter_map(position).collect(),
        new_indices: new.iter().filter_map(position).collect(),
        combined,
    }
}

impl MpcService {
    /// Reshare the key identified by `public_key` from `old_committee`
    /// onto `new_committee`. Both rosters are required explicitly; the
    /// leader must be an old-committee member holding a share. Returns
    /// the hex public key (unchanged by the reshare) for members of the
    /// new committee, which persist their fresh share.
    pub async fn reshare(
        &self,
        session_id: &str,
        public_key: &str,
        local_party: &str,
        old_committee: &[String],
        new_committee: &[String],
        is_leader: bool,
    ) -> Result<String, Error> {
        require_nonempty(session_id, "session id")?;
        require_nonempty(public_key, "public key")?;
        require_nonempty(local_party, "local party id")?;
        require_committee(old_committee, "old committee")?;
        require_committee(new_committee, "new committee")?;

        let change = merge_committees(old_committee, new_committee);
        info!(
            "reshare: session={} party={} combined={:?} old={:?} new={:?} leader={}",
            session_id,
            local_party,
            change.combined,
            change.old_indices,
            change.new_indices,
            is_leader
        );

        let is_old_member = old_committee.iter().any(|p| p == local_party);
        let keyshare = if is_old_member {
            Some(self.load_keyshare(public_key)?)
        } else {
            None
        };
        if is_leader && keyshare.is_none() {
            return Err(Error::Validation(
                "the reshare leader must hold a share of the key".to_string(),
            ));
        }

        let setup = self
            .exchange_setup(
                session_id,
                local_party,
                &change.combined,
                is_leader,
                || {
                    let committee_bytes = encode_committee(&change.combined)?;
                    let t = threshold(new_committee.len())?;
                    info!("{}: threshold is {}", session_id, t + 1);
                    let leader_share = keyshare.as_deref().ok_or_else(|| {
                        Error::Validation("missing leader keyshare".to_string())
                    })?;
                    Ok(self.engine.qc_setup(
                        leader_share,
                        (t + 1) as u32,
                        &change.old_indices,
                        &change.new_indices,
                        &committee_bytes,
                    )?)
                },
            )
            .await?;

        let session = self
            .engine
            .qc_session(&setup, local_party, keyshare.as_deref())?;
        let output = self.driver(session_id, local_party).run(session).await?;

        match output {
            SessionOutput::Keyshare(keyshare) => {
                let stays = new_committee.iter().any(|p| p == local_party);
                if stays {
                    let public_key = self.persist_keyshare(&keyshare)?;
                    info!("{}: reshare finished, public key {}", session_id, public_key);
                    Ok(public_key)
                } else {
                    info!("{}: reshare finished, {} retires", session_id, local_party);
                    Ok(public_key.to_string())
                }
            }
            _ => Err(Error::Validation(
                "reshare session returned no keyshare".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roster(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn merge_preserves_first_occurrence_order() {
        let change = merge_committees(
            &roster(&["A", "B", "C"]),
            &roster(&["B", "C", "D", "E"]),
        );
        assert_eq!(change.combined, roster(&["A", "B", "C", "D", "E"]));
        assert_eq!(change.old_indices, vec![0, 1, 2]);
        assert_eq!(change.new_indices, vec![1, 2, 3, 4]);
    }

    #[test]
    fn merge_of_disjoint_committees_concatenates() {
        let change = merge_committees(&roster(&["A", "B"]), &roster(&["C", "D"]));
        assert_eq!(change.combined, roster(&["A", "B", "C", "D"]));
        assert_eq!(change.old_indices, vec![0, 1]);
        assert_eq!(change.new_indices, vec![2, 3]);
    }

    #[test]
    fn merge_of_identical_committees_is_identity() {
        let committee = roster(&["A", "B", "C"]);
        let change = merge_committees(&committee, &committee);
        assert_eq!(change.combined, committee);
        assert_eq!(change.old_indices, change.new_indices);
    }
}
