//! Protocol-wide helpers: the committee threshold rule, the committee wire
//! encoding consumed by the MPC engine, digests and chain-code generation.

use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::Error;

/// Compute the reshare threshold `t` for a committee of `n` members.
///
/// The rule is `t = ceil(2n/3) - 1`; the engine is always invoked with
/// `t + 1`, the number of parties required to sign. Committees of fewer
/// than two members are rejected.
pub fn threshold(committee_size: usize) -> Result<usize, Error> {
    if committee_size < 2 {
        return Err(Error::Validation(format!(
            "committee of {} members cannot run a threshold protocol",
            committee_size
        )));
    }
    Ok((committee_size * 2).div_ceil(3) - 1)
}

/// Encode an ordered committee for the engine: the UTF-8 party identifiers
/// joined by single NUL bytes, with no trailing NUL. The order is
/// protocol-significant; the engine derives receiver slots from it.
pub fn encode_committee(parties: &[String]) -> Result<Vec<u8>, Error> {
    if parties.is_empty() {
        return Err(Error::Validation("committee is empty".to_string()));
    }
    Ok(parties
        .iter()
        .map(|p| p.as_bytes())
        .collect::<Vec<_>>()
        .join(&0u8))
}

/// SHA-256 of the raw input bytes. This is the message digest convention
/// for signing sessions.
pub fn sha256(input: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(input);
    hasher.finalize().into()
}

/// Hex MD5 of a relay message body. Both the messenger (when sending) and
/// the inbound pump (when acknowledging and deduplicating) hash the base64
/// body string, not the decoded bytes.
pub fn body_hash(body: &str) -> String {
    let mut hasher = md5::Md5::new();
    hasher.update(body.as_bytes());
    hex::encode(hasher.finalize())
}

/// Generate a 32-byte random chain code, hex encoded.
pub fn random_chain_code_hex() -> String {
    let mut chain_code = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut chain_code);
    hex::encode(chain_code)
}

/// Check that a chain code is 32 hex-encoded bytes.
pub fn validate_chain_code(chain_code: &str) -> Result<[u8; 32], Error> {
    let bytes = hex::decode(chain_code)
        .map_err(|e| Error::Validation(format!("chain code is not valid hex: {}", e)))?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| Error::Validation(format!("chain code must be 32 bytes, got {}", bytes.len())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_follows_two_thirds_rule() {
        assert_eq!(threshold(2).unwrap(), 1);
        assert_eq!(threshold(3).unwrap(), 1);
        assert_eq!(threshold(4).unwrap(), 2);
        assert_eq!(threshold(5).unwrap(), 3);
        assert_eq!(threshold(6).unwrap(), 3);
        assert_eq!(threshold(9).unwrap(), 5);
    }

    #[test]
    fn threshold_is_below_committee_size() {
        for n in 2..50 {
            assert!(threshold(n).unwrap() < n);
        }
    }

    #[test]
    fn threshold_rejects_single_party() {
        assert!(threshold(1).is_err());
        assert!(threshold(0).is_err());
    }

    #[test]
    fn committee_encoding_is_nul_separated_without_trailer() {
        let parties = vec!["A".to_string(), "Bee".to_string(), "C".to_string()];
        let encoded = encode_committee(&parties).unwrap();
        assert_eq!(encoded, b"A\0Bee\0C");
    }

    #[test]
    fn committee_encoding_single_party_has_no_nul() {
        let encoded = encode_committee(&["solo".to_string()]).unwrap();
        assert_eq!(encoded, b"solo");
    }

    #[test]
    fn empty_committee_is_rejected() {
        assert!(encode_committee(&[]).is_err());
    }

    #[test]
    fn body_hash_is_hex_md5_of_the_string() {
        // md5("hello")
        assert_eq!(body_hash("hello"), "5d41402abc4b2a76b9719d911017c592");
    }

    #[test]
    fn chain_code_round_trips() {
        let cc = random_chain_code_hex();
        assert_eq!(cc.len(), 64);
        validate_chain_code(&cc).unwrap();
        assert!(validate_chain_code("abcd").is_err());
        assert!(validate_chain_code("zz").is_err());
    }
}
