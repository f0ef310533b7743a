//! Legacy vault files.
//!
//! A vault is the on-disk record of a pre-migration (GG20-era) key: the
//! public keys, the signer roster, and one raw legacy share per curve.
//! The nested `keyshare` field is itself a JSON document whose bigint
//! fields Go serialized as bare JSON numbers, so they are parsed through
//! `serde_json`'s arbitrary-precision representation.

use std::path::Path;

use num_bigint::BigInt;
use serde::{Deserialize, Deserializer};

use crate::engine::Curve;
use crate::error::Error;

#[derive(Debug, Clone, Deserialize)]
pub struct Vault {
    #[serde(default)]
    pub name: String,
    pub public_key_ecdsa: String,
    pub public_key_eddsa: String,
    #[serde(default)]
    pub signers: Vec<String>,
    pub hex_chain_code: String,
    pub key_shares: Vec<VaultKeyshare>,
    pub local_party_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VaultKeyshare {
    pub public_key: String,
    /// A JSON document carrying the per-curve legacy local data.
    pub keyshare: String,
}

/// The inner document stored in [`VaultKeyshare::keyshare`].
#[derive(Debug, Clone, Deserialize)]
pub struct LocalStateDocument {
    #[serde(default)]
    pub ecdsa_local_data: Option<LegacyLocalData>,
    #[serde(default)]
    pub eddsa_local_data: Option<LegacyLocalData>,
}

/// One curve's Lagrange share: the combined secret `Xi` evaluated at this
/// party's `ShareID`, plus the full ordered index vector `Ks`.
#[derive(Debug, Clone, Deserialize)]
pub struct LegacyLocalData {
    #[serde(rename = "Xi", deserialize_with = "bigint_from_json")]
    pub xi: BigInt,
    #[serde(rename = "ShareID", deserialize_with = "bigint_from_json")]
    pub share_id: BigInt,
    #[serde(rename = "Ks", deserialize_with = "bigints_from_json")]
    pub ks: Vec<BigInt>,
}

impl Vault {
    pub fn from_file(path: &Path) -> Result<Self, Error> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            Error::Persistence(format!("failed to read vault {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&data).map_err(|e| {
            Error::Persistence(format!("failed to parse vault {}: {}", path.display(), e))
        })
    }

    /// Hex compressed public key for the requested curve.
    pub fn public_key(&self, curve: Curve) -> &str {
        match curve {
            Curve::Ecdsa => &self.public_key_ecdsa,
            Curve::Eddsa => &self.public_key_eddsa,
        }
    }

    /// Locate this vault's legacy share for the given curve: the keyshare
    /// entry whose public key matches the vault's key for that curve.
    pub fn legacy_data(&self, curve: Curve) -> Result<LegacyLocalData, Error> {
        let public_key = self.public_key(curve);
        let entry = self
            .key_shares
            .iter()
            .find(|share| share.public_key == public_key)
            .ok_or_else(|| {
                Error::Reconstruction(format!(
                    "vault has no keyshare for public key {}",
                    public_key
                ))
            })?;
        let document: LocalStateDocument = serde_json::from_str(&entry.keyshare)
            .map_err(|e| Error::Reconstruction(format!("failed to parse keyshare: {}", e)))?;
        let data = match curve {
            Curve::Ecdsa => document.ecdsa_local_data,
            Curve::Eddsa => document.eddsa_local_data,
        };
        data.ok_or_else(|| {
            Error::Reconstruction(format!("vault keyshare has no {} local data", curve))
        })
    }
}

fn bigint_from_json<'de, D>(deserializer: D) -> Result<BigInt, D::Error>
where
    D: Deserializer<'de>,
{
    let number = serde_json::Number::deserialize(deserializer)?;
    parse_bigint(&number).map_err(serde::de::Error::custom)
}

fn bigints_from_json<'de, D>(deserializer: D) -> Result<Vec<BigInt>, D::Error>
where
    D: Deserializer<'de>,
{
    let numbers = Vec::<serde_json::Number>::deserialize(deserializer)?;
    numbers
        .iter()
        .map(parse_bigint)
        .collect::<Result<_, _>>()
        .map_err(serde::de::Error::custom)
}

fn parse_bigint(number: &serde_json::Number) -> Result<BigInt, String> {
    number
        .to_string()
        .parse()
        .map_err(|e| format!("not an integer: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_vault_with_oversized_integers() {
        let xi = "57896044618658097711785492504343953926418782139537452191302581570759080747168";
        let inner = format!(
            r#"{{"ecdsa_local_data":{{"Xi":{xi},"ShareID":12345678901234567890,"Ks":[1,2,3]}},
                "eddsa_local_data":{{"Xi":7,"ShareID":2,"Ks":[1,2,3]}}}}"#
        );
        let vault_json = serde_json::json!({
            "name": "test vault",
            "public_key_ecdsa": "02aa",
            "public_key_eddsa": "bb",
            "signers": ["A", "B", "C"],
            "hex_chain_code": "00",
            "key_shares": [{"public_key": "02aa", "keyshare": inner}],
            "local_party_id": "A",
        });
        let vault: Vault = serde_json::from_value(vault_json).unwrap();

        let data = vault.legacy_data(Curve::Ecdsa).unwrap();
        assert_eq!(data.xi.to_string(), xi);
        assert_eq!(data.share_id.to_string(), "12345678901234567890");
        assert_eq!(data.ks.len(), 3);

        // the eddsa entry points at a public key no keyshare carries
        assert!(vault.legacy_data(Curve::Eddsa).is_err());
    }
}
