//! End-to-end migration: three legacy vault shares of a known secp256k1
//! key are converted into engine shares that keep the public key.

mod support;

use std::path::Path;
use std::sync::Arc;

use num_bigint::BigInt;
use tempfile::TempDir;

use threshold_party::engine::sim::SimEngine;
use threshold_party::engine::Curve;
use threshold_party::reconstruct::curve_order;
use threshold_party::state::FileStateStore;
use threshold_party::vault::Vault;
use threshold_party::MpcService;

fn service(server: &str, party: &str, dir: &Path) -> MpcService {
    MpcService::new(
        server,
        Arc::new(SimEngine::new(Curve::Ecdsa)),
        Arc::new(FileStateStore::new(dir, party)),
    )
}

/// Compressed public key of a small scalar secret.
fn public_key_of(secret: u64) -> String {
    let mut bytes = [0u8; 32];
    bytes[24..].copy_from_slice(&secret.to_be_bytes());
    let key = k256::ecdsa::SigningKey::from_bytes(&bytes.into()).unwrap();
    hex::encode(key.verifying_key().to_encoded_point(true).as_bytes())
}

/// A legacy vault for one party holding `f(share_id)` of the Shamir
/// polynomial `f(x) = secret + slope * x` over the secp256k1 order.
fn legacy_vault(party: &str, share_id: u64, secret: u64, slope: u64, public_key: &str) -> Vault {
    let order = curve_order(Curve::Ecdsa);
    let xi = (BigInt::from(secret) + BigInt::from(slope) * BigInt::from(share_id)) % &order;
    let inner = format!(
        r#"{{"ecdsa_local_data":{{"Xi":{xi},"ShareID":{share_id},"Ks":[1,2,3]}}}}"#
    );
    serde_json::from_value(serde_json::json!({
        "name": "legacy",
        "public_key_ecdsa": public_key,
        "public_key_eddsa": "",
        "signers": ["P1", "P2", "P3"],
        "hex_chain_code": "bd33d5f66bdcbbdbdd1d8dd56018857bc7e2ca399a2de2b9b4aebbccbbbecca5",
        "key_shares": [{"public_key": public_key, "keyshare": inner}],
        "local_party_id": party,
    }))
    .unwrap()
}

#[tokio::test]
async fn migration_preserves_the_legacy_public_key() {
    let server = support::spawn_relay().await;
    let committee: Vec<String> = ["P1", "P2", "P3"].iter().map(|p| p.to_string()).collect();
    let dirs: Vec<TempDir> = (0..3).map(|_| tempfile::tempdir().unwrap()).collect();

    let secret = 0x5eed_1234_u64;
    let slope = 0x0dd5_eed5_u64;
    let public_key = public_key_of(secret);

    let run = |index: usize, leader: bool| {
        let server = server.clone();
        let committee = committee.clone();
        let party = committee[index].clone();
        let dir = dirs[index].path().to_path_buf();
        let vault = legacy_vault(&party, index as u64 + 1, secret, slope, &public_key);
        async move {
            service(&server, &party, &dir)
                .migrate("mig", &vault, &committee, leader)
                .await
        }
    };

    let (a, b, c) = tokio::join!(run(0, true), run(1, false), run(2, false));
    assert_eq!(a.unwrap(), public_key);
    assert_eq!(b.unwrap(), public_key);
    assert_eq!(c.unwrap(), public_key);

    for (dir, party) in dirs.iter().zip(["P1", "P2", "P3"]) {
        assert!(dir
            .path()
            .join(format!("{}-{}.json", public_key, party))
            .exists());
    }
}

#[tokio::test]
async fn migration_rejects_shares_of_a_different_key() {
    let server = support::spawn_relay().await;
    let committee: Vec<String> = ["P1", "P2", "P3"].iter().map(|p| p.to_string()).collect();
    let dirs: Vec<TempDir> = (0..3).map(|_| tempfile::tempdir().unwrap()).collect();

    // the vault claims a public key the shares do not reconstruct
    let wrong_key = public_key_of(0xbad_c0de);

    let run = |index: usize, leader: bool| {
        let server = server.clone();
        let committee = committee.clone();
        let party = committee[index].clone();
        let dir = dirs[index].path().to_path_buf();
        let vault = legacy_vault(&party, index as u64 + 1, 0x5eed, 0x0dd, &wrong_key);
        async move {
            service(&server, &party, &dir)
                .migrate("mig-bad", &vault, &committee, leader)
                .await
        }
    };

    let (a, b, c) = tokio::join!(run(0, true), run(1, false), run(2, false));
    for result in [a, b, c] {
        assert!(matches!(
            result.unwrap_err(),
            threshold_party::Error::Engine(_)
        ));
    }
}
