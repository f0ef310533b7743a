//! End-to-end keygen over a live relay: three parties, one leader, and
//! the offline export that reconstructs the root key from their shares.

mod support;

use std::path::Path;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tempfile::TempDir;

use threshold_party::common::random_chain_code_hex;
use threshold_party::engine::sim::SimEngine;
use threshold_party::engine::Curve;
use threshold_party::reconstruct::export_root_key;
use threshold_party::state::FileStateStore;
use threshold_party::MpcService;

fn roster(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

fn service(server: &str, curve: Curve, party: &str, dir: &Path) -> MpcService {
    MpcService::new(
        server,
        Arc::new(SimEngine::new(curve)),
        Arc::new(FileStateStore::new(dir, party)),
    )
}

#[tokio::test]
async fn three_party_ecdsa_keygen_agrees_on_one_key() {
    let server = support::spawn_relay().await;
    let parties = roster(&["A", "B", "C"]);
    let dirs: Vec<TempDir> = (0..3).map(|_| tempfile::tempdir().unwrap()).collect();
    let chain_code = random_chain_code_hex();

    let svc_a = service(&server, Curve::Ecdsa, "A", dirs[0].path());
    let svc_b = service(&server, Curve::Ecdsa, "B", dirs[1].path());
    let svc_c = service(&server, Curve::Ecdsa, "C", dirs[2].path());
    let (a, b, c) = tokio::join!(
        svc_a.keygen("s1", &chain_code, "A", &parties, true),
        svc_b.keygen("s1", &chain_code, "B", &parties, false),
        svc_c.keygen("s1", &chain_code, "C", &parties, false),
    );

    let public_key = a.unwrap();
    assert_eq!(public_key, b.unwrap());
    assert_eq!(public_key, c.unwrap());
    assert_eq!(public_key.len(), 66); // compressed secp256k1 point, hex

    // every party persisted its share under {pubkey}-{party}.json
    for (dir, party) in dirs.iter().zip(["A", "B", "C"]) {
        let path = dir.path().join(format!("{}-{}.json", public_key, party));
        assert!(path.exists(), "missing share file {:?}", path);
        let contents = std::fs::read_to_string(&path).unwrap();
        BASE64.decode(contents.trim().as_bytes()).unwrap();
    }

    // the shares reconstruct a secret whose public key matches
    let files: Vec<_> = dirs
        .iter()
        .zip(["A", "B", "C"])
        .map(|(dir, party)| dir.path().join(format!("{}-{}.json", public_key, party)))
        .collect();
    let engine = SimEngine::new(Curve::Ecdsa);
    let secret = export_root_key(&engine, &files).unwrap();

    let mut scalar_bytes = [0u8; 32];
    scalar_bytes.copy_from_slice(&secret);
    let signing_key = k256::ecdsa::SigningKey::from_bytes(&scalar_bytes.into()).unwrap();
    let reconstructed = signing_key.verifying_key().to_encoded_point(true);
    assert_eq!(hex::encode(reconstructed.as_bytes()), public_key);
}

#[tokio::test]
async fn three_party_eddsa_keygen_agrees_on_one_key() {
    let server = support::spawn_relay().await;
    let parties = roster(&["p1", "p2", "p3"]);
    let dirs: Vec<TempDir> = (0..3).map(|_| tempfile::tempdir().unwrap()).collect();
    let chain_code = random_chain_code_hex();

    let svc_p1 = service(&server, Curve::Eddsa, "p1", dirs[0].path());
    let svc_p2 = service(&server, Curve::Eddsa, "p2", dirs[1].path());
    let svc_p3 = service(&server, Curve::Eddsa, "p3", dirs[2].path());
    let (a, b, c) = tokio::join!(
        svc_p1.keygen("s2", &chain_code, "p1", &parties, true),
        svc_p2.keygen("s2", &chain_code, "p2", &parties, false),
        svc_p3.keygen("s2", &chain_code, "p3", &parties, false),
    );

    let public_key = a.unwrap();
    assert_eq!(public_key, b.unwrap());
    assert_eq!(public_key, c.unwrap());
    assert_eq!(public_key.len(), 64); // ed25519 point, hex
}

#[tokio::test]
async fn keygen_rejects_a_malformed_chain_code() {
    let server = support::spawn_relay().await;
    let dir = tempfile::tempdir().unwrap();
    let err = service(&server, Curve::Ecdsa, "A", dir.path())
        .keygen("s3", "not-hex", "A", &roster(&["A", "B"]), true)
        .await
        .unwrap_err();
    assert!(matches!(err, threshold_party::Error::Validation(_)));
}
