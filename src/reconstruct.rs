//! Offline reconstruction.
//!
//! Two routines that never touch the relay: extraction of a party's
//! Lagrange-adjusted legacy secret `ui` from a vault (used standalone and
//! by migration), and root-key export through the engine from a quorum of
//! persisted shares.

use std::path::PathBuf;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use log::info;
use num_bigint::BigInt;
use num_traits::One;
use zeroize::Zeroizing;

use crate::engine::{Curve, MpcEngine, SessionOutput};
use crate::error::Error;
use crate::vault::Vault;

/// secp256k1 group order.
const SECP256K1_ORDER_HEX: &[u8] =
    b"fffffffffffffffffffffffffffffffebaaedce6af48a03bbfd25e8cd0364141";

/// Ed25519 base-point order (the prime `l`).
const ED25519_ORDER_HEX: &[u8] =
    b"1000000000000000000000000000000014def9dea2f79cd65812631a5cf5d3ed";

/// Order of the curve's scalar group.
pub fn curve_order(curve: Curve) -> BigInt {
    let hex = match curve {
        Curve::Ecdsa => SECP256K1_ORDER_HEX,
        Curve::Eddsa => ED25519_ORDER_HEX,
    };
    // The constants are valid hex literals.
    BigInt::parse_bytes(hex, 16).unwrap_or_default()
}

/// Lagrange coefficient at zero for the point `share_id` among `ks`:
/// `prod_{j != i} K_j * (K_j - K_i)^-1 mod n`.
pub fn lagrange_coefficient(ks: &[BigInt], share_id: &BigInt, order: &BigInt) -> BigInt {
    let mut coefficient = BigInt::one();
    for k in ks {
        if k == share_id {
            continue;
        }
        let difference = normalize(&(k - share_id), order);
        let inverse = mod_inverse(&difference, order);
        coefficient = normalize(&(coefficient * k * inverse), order);
    }
    coefficient
}

/// Extract this party's Lagrange-adjusted legacy secret
/// `ui = Xi * lambda_i mod n` from the vault. For EdDSA the result is
/// returned little-endian, the byte order the engine consumes.
pub fn legacy_secret(vault: &Vault, curve: Curve) -> Result<Zeroizing<Vec<u8>>, Error> {
    let data = vault.legacy_data(curve)?;
    let order = curve_order(curve);

    if !data.ks.contains(&data.share_id) {
        return Err(Error::Reconstruction(
            "share index is missing from the index vector".to_string(),
        ));
    }

    let coefficient = lagrange_coefficient(&data.ks, &data.share_id, &order);
    let ui = normalize(&(&data.xi * coefficient), &order);

    let (_, mut bytes) = ui.to_bytes_be();
    if curve == Curve::Eddsa {
        bytes.reverse();
    }
    Ok(Zeroizing::new(bytes))
}

/// Reconstruct the full root key from a quorum of persisted engine
/// shares. The first file's holder acts as the receiver; every other
/// holder contributes one exporter message built against the receiver's
/// setup. Session and keyshare material is dropped on every exit path.
pub fn export_root_key(
    engine: &dyn MpcEngine,
    share_files: &[PathBuf],
) -> Result<Zeroizing<Vec<u8>>, Error> {
    if share_files.len() < 2 {
        return Err(Error::Validation(
            "root-key export needs at least two share files".to_string(),
        ));
    }

    let mut shares = Vec::with_capacity(share_files.len());
    for path in share_files {
        let encoded = std::fs::read_to_string(path).map_err(|e| {
            Error::Persistence(format!("failed to read share {}: {}", path.display(), e))
        })?;
        let bytes = BASE64.decode(encoded.trim().as_bytes()).map_err(|e| {
            Error::Persistence(format!("share {} is not base64: {}", path.display(), e))
        })?;
        shares.push(Zeroizing::new(bytes));
    }

    let (mut receiver, setup) = engine.export_session(&shares[0])?;
    let mut finished = false;
    for share in &shares[1..] {
        let message = engine.exporter_message(share, &setup)?;
        finished = receiver.input_message(&message)?;
    }
    if !finished {
        return Err(Error::Validation(
            "share files do not form a complete quorum".to_string(),
        ));
    }

    match receiver.finish()? {
        SessionOutput::Secret(secret) => {
            info!("root key reconstructed from {} shares", share_files.len());
            Ok(Zeroizing::new(secret))
        }
        _ => Err(Error::Validation(
            "export session returned no secret".to_string(),
        )),
    }
}

/// Reduce into `[0, order)`.
fn normalize(value: &BigInt, order: &BigInt) -> BigInt {
    let reduced = value % order;
    if reduced.sign() == num_bigint::Sign::Minus {
        reduced + order
    } else {
        reduced
    }
}

/// Modular inverse via Fermat: both curve orders are prime.
fn mod_inverse(value: &BigInt, order: &BigInt) -> BigInt {
    value.modpow(&(order - BigInt::from(2u32)), order)
}
