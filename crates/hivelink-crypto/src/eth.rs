//! Wallet signature recovery for EIP-191 `personal_sign`.
//!
//! Wallets sign `"\x19Ethereum Signed Message:\n" || len(message) || message`
//! hashed with Keccak-256. The signer is identified by recovering the
//! secp256k1 public key and taking the last 20 bytes of its Keccak-256 hash.

use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use sha3::{Digest, Keccak256};

use crate::error::CryptoError;

const SIGNATURE_LEN: usize = 65;

/// Keccak-256 digest of an EIP-191 personal message.
pub fn personal_message_hash(message: &str) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(format!("\x19Ethereum Signed Message:\n{}", message.len()).as_bytes());
    hasher.update(message.as_bytes());
    hasher.finalize().into()
}

/// Lowercase `0x`-prefixed address for a public key.
pub fn address_of(key: &VerifyingKey) -> String {
    let point = key.as_affine().to_encoded_point(false);
    let hash = Keccak256::digest(&point.as_bytes()[1..]);
    format!("0x{}", hex::encode(&hash[12..]))
}

/// Canonical form of an address string: trimmed, lowercase, `0x`-prefixed.
///
/// Returns `None` unless the input is 20 bytes of hex.
pub fn normalize_address(address: &str) -> Option<String> {
    let trimmed = address.trim();
    let body = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if body.len() != 40 || !body.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    Some(format!("0x{}", body.to_ascii_lowercase()))
}

/// Recover the address that produced `signature_hex` over `message`.
///
/// Accepts 65-byte `r || s || v` signatures with `v` in `{0, 1, 27, 28}`.
/// High-s signatures are normalized rather than rejected, since some wallets
/// still emit them.
pub fn recover_personal_sign_address(
    message: &str,
    signature_hex: &str,
) -> Result<String, CryptoError> {
    let raw = signature_hex.trim();
    let raw = raw.strip_prefix("0x").unwrap_or(raw);
    let bytes =
        hex::decode(raw).map_err(|e| CryptoError::InvalidSignature(format!("not hex: {e}")))?;
    if bytes.len() != SIGNATURE_LEN {
        return Err(CryptoError::InvalidSignature(format!(
            "expected {SIGNATURE_LEN} bytes, got {}",
            bytes.len()
        )));
    }

    let v = match bytes[64] {
        v @ (0 | 1) => v,
        v @ (27 | 28) => v - 27,
        other => {
            return Err(CryptoError::InvalidSignature(format!(
                "unsupported recovery byte {other}"
            )));
        }
    };

    let mut signature = Signature::from_slice(&bytes[..64])
        .map_err(|e| CryptoError::InvalidSignature(e.to_string()))?;
    let mut recovery_byte = v;
    if let Some(normalized) = signature.normalize_s() {
        signature = normalized;
        recovery_byte ^= 1;
    }
    let recovery_id = RecoveryId::from_byte(recovery_byte)
        .ok_or_else(|| CryptoError::InvalidSignature("bad recovery id".to_string()))?;

    let digest = personal_message_hash(message);
    let key = VerifyingKey::recover_from_prehash(&digest, &signature, recovery_id)
        .map_err(|e| CryptoError::InvalidSignature(e.to_string()))?;
    Ok(address_of(&key))
}

/// Produce a `personal_sign` signature (`0x`-prefixed hex, `v` in 27/28).
#[cfg(any(test, feature = "test-utils"))]
pub fn sign_personal_message(key: &k256::ecdsa::SigningKey, message: &str) -> String {
    let digest = personal_message_hash(message);
    #[allow(clippy::expect_used)]
    let (signature, recovery_id) = key
        .sign_prehash_recoverable(&digest)
        .expect("signing a 32-byte prehash cannot fail");
    let mut out = signature.to_bytes().to_vec();
    out.push(recovery_id.to_byte() + 27);
    format!("0x{}", hex::encode(out))
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use k256::ecdsa::SigningKey;

    use super::*;

    const TEST_PRIVATE_KEY: &str =
        "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
    const TEST_ADDRESS: &str = "0x2c7536e3605d9c16a7a3d7b1898e529396a65c23";

    fn test_key() -> SigningKey {
        SigningKey::from_slice(&hex::decode(TEST_PRIVATE_KEY).unwrap()).unwrap()
    }

    #[test]
    fn address_derivation_matches_known_vector() {
        assert_eq!(address_of(test_key().verifying_key()), TEST_ADDRESS);
    }

    #[test]
    fn recovers_known_wallet_signature() {
        let signature = "0xb91467e570a6466aa9e9876cbcd013baba02900b8979d43fe208a4a4f339f5fd\
                         6007e74cd82e037b800186422fc2da167c747ef045e5d18a5f5d4300f8e1a0291c";
        let address = recover_personal_sign_address("Some data", signature).unwrap();
        assert_eq!(address, TEST_ADDRESS);
    }

    #[test]
    fn sign_then_recover_yields_signer() {
        let key = SigningKey::random(&mut rand::rngs::OsRng);
        let message = "Link wallet\nNonce: 42";
        let signature = sign_personal_message(&key, message);
        let recovered = recover_personal_sign_address(message, &signature).unwrap();
        assert_eq!(recovered, address_of(key.verifying_key()));
    }

    #[test]
    fn zero_based_recovery_byte_is_accepted() {
        let key = test_key();
        let signature = sign_personal_message(&key, "hello");
        let mut bytes = hex::decode(signature.trim_start_matches("0x")).unwrap();
        bytes[64] -= 27;
        let recovered = recover_personal_sign_address("hello", &hex::encode(bytes)).unwrap();
        assert_eq!(recovered, TEST_ADDRESS);
    }

    #[test]
    fn different_message_recovers_different_address() {
        let signature = sign_personal_message(&test_key(), "original");
        let recovered = recover_personal_sign_address("tampered", &signature).unwrap();
        assert_ne!(recovered, TEST_ADDRESS);
    }

    #[test]
    fn malformed_signatures_are_rejected() {
        for bad in ["", "0x1234", "not-hex", &format!("0x{}", "00".repeat(65))] {
            assert!(
                matches!(
                    recover_personal_sign_address("m", bad),
                    Err(CryptoError::InvalidSignature(_))
                ),
                "accepted {bad:?}"
            );
        }

        let mut bytes = vec![1u8; 65];
        bytes[64] = 5;
        assert!(recover_personal_sign_address("m", &hex::encode(bytes)).is_err());
    }

    #[test]
    fn normalize_address_lowercases_and_validates() {
        assert_eq!(
            normalize_address(" 0x2C7536E3605D9C16a7a3D7b1898e529396a65c23 ").as_deref(),
            Some(TEST_ADDRESS)
        );
        assert_eq!(
            normalize_address("2c7536e3605d9c16a7a3d7b1898e529396a65c23").as_deref(),
            Some(TEST_ADDRESS)
        );
        assert!(normalize_address("0x1234").is_none());
        assert!(normalize_address("0xzz7536e3605d9c16a7a3d7b1898e529396a65c23").is_none());
    }
}
