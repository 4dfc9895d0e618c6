//! Hive key formats.
//!
//! - Private keys travel as WIF: base58(`0x80` || key || sha256d checksum[..4]).
//! - Public keys are `STM` + base58(compressed point || ripemd160 checksum[..4]).
//! - Transactions are signed with 65-byte compact signatures whose header
//!   byte is `recovery_id + 31`; nodes only accept "canonical" signatures, so
//!   signing retries with fresh randomness until one is produced.

use std::fmt;
use std::str::FromStr;

use k256::ecdsa::signature::hazmat::RandomizedPrehashSigner;
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use rand::rngs::OsRng;
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::error::CryptoError;

const WIF_VERSION: u8 = 0x80;
const PUBLIC_KEY_PREFIX: &str = "STM";
const CHECKSUM_LEN: usize = 4;
const COMPRESSED_KEY_LEN: usize = 33;

/// Upper bound on re-signing attempts before giving up on a canonical form.
const MAX_SIGNING_ATTEMPTS: usize = 256;

fn double_sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(Sha256::digest(data)).into()
}

fn ripemd_checksum(data: &[u8]) -> [u8; CHECKSUM_LEN] {
    let hash = Ripemd160::digest(data);
    let mut out = [0u8; CHECKSUM_LEN];
    out.copy_from_slice(&hash[..CHECKSUM_LEN]);
    out
}

/// A secp256k1 private key in Hive's encoding.
#[derive(Clone)]
pub struct ChainPrivateKey(SigningKey);

impl fmt::Debug for ChainPrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ChainPrivateKey").field(&"<redacted>").finish()
    }
}

impl ChainPrivateKey {
    /// Parse a WIF string, verifying version byte and checksum.
    pub fn from_wif(wif: &str) -> Result<Self, CryptoError> {
        let decoded = Zeroizing::new(
            bs58::decode(wif.trim())
                .into_vec()
                .map_err(|e| CryptoError::InvalidKey(format!("WIF is not base58: {e}")))?,
        );
        if decoded.len() != 1 + 32 + CHECKSUM_LEN {
            return Err(CryptoError::InvalidKey(format!(
                "WIF decodes to {} bytes",
                decoded.len()
            )));
        }
        let (payload, checksum) = decoded.split_at(1 + 32);
        if payload[0] != WIF_VERSION {
            return Err(CryptoError::InvalidKey(format!(
                "unexpected WIF version byte 0x{:02x}",
                payload[0]
            )));
        }
        let expected = double_sha256(payload);
        if !bool::from(expected[..CHECKSUM_LEN].ct_eq(checksum)) {
            return Err(CryptoError::InvalidKey("WIF checksum mismatch".to_string()));
        }
        let key = SigningKey::from_slice(&payload[1..])
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(Self(key))
    }

    /// Encode as WIF.
    pub fn to_wif(&self) -> Zeroizing<String> {
        let mut payload = Zeroizing::new(Vec::with_capacity(1 + 32 + CHECKSUM_LEN));
        payload.push(WIF_VERSION);
        payload.extend_from_slice(&self.0.to_bytes());
        let checksum = double_sha256(&payload);
        payload.extend_from_slice(&checksum[..CHECKSUM_LEN]);
        Zeroizing::new(bs58::encode(&*payload).into_string())
    }

    pub fn public_key(&self) -> ChainPublicKey {
        ChainPublicKey(*self.0.verifying_key())
    }

    /// Sign a 32-byte digest, returning a canonical compact signature.
    pub fn sign_digest_canonical(&self, digest: &[u8; 32]) -> Result<[u8; 65], CryptoError> {
        let verifying_key = self.0.verifying_key();
        for _ in 0..MAX_SIGNING_ATTEMPTS {
            let signature: Signature = self
                .0
                .sign_prehash_with_rng(&mut OsRng, digest)
                .map_err(|e| CryptoError::SigningFailed(e.to_string()))?;
            let signature = signature.normalize_s().unwrap_or(signature);
            let compact = signature.to_bytes();
            if !is_canonical(&compact) {
                continue;
            }
            let recovery_id =
                RecoveryId::trial_recovery_from_prehash(verifying_key, digest, &signature)
                    .map_err(|e| CryptoError::SigningFailed(e.to_string()))?;

            let mut out = [0u8; 65];
            out[0] = recovery_id.to_byte() + 31;
            out[1..].copy_from_slice(&compact);
            return Ok(out);
        }
        Err(CryptoError::SigningFailed(
            "no canonical signature produced".to_string(),
        ))
    }

    #[cfg(any(test, feature = "test-utils"))]
    pub fn generate() -> Self {
        Self(SigningKey::random(&mut OsRng))
    }
}

/// Canonical when neither `r` nor `s` needs a leading zero byte in DER and
/// neither has its high bit set.
fn is_canonical(compact: &[u8]) -> bool {
    let half_ok = |b0: u8, b1: u8| b0 & 0x80 == 0 && !(b0 == 0 && b1 & 0x80 == 0);
    half_ok(compact[0], compact[1]) && half_ok(compact[32], compact[33])
}

/// A secp256k1 public key in Hive's `STM...` encoding.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ChainPublicKey(VerifyingKey);

impl ChainPublicKey {
    pub const fn verifying_key(&self) -> &VerifyingKey {
        &self.0
    }

    /// Recover the signer of a compact signature produced by
    /// [`ChainPrivateKey::sign_digest_canonical`].
    pub fn recover(digest: &[u8; 32], compact: &[u8; 65]) -> Result<Self, CryptoError> {
        let recovery_id = compact[0]
            .checked_sub(31)
            .and_then(RecoveryId::from_byte)
            .ok_or_else(|| CryptoError::InvalidSignature("bad header byte".to_string()))?;
        let signature = Signature::from_slice(&compact[1..])
            .map_err(|e| CryptoError::InvalidSignature(e.to_string()))?;
        VerifyingKey::recover_from_prehash(digest, &signature, recovery_id)
            .map(Self)
            .map_err(|e| CryptoError::InvalidSignature(e.to_string()))
    }
}

impl fmt::Debug for ChainPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChainPublicKey({self})")
    }
}

impl fmt::Display for ChainPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let point = self.0.as_affine().to_encoded_point(true);
        let mut data = point.as_bytes().to_vec();
        let checksum = ripemd_checksum(&data);
        data.extend_from_slice(&checksum);
        write!(f, "{PUBLIC_KEY_PREFIX}{}", bs58::encode(data).into_string())
    }
}

impl FromStr for ChainPublicKey {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let body = s
            .trim()
            .strip_prefix(PUBLIC_KEY_PREFIX)
            .ok_or_else(|| CryptoError::InvalidKey(format!("missing {PUBLIC_KEY_PREFIX} prefix")))?;
        let decoded = bs58::decode(body)
            .into_vec()
            .map_err(|e| CryptoError::InvalidKey(format!("public key is not base58: {e}")))?;
        if decoded.len() != COMPRESSED_KEY_LEN + CHECKSUM_LEN {
            return Err(CryptoError::InvalidKey(format!(
                "public key decodes to {} bytes",
                decoded.len()
            )));
        }
        let (key, checksum) = decoded.split_at(COMPRESSED_KEY_LEN);
        if ripemd_checksum(key) != checksum {
            return Err(CryptoError::InvalidKey(
                "public key checksum mismatch".to_string(),
            ));
        }
        VerifyingKey::from_sec1_bytes(key)
            .map(Self)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))
    }
}
