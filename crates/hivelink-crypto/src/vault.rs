//! Credential vault for custodial secrets.
//!
//! Symmetric ChaCha20-Poly1305 encryption under a single process-wide key.
//! Every encryption draws a fresh random 96-bit nonce; the 16-byte tag is
//! detached so the stored record keeps ciphertext, iv and tag as separate
//! fields.
//!
//! There is no in-band key rotation: changing the master key makes every
//! stored record undecryptable.

use chacha20poly1305::aead::{AeadInPlace, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce, Tag};
use hkdf::Hkdf;
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::Sha256;
use zeroize::{Zeroize, Zeroizing};

use crate::error::CryptoError;

/// HKDF info string for vault key derivation.
const HKDF_INFO: &[u8] = b"hivelink-credential-vault-v1";

/// HKDF salt for domain separation (recommended by RFC 5869).
const HKDF_SALT: &[u8] = b"hivelink-credential-vault-salt-v1";

/// Raw key size.
pub const KEY_SIZE: usize = 32;

/// Nonce size for ChaCha20-Poly1305.
pub const NONCE_SIZE: usize = 12;

/// Poly1305 tag size.
pub const TAG_SIZE: usize = 16;

/// Shortest master secret accepted for HKDF derivation.
const MIN_SECRET_LEN: usize = 32;

/// Output of [`CredentialVault::encrypt`].
#[derive(Debug, Clone)]
pub struct SealedSecret {
    pub ciphertext: Vec<u8>,
    pub iv: [u8; NONCE_SIZE],
    pub auth_tag: [u8; TAG_SIZE],
}

impl SealedSecret {
    /// Hex encodings of `(ciphertext, iv, auth_tag)` for text columns.
    pub fn to_hex(&self) -> (String, String, String) {
        (
            hex::encode(&self.ciphertext),
            hex::encode(self.iv),
            hex::encode(self.auth_tag),
        )
    }
}

/// Encrypts and decrypts custodial secrets.
#[derive(Clone)]
pub struct CredentialVault {
    cipher: ChaCha20Poly1305,
}

impl std::fmt::Debug for CredentialVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialVault").finish_non_exhaustive()
    }
}

impl CredentialVault {
    /// Build a vault from a raw 32-byte key.
    pub fn from_key(key: &[u8; KEY_SIZE]) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(key)),
        }
    }

    /// Build a vault from configuration.
    ///
    /// A 64-character hex string is used as the raw key. Anything else of at
    /// least 32 bytes is treated as a passphrase and run through HKDF-SHA256.
    pub fn from_master_secret(secret: &str) -> Result<Self, CryptoError> {
        let secret = secret.trim();
        if secret.len() == KEY_SIZE * 2 {
            if let Ok(bytes) = hex::decode(secret) {
                let mut key = [0u8; KEY_SIZE];
                key.copy_from_slice(&bytes);
                let vault = Self::from_key(&key);
                key.zeroize();
                return Ok(vault);
            }
        }

        if secret.len() < MIN_SECRET_LEN {
            return Err(CryptoError::InvalidKeyLength {
                expected: MIN_SECRET_LEN,
                actual: secret.len(),
            });
        }

        let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), secret.as_bytes());
        let mut key = [0u8; KEY_SIZE];
        hk.expand(HKDF_INFO, &mut key)
            .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;
        let vault = Self::from_key(&key);
        key.zeroize();
        Ok(vault)
    }

    /// Encrypt `plaintext` under a fresh random nonce.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<SealedSecret, CryptoError> {
        let mut iv = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut iv);

        let mut buffer = plaintext.to_vec();
        let tag = self
            .cipher
            .encrypt_in_place_detached(Nonce::from_slice(&iv), b"", &mut buffer)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

        let mut auth_tag = [0u8; TAG_SIZE];
        auth_tag.copy_from_slice(tag.as_slice());

        Ok(SealedSecret {
            ciphertext: buffer,
            iv,
            auth_tag,
        })
    }

    /// Decrypt a record. Fails on malformed lengths or tag mismatch; never
    /// returns unauthenticated plaintext.
    pub fn decrypt(
        &self,
        ciphertext: &[u8],
        iv: &[u8],
        auth_tag: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        if iv.len() != NONCE_SIZE {
            return Err(CryptoError::InvalidNonceLength {
                expected: NONCE_SIZE,
                actual: iv.len(),
            });
        }
        if auth_tag.len() != TAG_SIZE {
            return Err(CryptoError::InvalidTagLength {
                expected: TAG_SIZE,
                actual: auth_tag.len(),
            });
        }

        let mut buffer = Zeroizing::new(ciphertext.to_vec());
        self.cipher
            .decrypt_in_place_detached(
                Nonce::from_slice(iv),
                b"",
                &mut *buffer,
                Tag::from_slice(auth_tag),
            )
            .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))?;
        Ok(buffer)
    }

    /// Decrypt hex-encoded columns into a UTF-8 secret.
    pub fn decrypt_hex_to_string(
        &self,
        ciphertext_hex: &str,
        iv_hex: &str,
        auth_tag_hex: &str,
    ) -> Result<Zeroizing<String>, CryptoError> {
        let decode = |field: &str, value: &str| {
            hex::decode(value).map_err(|e| CryptoError::Malformed(format!("{field}: {e}")))
        };
        let plaintext = self.decrypt(
            &decode("ciphertext", ciphertext_hex)?,
            &decode("iv", iv_hex)?,
            &decode("auth_tag", auth_tag_hex)?,
        )?;
        let text = std::str::from_utf8(&plaintext)
            .map_err(|e| CryptoError::Malformed(format!("plaintext is not UTF-8: {e}")))?;
        Ok(Zeroizing::new(text.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use rand::Rng;

    use super::*;

    fn test_vault() -> CredentialVault {
        CredentialVault::from_key(&[7u8; KEY_SIZE])
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let vault = test_vault();
        let secret = b"5JdeC9P7Pbd1uGdFVEsJ41EkEnADbbHGq6p1BwFxm6txNBsQnsw";

        let sealed = vault.encrypt(secret).unwrap();
        let opened = vault
            .decrypt(&sealed.ciphertext, &sealed.iv, &sealed.auth_tag)
            .unwrap();

        assert_eq!(opened.as_slice(), secret);
        assert_eq!(sealed.ciphertext.len(), secret.len());
    }

    #[test]
    fn random_inputs_roundtrip_and_reject_tampering() {
        let vault = test_vault();
        let mut rng = rand::thread_rng();

        for _ in 0..1000 {
            let len = rng.gen_range(0..=64);
            let mut plaintext = vec![0u8; len];
            rng.fill(plaintext.as_mut_slice());

            let sealed = vault.encrypt(&plaintext).unwrap();
            let opened = vault
                .decrypt(&sealed.ciphertext, &sealed.iv, &sealed.auth_tag)
                .unwrap();
            assert_eq!(opened.as_slice(), plaintext.as_slice());

            let mut bad_tag = sealed.auth_tag;
            bad_tag[rng.gen_range(0..TAG_SIZE)] ^= 1 << rng.gen_range(0..8);
            assert!(matches!(
                vault.decrypt(&sealed.ciphertext, &sealed.iv, &bad_tag),
                Err(CryptoError::DecryptionFailed(_))
            ));

            if !plaintext.is_empty() {
                let mut bad_ct = sealed.ciphertext.clone();
                let idx = rng.gen_range(0..bad_ct.len());
                bad_ct[idx] ^= 0x01;
                assert!(matches!(
                    vault.decrypt(&bad_ct, &sealed.iv, &sealed.auth_tag),
                    Err(CryptoError::DecryptionFailed(_))
                ));
            }
        }
    }

    #[test]
    fn same_plaintext_gets_distinct_nonces() {
        let vault = test_vault();
        let a = vault.encrypt(b"posting-key").unwrap();
        let b = vault.encrypt(b"posting-key").unwrap();
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn decrypt_with_other_key_fails() {
        let sealed = test_vault().encrypt(b"secret").unwrap();
        let other = CredentialVault::from_key(&[8u8; KEY_SIZE]);
        let result = other.decrypt(&sealed.ciphertext, &sealed.iv, &sealed.auth_tag);
        assert!(matches!(result, Err(CryptoError::DecryptionFailed(_))));
    }

    #[test]
    fn decrypt_rejects_wrong_lengths() {
        let vault = test_vault();
        assert!(matches!(
            vault.decrypt(b"data", &[0u8; 8], &[0u8; TAG_SIZE]),
            Err(CryptoError::InvalidNonceLength {
                expected: NONCE_SIZE,
                actual: 8
            })
        ));
        assert!(matches!(
            vault.decrypt(b"data", &[0u8; NONCE_SIZE], &[0u8; 4]),
            Err(CryptoError::InvalidTagLength { .. })
        ));
    }

    #[test]
    fn hex_master_key_matches_raw_key() {
        let raw = [0x11u8; KEY_SIZE];
        let from_hex = CredentialVault::from_master_secret(&hex::encode(raw)).unwrap();
        let sealed = CredentialVault::from_key(&raw).encrypt(b"abc").unwrap();
        let (ct, iv, tag) = sealed.to_hex();
        let opened = from_hex.decrypt_hex_to_string(&ct, &iv, &tag).unwrap();
        assert_eq!(opened.as_str(), "abc");
    }

    #[test]
    fn passphrase_is_derived_deterministically() {
        let phrase = "correct horse battery staple, but much longer";
        let a = CredentialVault::from_master_secret(phrase).unwrap();
        let b = CredentialVault::from_master_secret(phrase).unwrap();
        let sealed = a.encrypt(b"shared").unwrap();
        let opened = b
            .decrypt(&sealed.ciphertext, &sealed.iv, &sealed.auth_tag)
            .unwrap();
        assert_eq!(opened.as_slice(), b"shared");
    }

    #[test]
    fn short_master_secret_rejected() {
        let err = CredentialVault::from_master_secret("too-short").unwrap_err();
        assert!(matches!(err, CryptoError::InvalidKeyLength { .. }));
    }

    #[test]
    fn malformed_hex_columns_are_reported() {
        let vault = test_vault();
        let err = vault
            .decrypt_hex_to_string("zz", &"00".repeat(NONCE_SIZE), &"00".repeat(TAG_SIZE))
            .unwrap_err();
        assert!(matches!(err, CryptoError::Malformed(_)));
    }
}
