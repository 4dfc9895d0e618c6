//! `Hivelink` cryptography
//!
//! ## Primitives
//!
//! - **Credential vault**: ChaCha20-Poly1305 AEAD under a process-wide key
//!   (raw 32 bytes, or HKDF-SHA256 over a master secret); ciphertext, nonce
//!   and tag are kept as separate columns.
//! - **Wallet proofs**: EIP-191 `personal_sign` digests (Keccak-256) and
//!   secp256k1 public-key recovery to a lowercase `0x` address.
//! - **Chain keys**: WIF private keys, `STM`-prefixed public keys, canonical
//!   compact signatures for transaction broadcast.

pub mod chain_keys;
pub mod error;
pub mod eth;
pub mod vault;

pub use chain_keys::{ChainPrivateKey, ChainPublicKey};
pub use error::CryptoError;
pub use eth::{normalize_address, recover_personal_sign_address};
pub use vault::{CredentialVault, KEY_SIZE, NONCE_SIZE, SealedSecret, TAG_SIZE};
