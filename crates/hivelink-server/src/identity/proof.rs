//! Signature proof of control for social-graph profiles and wallets.
//!
//! Stateless: the client signs a challenge with the key behind the external
//! identity, and the server checks the message names that identity before
//! recovering the signer and comparing it to the expected address.

use std::sync::Arc;

use chrono::Utc;
use hivelink_crypto::{normalize_address, recover_personal_sign_address};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::Serialize;
use tracing::{debug, instrument, warn};

use super::{IdentityCandidate, IdentityLinker, LinkError, LinkResult};
use crate::directory::{DirectoryError, IdentityDirectory};

pub const SOCIAL_PREAMBLE: &str = "Hivelink wants you to link your Farcaster profile.";
pub const WALLET_PREAMBLE: &str = "Hivelink wants you to link your wallet.";

const NONCE_BYTES: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum ProofError {
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Invalid message format: {0}")]
    InvalidMessageFormat(String),

    #[error("External account {0} not found")]
    ExternalAccountNotFound(String),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Signature was made by {recovered}, expected {expected}")]
    SignatureMismatch { expected: String, recovered: String },

    #[error("Directory lookup failed: {0}")]
    Directory(DirectoryError),

    #[error(transparent)]
    Link(#[from] LinkError),
}

/// A message for the client to sign.
#[derive(Debug, Clone, Serialize)]
pub struct Challenge {
    pub message: String,
    pub nonce: String,
    pub issued_at: String,
}

impl Challenge {
    fn build(preamble: &str, user_id: &str, subject_line: &str) -> Self {
        let mut nonce = [0u8; NONCE_BYTES];
        OsRng.fill_bytes(&mut nonce);
        let nonce = hex::encode(nonce);
        let issued_at = Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
        let message = format!(
            "{preamble}\n\nUser: {user_id}\n{subject_line}\nNonce: {nonce}\nIssued At: {issued_at}"
        );
        Self {
            message,
            nonce,
            issued_at,
        }
    }

    pub fn social(user_id: &str, fid: u64) -> Self {
        Self::build(SOCIAL_PREAMBLE, user_id, &format!("FID: {fid}"))
    }

    pub fn wallet(user_id: &str, address: &str) -> Self {
        Self::build(WALLET_PREAMBLE, user_id, &format!("Address: {address}"))
    }
}

/// Parse a numeric profile id.
pub fn parse_fid(external_id: &str) -> Result<u64, ProofError> {
    external_id
        .trim()
        .parse::<u64>()
        .ok()
        .filter(|fid| *fid > 0)
        .ok_or_else(|| ProofError::InvalidFormat("external_id must be a positive integer".to_string()))
}

/// The message must carry the preamble and a line naming the subject. A
/// `User:` line, when present, must name the acting user.
fn check_message(
    message: &str,
    preamble: &str,
    subject_line: &str,
    acting_user_id: &str,
) -> Result<(), ProofError> {
    if !message.contains(preamble) {
        return Err(ProofError::InvalidMessageFormat(
            "message is missing the expected preamble".to_string(),
        ));
    }
    let subject_lower = subject_line.to_ascii_lowercase();
    if !message
        .lines()
        .any(|line| line.trim().to_ascii_lowercase() == subject_lower)
    {
        return Err(ProofError::InvalidMessageFormat(format!(
            "message does not contain \"{subject_line}\""
        )));
    }
    let named_user = message
        .lines()
        .find_map(|line| line.trim().strip_prefix("User: "));
    match named_user {
        Some(user) if user.trim() != acting_user_id => Err(ProofError::InvalidMessageFormat(
            "message was issued for a different user".to_string(),
        )),
        _ => Ok(()),
    }
}

fn recover(message: &str, signature: &str) -> Result<String, ProofError> {
    recover_personal_sign_address(message, signature)
        .map_err(|e| ProofError::InvalidSignature(e.to_string()))
}

#[derive(Clone)]
pub struct ProofVerifier {
    directory: Arc<dyn IdentityDirectory>,
    linker: IdentityLinker,
}

impl ProofVerifier {
    pub fn new(directory: Arc<dyn IdentityDirectory>, linker: IdentityLinker) -> Self {
        Self { directory, linker }
    }

    /// Prove control of social-graph profile `external_id` and link it.
    #[instrument(skip(self, message, signature))]
    pub async fn verify_social(
        &self,
        acting_user_id: &str,
        external_id: &str,
        message: &str,
        signature: &str,
    ) -> Result<LinkResult, ProofError> {
        let fid = parse_fid(external_id)?;
        check_message(message, SOCIAL_PREAMBLE, &format!("FID: {fid}"), acting_user_id)?;

        let profile = self
            .directory
            .lookup_profile(fid)
            .await
            .map_err(|e| match e {
                DirectoryError::NotFound(_) => ProofError::ExternalAccountNotFound(fid.to_string()),
                other => ProofError::Directory(other),
            })?;

        let recovered = recover(message, signature)?;
        if recovered != profile.custody_address {
            warn!(fid, "Social proof signed by a key other than the custody address");
            return Err(ProofError::SignatureMismatch {
                expected: profile.custody_address,
                recovered,
            });
        }
        debug!(fid, username = %profile.username, "Social proof verified");

        Ok(self
            .linker
            .link(acting_user_id, &IdentityCandidate::social_graph(&profile))
            .await?)
    }

    /// Prove control of wallet `address` and link it.
    #[instrument(skip(self, message, signature))]
    pub async fn verify_wallet(
        &self,
        acting_user_id: &str,
        address: &str,
        message: &str,
        signature: &str,
    ) -> Result<LinkResult, ProofError> {
        let address = normalize_address(address).ok_or_else(|| {
            ProofError::InvalidFormat("address must be a 0x-prefixed 20-byte hex string".to_string())
        })?;
        check_message(
            message,
            WALLET_PREAMBLE,
            &format!("Address: {address}"),
            acting_user_id,
        )?;

        let recovered = recover(message, signature)?;
        if recovered != address {
            return Err(ProofError::SignatureMismatch {
                expected: address,
                recovered,
            });
        }

        Ok(self
            .linker
            .link(acting_user_id, &IdentityCandidate::wallet(&address))
            .await?)
    }
}
