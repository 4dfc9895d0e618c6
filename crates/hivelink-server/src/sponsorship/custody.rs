//! Custodied posting credential: store, report, delete, re-issue.

use std::sync::Arc;

use hivelink_core::db::DatabaseError;
use hivelink_crypto::{ChainPrivateKey, CredentialVault, CryptoError};
use tracing::{info, instrument, warn};

use super::SideEffectRecorder;
use super::side_effects::BACKUP_EMAIL;
use crate::chain::{ChainError, ChainVerifier};
use crate::notify::{NotificationDispatcher, NotificationError, templates};
use crate::storage::{AppDatabase, CustodialKeyRecord, IdentityType, KeyType, NewCustodialKey};

#[derive(Debug, thiserror::Error)]
pub enum CustodyError {
    #[error("No chain account is linked to this user")]
    IdentityNotLinked,

    #[error("Invalid posting key: {0}")]
    InvalidKey(String),

    #[error("Key does not match the posting authority of {account}")]
    KeyMismatch { account: String },

    #[error("No keys found")]
    NoKeys,

    #[error("No contact address on file")]
    ContactNotFound,

    #[error("Chain lookup failed: {0}")]
    Chain(#[from] ChainError),

    #[error("Could not decrypt stored key: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Could not send backup: {0}")]
    Notification(#[from] NotificationError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// What the user sees about their custodied key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyStatus {
    pub stored: bool,
    pub custody: Option<KeyType>,
    pub hive_username: Option<String>,
    pub created_at: Option<i64>,
    pub updated_at: Option<i64>,
    pub last_used_at: Option<i64>,
}

impl From<Option<CustodialKeyRecord>> for KeyStatus {
    fn from(record: Option<CustodialKeyRecord>) -> Self {
        match record {
            Some(r) => Self {
                stored: true,
                custody: Some(r.key_type),
                hive_username: Some(r.hive_username),
                created_at: Some(r.created_at),
                updated_at: Some(r.updated_at),
                last_used_at: r.last_used_at,
            },
            None => Self {
                stored: false,
                custody: None,
                hive_username: None,
                created_at: None,
                updated_at: None,
                last_used_at: None,
            },
        }
    }
}

#[derive(Clone)]
pub struct CustodyService {
    db: AppDatabase,
    chain: Arc<dyn ChainVerifier>,
    notifier: Arc<dyn NotificationDispatcher>,
    vault: Arc<CredentialVault>,
    side_effects: SideEffectRecorder,
}

impl CustodyService {
    pub fn new(
        db: AppDatabase,
        chain: Arc<dyn ChainVerifier>,
        notifier: Arc<dyn NotificationDispatcher>,
        vault: Arc<CredentialVault>,
    ) -> Self {
        let side_effects = SideEffectRecorder::new(db.clone());
        Self {
            db,
            chain,
            notifier,
            vault,
            side_effects,
        }
    }

    /// Store a user-supplied posting key for the user's primary chain
    /// account. The key must be in that account's posting authority.
    #[instrument(skip(self, posting_wif))]
    pub async fn store_user_key(
        &self,
        user_id: &str,
        posting_wif: &str,
    ) -> Result<KeyStatus, CustodyError> {
        let account = self
            .db
            .get_primary_identity(user_id, IdentityType::ChainAccount)
            .await?
            .and_then(|identity| identity.handle)
            .ok_or(CustodyError::IdentityNotLinked)?;

        let key = ChainPrivateKey::from_wif(posting_wif)
            .map_err(|e| CustodyError::InvalidKey(e.to_string()))?;
        let public = key.public_key().to_string();
        let authorized = self.chain.posting_public_keys(&account).await?;
        if !authorized.iter().any(|k| *k == public) {
            return Err(CustodyError::KeyMismatch { account });
        }

        let sealed = self.vault.encrypt(key.to_wif().as_bytes())?;
        let (encrypted_secret, iv, auth_tag) = sealed.to_hex();
        let record = self
            .db
            .upsert_custodial_key(&NewCustodialKey {
                user_id,
                hive_username: &account,
                encrypted_secret: &encrypted_secret,
                iv: &iv,
                auth_tag: &auth_tag,
                key_type: KeyType::UserProvided,
            })
            .await?;

        info!(user_id, account = %account, "User-provided posting key stored");
        Ok(KeyStatus::from(Some(record)))
    }

    pub async fn status(&self, user_id: &str) -> Result<KeyStatus, CustodyError> {
        Ok(KeyStatus::from(self.db.get_custodial_key(user_id).await?))
    }

    pub async fn delete(&self, user_id: &str) -> Result<(), CustodyError> {
        if !self.db.delete_custodial_key(user_id).await? {
            return Err(CustodyError::NoKeys);
        }
        info!(user_id, "Custodial key deleted");
        Ok(())
    }

    /// Decrypt the custodied posting key and email it as a partial backup.
    ///
    /// Failures are returned, never swallowed: a silent failure would look
    /// like the key is safe when it is not.
    #[instrument(skip(self))]
    pub async fn resend_backup(&self, user_id: &str) -> Result<(), CustodyError> {
        let record = self
            .db
            .get_custodial_key(user_id)
            .await?
            .ok_or(CustodyError::NoKeys)?;

        let to = self
            .db
            .get_user(user_id)
            .await?
            .email
            .filter(|e| !e.trim().is_empty())
            .ok_or(CustodyError::ContactNotFound)?;

        let posting_wif = self
            .vault
            .decrypt_hex_to_string(&record.encrypted_secret, &record.iv, &record.auth_tag)
            .inspect_err(|e| warn!(user_id, error = %e, "Custodial key failed to decrypt"))?;

        let message = templates::posting_backup_email(&to, &record.hive_username, &posting_wif);
        match self.notifier.send(&message).await {
            Ok(id) => {
                self.side_effects
                    .record(BACKUP_EMAIL, user_id, None, Ok(id.as_deref()))
                    .await;
            }
            Err(e) => {
                let detail = e.to_string();
                self.side_effects
                    .record(BACKUP_EMAIL, user_id, None, Err(&detail))
                    .await;
                return Err(e.into());
            }
        }

        self.db.touch_custodial_key(user_id).await?;
        Ok(())
    }
}
