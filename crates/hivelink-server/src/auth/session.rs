//! Session validation and issuance.

use hivelink_core::db::{DatabaseError, unix_timestamp};
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::storage::{AppDatabase, Session};

/// Raw token length in bytes before hex encoding.
const TOKEN_BYTES: usize = 32;

/// Errors from session handling.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No token, or a token that matches no session.
    #[error("Authentication required")]
    Unauthorized,

    /// The session exists but was revoked or has expired.
    #[error("Session expired")]
    SessionExpired,

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// A freshly issued session. `token` is shown to the client once and never
/// stored.
#[derive(Debug)]
pub struct IssuedSession {
    pub token: String,
    pub session: Session,
}

/// Resolves opaque session tokens to user ids.
#[derive(Clone)]
pub struct SessionValidator {
    db: AppDatabase,
}

impl SessionValidator {
    pub const fn new(db: AppDatabase) -> Self {
        Self { db }
    }

    /// Hash a token for storage and lookup.
    pub fn hash_token(token: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Resolve `raw_token` to the owning user id.
    pub async fn validate(&self, raw_token: &str) -> Result<String, AuthError> {
        Ok(self.validate_session(raw_token).await?.user_id)
    }

    /// Like [`Self::validate`] but returns the whole session row.
    pub async fn validate_session(&self, raw_token: &str) -> Result<Session, AuthError> {
        if raw_token.is_empty() {
            return Err(AuthError::Unauthorized);
        }

        let hash = Self::hash_token(raw_token);
        let session = self
            .db
            .get_session_by_hash(&hash)
            .await?
            .ok_or(AuthError::Unauthorized)?;

        if !session.is_usable_at(unix_timestamp()) {
            debug!(session_id = %session.id, "Rejected revoked or expired session");
            return Err(AuthError::SessionExpired);
        }

        Ok(session)
    }

    /// Create a session for `user_id` valid for `ttl_secs`.
    pub async fn issue(&self, user_id: &str, ttl_secs: i64) -> Result<IssuedSession, AuthError> {
        let mut raw = [0u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut raw);
        let token = hex::encode(raw);

        let id = uuid::Uuid::new_v4().to_string();
        let session = self
            .db
            .create_session(
                &id,
                user_id,
                &Self::hash_token(&token),
                unix_timestamp() + ttl_secs,
            )
            .await?;

        info!(user_id, session_id = %session.id, "Session issued");
        Ok(IssuedSession { token, session })
    }

    /// Revoke the session identified by `raw_token`.
    pub async fn revoke(&self, raw_token: &str) -> Result<(), AuthError> {
        let session = self.validate_session(raw_token).await?;
        self.db.revoke_session(&session.id).await?;
        info!(user_id = %session.user_id, session_id = %session.id, "Session revoked");
        Ok(())
    }
}
