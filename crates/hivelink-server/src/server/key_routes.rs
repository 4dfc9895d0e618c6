//! `/keys` routes for the custodied posting credential.

use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::error::ApiError;
use super::extract::{ApiJson, AuthenticatedUser};
use super::{AppState, rfc3339};
use crate::sponsorship::KeyStatus;
use crate::storage::KeyType;

#[derive(Debug, Serialize)]
pub struct KeyStatusView {
    pub stored: bool,
    pub custody: Option<KeyType>,
    /// `active` when a key is held, `none` otherwise.
    pub status: &'static str,
    pub hive_username: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub last_used_at: Option<String>,
}

impl From<KeyStatus> for KeyStatusView {
    fn from(s: KeyStatus) -> Self {
        Self {
            stored: s.stored,
            custody: s.custody,
            status: if s.stored { "active" } else { "none" },
            hive_username: s.hive_username,
            created_at: s.created_at.map(rfc3339),
            updated_at: s.updated_at.map(rfc3339),
            last_used_at: s.last_used_at.map(rfc3339),
        }
    }
}

/// `GET /keys/posting`
pub async fn status(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<KeyStatusView>, ApiError> {
    Ok(Json(state.custody.status(&user.user_id).await?.into()))
}

#[derive(Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct StoreKeyRequest {
    pub posting_key: String,
}

/// `POST /keys/posting`
pub async fn store(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    ApiJson(req): ApiJson<StoreKeyRequest>,
) -> Result<Json<KeyStatusView>, ApiError> {
    let posting_key = req.posting_key.trim();
    if posting_key.is_empty() {
        return Err(ApiError::validation("posting_key is required"));
    }
    Ok(Json(
        state
            .custody
            .store_user_key(&user.user_id, posting_key)
            .await?
            .into(),
    ))
}

#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub success: bool,
    pub message: &'static str,
}

/// `DELETE /keys/posting`
pub async fn delete(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<ActionResponse>, ApiError> {
    state.custody.delete(&user.user_id).await?;
    Ok(Json(ActionResponse {
        success: true,
        message: "Posting key deleted",
    }))
}

/// `POST /keys/resend-backup`
pub async fn resend_backup(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<ActionResponse>, ApiError> {
    state.custody.resend_backup(&user.user_id).await?;
    Ok(Json(ActionResponse {
        success: true,
        message: "Backup sent to your email address",
    }))
}
