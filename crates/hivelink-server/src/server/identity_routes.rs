//! `/identities` routes: listing, challenges and proof verification.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use hivelink_crypto::normalize_address;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::ApiError;
use super::extract::{ApiJson, AuthenticatedUser};
use super::{AppState, rfc3339};
use crate::identity::proof::parse_fid;
use crate::identity::{Challenge, LinkResult};
use crate::storage::{Identity, IdentityType};

#[derive(Debug, Serialize)]
pub struct IdentityView {
    pub id: String,
    #[serde(rename = "type")]
    pub identity_type: IdentityType,
    pub handle: Option<String>,
    pub address: Option<String>,
    pub external_id: Option<String>,
    pub is_primary: bool,
    pub is_sponsored: bool,
    pub sponsor_user_id: Option<String>,
    pub metadata: Value,
    pub verified_at: String,
}

impl From<Identity> for IdentityView {
    fn from(identity: Identity) -> Self {
        let metadata = serde_json::from_str(&identity.metadata).unwrap_or(Value::Null);
        Self {
            id: identity.id,
            identity_type: identity.identity_type,
            handle: identity.handle,
            address: identity.address,
            external_id: identity.external_id,
            is_primary: identity.is_primary,
            is_sponsored: identity.is_sponsored,
            sponsor_user_id: identity.sponsor_user_id,
            metadata,
            verified_at: rfc3339(identity.verified_at),
        }
    }
}

/// `GET /identities`
pub async fn list(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<Value>, ApiError> {
    let identities: Vec<IdentityView> = state
        .linker
        .list(&user.user_id)
        .await?
        .into_iter()
        .map(IdentityView::from)
        .collect();
    Ok(Json(serde_json::json!({ "identities": identities })))
}

#[derive(Debug, Deserialize)]
pub struct SocialChallengeRequest {
    pub external_id: String,
}

/// `POST /identities/social/challenge`
pub async fn social_challenge(
    user: AuthenticatedUser,
    ApiJson(req): ApiJson<SocialChallengeRequest>,
) -> Result<Json<Challenge>, ApiError> {
    let fid = parse_fid(&req.external_id)?;
    Ok(Json(Challenge::social(&user.user_id, fid)))
}

#[derive(Debug, Deserialize)]
pub struct SocialVerifyRequest {
    pub external_id: String,
    pub signature: String,
    pub message: String,
}

/// `POST /identities/social/verify`
pub async fn social_verify(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    ApiJson(req): ApiJson<SocialVerifyRequest>,
) -> Result<Response, ApiError> {
    let result = state
        .proofs
        .verify_social(&user.user_id, &req.external_id, &req.message, &req.signature)
        .await?;
    link_response(result)
}

#[derive(Debug, Deserialize)]
pub struct WalletChallengeRequest {
    pub address: String,
}

/// `POST /identities/wallet/challenge`
pub async fn wallet_challenge(
    user: AuthenticatedUser,
    ApiJson(req): ApiJson<WalletChallengeRequest>,
) -> Result<Json<Challenge>, ApiError> {
    let address = normalize_address(&req.address).ok_or_else(|| {
        ApiError::new(
            StatusCode::BAD_REQUEST,
            "invalid_format",
            "address must be a 0x-prefixed 20-byte hex string",
        )
    })?;
    Ok(Json(Challenge::wallet(&user.user_id, &address)))
}

#[derive(Debug, Deserialize)]
pub struct WalletVerifyRequest {
    pub address: String,
    pub signature: String,
    pub message: String,
}

/// `POST /identities/wallet/verify`
pub async fn wallet_verify(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    ApiJson(req): ApiJson<WalletVerifyRequest>,
) -> Result<Response, ApiError> {
    let result = state
        .proofs
        .verify_wallet(&user.user_id, &req.address, &req.message, &req.signature)
        .await?;
    link_response(result)
}

fn link_response(result: LinkResult) -> Result<Response, ApiError> {
    match result {
        LinkResult::Linked(identity) => Ok(Json(serde_json::json!({
            "identity": IdentityView::from(identity),
            "already_linked": false,
        }))
        .into_response()),
        LinkResult::AlreadyLinkedToSelf(identity) => Ok(Json(serde_json::json!({
            "identity": IdentityView::from(identity),
            "already_linked": true,
        }))
        .into_response()),
        LinkResult::MergeRequired { existing_user_id } => Err(ApiError::new(
            StatusCode::CONFLICT,
            "merge_required",
            "This identity is linked to another account",
        )
        .with_field("existing_user_id", existing_user_id)),
        LinkResult::HandleTaken { existing_user_id } => Err(ApiError::new(
            StatusCode::CONFLICT,
            "handle_conflict",
            "This handle is already linked to a different identity",
        )
        .with_field("existing_user_id", existing_user_id)),
    }
}
