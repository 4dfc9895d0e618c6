//! `/sponsorships` routes.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use super::error::ApiError;
use super::extract::{ApiJson, AuthenticatedUser};
use super::{AppState, rfc3339};
use crate::sponsorship::{CreateSponsorship, Eligibility, GeneratedKeys, ProcessStep};
use crate::storage::{CostType, SponsorshipStatus};

#[derive(Debug, Deserialize)]
pub struct CreateRequest {
    #[serde(default)]
    pub lite_user_id: String,
    #[serde(default)]
    pub hive_username: String,
    pub cost_type: CostType,
    #[serde(default)]
    pub cost_amount: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateResponse {
    pub sponsorship_id: String,
    pub status: SponsorshipStatus,
    pub hive_username: String,
}

/// `POST /sponsorships/create`
pub async fn create(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    ApiJson(req): ApiJson<CreateRequest>,
) -> Result<(StatusCode, Json<CreateResponse>), ApiError> {
    let sponsorship = state
        .sponsorships
        .create(&CreateSponsorship {
            sponsor_user_id: user.user_id,
            lite_user_id: req.lite_user_id,
            hive_username: req.hive_username,
            cost_type: req.cost_type,
            cost_amount: req.cost_amount,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateResponse {
            sponsorship_id: sponsorship.id,
            status: sponsorship.status,
            hive_username: sponsorship.hive_username,
        }),
    ))
}

#[derive(Deserialize)]
pub struct ProcessRequest {
    pub sponsorship_id: String,
    pub transaction_id: String,
    pub keys: GeneratedKeys,
}

/// `POST /sponsorships/process`
///
/// A failed workflow still answers with the report under `details`: 400
/// when the chain could not confirm the account, 500 otherwise. The failing
/// step's error text only travels in `detail`.
pub async fn process(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    ApiJson(req): ApiJson<ProcessRequest>,
) -> Result<Response, ApiError> {
    let mut report = state
        .sponsorships
        .process(&user.user_id, &req.sponsorship_id, &req.transaction_id, &req.keys)
        .await?;

    match report.failed_step {
        None => Ok(Json(serde_json::json!({
            "success": true,
            "details": report,
        }))
        .into_response()),
        Some(ProcessStep::Verify) => {
            let detail = report.error.take().unwrap_or_default();
            Err(ApiError {
                detail: Some(detail),
                ..ApiError::new(
                    StatusCode::BAD_REQUEST,
                    "verification_failed",
                    "Transaction could not be verified on chain",
                )
            }
            .with_field("details", serde_json::to_value(&report).unwrap_or_default()))
        }
        Some(step) => {
            let detail = report.error.take().unwrap_or_default();
            let err = ApiError::internal("workflow_failed", detail)
                .with_field("failed_step", serde_json::to_value(step).unwrap_or_default())
                .with_field("details", serde_json::to_value(&report).unwrap_or_default());
            Err(err)
        }
    }
}

/// `GET /sponsorships/eligible/{user_id}`
pub async fn eligible(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    Path(user_id): Path<String>,
) -> Result<Json<Eligibility>, ApiError> {
    Ok(Json(state.sponsorships.eligibility(&user_id).await?))
}

#[derive(Debug, Serialize)]
pub struct MyInfoResponse {
    pub sponsored: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sponsor_username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hive_username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sponsored_at: Option<String>,
}

/// `GET /sponsorships/my-info`
pub async fn my_info(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<MyInfoResponse>, ApiError> {
    let info = state.sponsorships.my_info(&user.user_id).await?;
    Ok(Json(MyInfoResponse {
        sponsored: info.sponsored,
        sponsor_username: info.sponsor_username,
        hive_username: info.hive_username,
        sponsored_at: info.sponsored_at.map(rfc3339),
    }))
}
