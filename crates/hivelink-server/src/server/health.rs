//! `GET /health`: database liveness plus recent side-effect failures.

use std::collections::BTreeMap;

use axum::Json;
use axum::extract::State;
use hivelink_core::db::unix_timestamp;
use serde::Serialize;

use super::AppState;
use super::error::ApiError;
use crate::sponsorship::side_effects::ALL_KINDS;

/// Window for the failure counts, in seconds.
const FAILURE_WINDOW_SECS: i64 = 24 * 60 * 60;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    /// Best-effort step failures over the last day, by kind.
    pub side_effect_failures_24h: BTreeMap<&'static str, i64>,
}

pub async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    sqlx::query("SELECT 1")
        .execute(state.db.pool())
        .await
        .map_err(|e| ApiError::internal("database_unavailable", e.to_string()))?;

    let since = unix_timestamp() - FAILURE_WINDOW_SECS;
    let mut failures = BTreeMap::new();
    for kind in ALL_KINDS {
        failures.insert(kind, state.db.count_side_effect_failures(kind, since).await?);
    }

    Ok(Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        side_effect_failures_24h: failures,
    }))
}
