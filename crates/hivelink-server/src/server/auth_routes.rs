//! `/auth` routes.

use axum::extract::State;
use axum::http::StatusCode;

use super::AppState;
use super::error::ApiError;
use super::extract::AuthenticatedUser;

/// `POST /auth/logout`: revoke the presented session.
pub async fn logout(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<StatusCode, ApiError> {
    state.sessions.revoke(&user.token).await?;
    Ok(StatusCode::NO_CONTENT)
}
