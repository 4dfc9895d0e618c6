//! Request extractors: the authenticated user and JSON bodies with API
//! errors.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, FromRequestParts, Request};
use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::request::Parts;
use tracing::debug;

use super::AppState;
use super::error::ApiError;

/// The user owning the session token on the request.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: String,
    /// Raw session token, kept for logout.
    pub token: String,
}

/// Token from `Authorization: Bearer`, else from the session cookie.
pub fn session_token(parts: &Parts, cookie_name: &str) -> Option<String> {
    let bearer = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    parts
        .headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|header| header.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == cookie_name)
        .map(|(_, value)| value.trim().to_string())
        .filter(|t| !t.is_empty())
}

impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = session_token(parts, &state.session_cookie)
            .ok_or_else(|| ApiError::unauthorized("unauthorized", "Authentication required"))?;
        let user_id = state.sessions.validate(&token).await?;
        let token_prefix: String = token.chars().take(8).collect();
        debug!(user_id = %user_id, token_prefix = %token_prefix, "Request authenticated");
        Ok(Self { user_id, token })
    }
}

/// `Json<T>` whose rejection is a 400 [`ApiError`].
pub struct ApiJson<T>(pub T);

impl<T, S> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(ApiError::validation(rejection.body_text())),
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use axum::http::Request;

    use super::*;

    fn parts(headers: &[(&str, &str)]) -> Parts {
        let mut builder = Request::builder().uri("/");
        for &(name, value) in headers {
            builder = builder.header(name, value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn bearer_wins_over_cookie() {
        let p = parts(&[
            ("authorization", "Bearer abc"),
            ("cookie", "hivelink_session=def"),
        ]);
        assert_eq!(session_token(&p, "hivelink_session").as_deref(), Some("abc"));
    }

    #[test]
    fn cookie_is_found_among_others() {
        let p = parts(&[("cookie", "theme=dark; hivelink_session=def ; other=1")]);
        assert_eq!(session_token(&p, "hivelink_session").as_deref(), Some("def"));
        assert!(session_token(&p, "missing").is_none());
    }

    #[test]
    fn empty_credentials_are_absent() {
        let p = parts(&[("authorization", "Bearer "), ("cookie", "hivelink_session=")]);
        assert!(session_token(&p, "hivelink_session").is_none());
    }
}
