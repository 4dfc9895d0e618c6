//! API error type and the mapping from domain errors.
//!
//! Every failure leaves the server as `{"error": reason, "message": ...}`
//! plus optional extra fields. `detail` carries the underlying error text
//! and is stripped, together with internal messages, in production mode by
//! [`super::redact_errors`].

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{Map, Value};
use tracing::{error, warn};

use crate::auth::AuthError;
use crate::identity::{LinkError, ProofError};
use crate::sponsorship::{CustodyError, SponsorshipError};
use crate::storage::DatabaseError;

/// Generic message shown instead of internal error text in production.
pub const GENERIC_MESSAGE: &str = "An internal error occurred";

#[derive(Debug, Clone)]
pub struct ApiError {
    pub status: StatusCode,
    pub reason: &'static str,
    pub message: String,
    pub detail: Option<String>,
    /// Message text comes from an upstream service or a server-side failure
    /// and must not reach clients in production.
    pub internal: bool,
    pub extra: Map<String, Value>,
}

impl ApiError {
    pub fn new(status: StatusCode, reason: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            reason,
            message: message.into(),
            detail: None,
            internal: false,
            extra: Map::new(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "validation_error", message)
    }

    pub fn unauthorized(reason: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, reason, message)
    }

    pub fn not_found(reason: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, reason, message)
    }

    /// A server-side failure. `detail` is logged and only returned outside
    /// production.
    pub fn internal(reason: &'static str, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        Self {
            detail: Some(detail.clone()),
            internal: true,
            ..Self::new(StatusCode::INTERNAL_SERVER_ERROR, reason, detail)
        }
    }

    /// An upstream service answered badly or not at all.
    pub fn upstream(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_GATEWAY,
            ..Self::internal("upstream_error", detail)
        }
    }

    #[must_use]
    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }

    /// JSON body; `redact` drops `detail` and hides internal messages.
    pub fn body(&self, redact: bool) -> Value {
        let mut body = self.extra.clone();
        body.insert("error".to_string(), Value::from(self.reason));
        let message = if redact && self.internal {
            GENERIC_MESSAGE
        } else {
            self.message.as_str()
        };
        body.insert("message".to_string(), Value::from(message));
        if !redact {
            if let Some(detail) = &self.detail {
                body.insert("detail".to_string(), Value::from(detail.as_str()));
            }
        }
        Value::Object(body)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = %self.status, reason = self.reason, detail = ?self.detail, "Request failed");
        }
        let mut response = (self.status, Json(self.body(false))).into_response();
        // Kept so the production layer can rebuild a redacted body.
        response.extensions_mut().insert(self);
        response
    }
}

impl From<DatabaseError> for ApiError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::NotFound(what) => Self::not_found("not_found", format!("{what} not found")),
            DatabaseError::Conflict(msg) => Self {
                detail: Some(msg),
                ..Self::new(StatusCode::CONFLICT, "conflict", "Resource already exists")
            },
            other => Self::internal("database_error", other.to_string()),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Unauthorized => Self::unauthorized("unauthorized", e.to_string()),
            AuthError::SessionExpired => Self::unauthorized("session_expired", e.to_string()),
            AuthError::Database(db) => db.into(),
        }
    }
}

impl From<LinkError> for ApiError {
    fn from(e: LinkError) -> Self {
        match e {
            LinkError::Database(db) => db.into(),
        }
    }
}

impl From<ProofError> for ApiError {
    fn from(e: ProofError) -> Self {
        let message = e.to_string();
        match e {
            ProofError::InvalidFormat(_) => {
                Self::new(StatusCode::BAD_REQUEST, "invalid_format", message)
            }
            ProofError::InvalidMessageFormat(_) => {
                Self::new(StatusCode::BAD_REQUEST, "invalid_message_format", message)
            }
            ProofError::ExternalAccountNotFound(_) => {
                Self::not_found("external_account_not_found", message)
            }
            ProofError::InvalidSignature(_) => {
                Self::new(StatusCode::BAD_REQUEST, "invalid_signature", message)
            }
            ProofError::SignatureMismatch { .. } => {
                Self::new(StatusCode::BAD_REQUEST, "signature_mismatch", message)
            }
            ProofError::Directory(_) => Self::upstream(message),
            ProofError::Link(link) => link.into(),
        }
    }
}

impl From<SponsorshipError> for ApiError {
    fn from(e: SponsorshipError) -> Self {
        let message = e.to_string();
        match e {
            SponsorshipError::Validation(_) => Self::validation(message),
            SponsorshipError::SelfSponsorship => {
                Self::new(StatusCode::BAD_REQUEST, "self_sponsorship", message)
            }
            SponsorshipError::UserNotFound(_) => Self::not_found("user_not_found", message),
            SponsorshipError::SponsorLacksChainAccount => {
                Self::new(StatusCode::FORBIDDEN, "sponsor_lacks_chain_account", message)
            }
            SponsorshipError::InvalidAccountName(_) => {
                Self::new(StatusCode::BAD_REQUEST, "invalid_account_name", message)
            }
            SponsorshipError::NameTaken(_) => {
                Self::new(StatusCode::BAD_REQUEST, "name_taken", message)
            }
            SponsorshipError::AlreadySponsoredOrPending(status) => {
                Self::new(StatusCode::CONFLICT, "already_sponsored", message)
                    .with_field("status", status.as_str())
            }
            SponsorshipError::RecipientHasChainAccount => {
                Self::new(StatusCode::CONFLICT, "recipient_has_chain_account", message)
            }
            SponsorshipError::NotFound(_) => Self::not_found("sponsorship_not_found", message),
            SponsorshipError::NotSponsor => Self::new(StatusCode::FORBIDDEN, "not_sponsor", message),
            SponsorshipError::InvalidStateTransition { current } => {
                Self::new(StatusCode::BAD_REQUEST, "invalid_state", message)
                    .with_field("status", current.as_str())
            }
            SponsorshipError::Chain(_) => Self::upstream(message),
            SponsorshipError::Database(db) => db.into(),
        }
    }
}

impl From<CustodyError> for ApiError {
    fn from(e: CustodyError) -> Self {
        let message = e.to_string();
        match e {
            CustodyError::IdentityNotLinked => {
                Self::new(StatusCode::BAD_REQUEST, "identity_not_linked", message)
            }
            CustodyError::InvalidKey(_) => Self::new(StatusCode::BAD_REQUEST, "invalid_key", message),
            CustodyError::KeyMismatch { .. } => {
                Self::new(StatusCode::BAD_REQUEST, "key_mismatch", message)
            }
            CustodyError::NoKeys => Self::not_found("no_keys", message),
            CustodyError::ContactNotFound => {
                Self::new(StatusCode::BAD_REQUEST, "contact_not_found", message)
            }
            CustodyError::Chain(_) => Self::upstream(message),
            CustodyError::Crypto(_) => {
                warn!("Custodial key could not be decrypted");
                Self::internal("decrypt_failed", message)
            }
            CustodyError::Notification(_) => Self::internal("send_failed", message),
            CustodyError::Database(db) => db.into(),
        }
    }
}
