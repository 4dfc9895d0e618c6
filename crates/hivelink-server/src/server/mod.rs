//! HTTP surface.
//!
//! JSON over HTTP with opaque session tokens (bearer header or cookie).
//! Handlers stay thin: they extract, call one service method and map the
//! domain error into [`ApiError`].

mod auth_routes;
pub mod error;
pub mod extract;
mod health;
mod identity_routes;
mod key_routes;
mod sponsorship_routes;

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, SecondsFormat};
use hivelink_core::config::ServerConfig;
use hivelink_crypto::CredentialVault;
use tower_http::trace::TraceLayer;

pub use error::ApiError;
pub use extract::AuthenticatedUser;

use crate::auth::SessionValidator;
use crate::chain::{ChainVerifier, ProfilePublisher};
use crate::directory::IdentityDirectory;
use crate::identity::{IdentityLinker, ProofVerifier};
use crate::notify::NotificationDispatcher;
use crate::sponsorship::{CustodyService, SponsorshipService};
use crate::storage::AppDatabase;

/// External services the server talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub directory: Arc<dyn IdentityDirectory>,
    pub chain: Arc<dyn ChainVerifier>,
    pub publisher: Arc<dyn ProfilePublisher>,
    pub notifier: Arc<dyn NotificationDispatcher>,
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub db: AppDatabase,
    pub sessions: SessionValidator,
    pub linker: IdentityLinker,
    pub proofs: ProofVerifier,
    pub sponsorships: SponsorshipService,
    pub custody: CustodyService,
    pub session_cookie: Arc<str>,
    pub production: bool,
}

impl AppState {
    pub fn new(
        db: AppDatabase,
        services: Collaborators,
        vault: Arc<CredentialVault>,
        config: &ServerConfig,
    ) -> Self {
        let linker = IdentityLinker::new(db.clone());
        Self {
            sessions: SessionValidator::new(db.clone()),
            proofs: ProofVerifier::new(services.directory, linker.clone()),
            linker,
            sponsorships: SponsorshipService::new(
                db.clone(),
                Arc::clone(&services.chain),
                services.publisher,
                Arc::clone(&services.notifier),
                Arc::clone(&vault),
            ),
            custody: CustodyService::new(db.clone(), services.chain, services.notifier, vault),
            db,
            session_cookie: Arc::from(config.session_cookie.as_str()),
            production: config.production,
        }
    }
}

/// Build the application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/auth/logout", post(auth_routes::logout))
        .route("/identities", get(identity_routes::list))
        .route(
            "/identities/social/challenge",
            post(identity_routes::social_challenge),
        )
        .route("/identities/social/verify", post(identity_routes::social_verify))
        .route(
            "/identities/wallet/challenge",
            post(identity_routes::wallet_challenge),
        )
        .route("/identities/wallet/verify", post(identity_routes::wallet_verify))
        .route("/sponsorships/create", post(sponsorship_routes::create))
        .route("/sponsorships/process", post(sponsorship_routes::process))
        .route(
            "/sponsorships/eligible/{user_id}",
            get(sponsorship_routes::eligible),
        )
        .route("/sponsorships/my-info", get(sponsorship_routes::my_info))
        .route(
            "/keys/posting",
            get(key_routes::status)
                .post(key_routes::store)
                .delete(key_routes::delete),
        )
        .route("/keys/resend-backup", post(key_routes::resend_backup))
        .layer(middleware::from_fn_with_state(state.clone(), redact_errors))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// In production, rebuild error bodies without diagnostic detail.
pub async fn redact_errors(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let response = next.run(request).await;
    if !state.production {
        return response;
    }
    match response.extensions().get::<ApiError>().cloned() {
        Some(err) => (err.status, Json(err.body(true))).into_response(),
        None => response,
    }
}

/// Unix seconds as UTC RFC 3339.
pub fn rfc3339(ts: i64) -> String {
    DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_default()
}
