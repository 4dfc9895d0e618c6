//! Account sponsorship and credential custody.
//!
//! - [`SponsorshipService`] runs the create / process workflow.
//! - [`CustodyService`] stores, reports, deletes and re-issues the custodied
//!   posting credential.
//! - [`SideEffectRecorder`] gives best-effort steps an observable outcome.

pub mod custody;
pub mod orchestrator;
pub mod side_effects;

#[cfg(test)]
mod custody_tests;
#[cfg(test)]
mod orchestrator_tests;

use std::fmt;

use hivelink_core::db::DatabaseError;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

pub use custody::{CustodyError, CustodyService, KeyStatus};
pub use orchestrator::SponsorshipService;
pub use side_effects::SideEffectRecorder;

use crate::chain::{AccountNameError, ChainError};
use crate::storage::{CostType, SponsorshipStatus};

/// Keys generated client-side for a new account. Only `posting` is ever
/// custodied; the rest are delivered once by email.
#[derive(Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct GeneratedKeys {
    pub posting: String,
    #[serde(default)]
    pub active: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub memo: Option<String>,
    #[serde(default)]
    pub master_password: Option<String>,
}

impl fmt::Debug for GeneratedKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratedKeys")
            .field("posting", &"<redacted>")
            .field("active", &self.active.as_ref().map(|_| "<redacted>"))
            .field("owner", &self.owner.as_ref().map(|_| "<redacted>"))
            .field("memo", &self.memo.as_ref().map(|_| "<redacted>"))
            .field("master_password", &self.master_password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Input to [`SponsorshipService::create`].
#[derive(Debug, Clone)]
pub struct CreateSponsorship {
    pub sponsor_user_id: String,
    pub lite_user_id: String,
    pub hive_username: String,
    pub cost_type: CostType,
    pub cost_amount: Option<String>,
}

/// Workflow step that stopped a `Process` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStep {
    Verify,
    ResolveContact,
    Custody,
    AttachIdentity,
}

/// Structured outcome of [`SponsorshipService::process`].
#[derive(Debug, Clone, Serialize)]
pub struct ProcessReport {
    pub sponsorship_id: String,
    pub status: SponsorshipStatus,
    pub account_created: bool,
    pub key_encrypted: bool,
    pub identity_linked: bool,
    pub email_sent: bool,
    pub profile_synced: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<ProcessStep>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProcessReport {
    fn new(sponsorship_id: &str) -> Self {
        Self {
            sponsorship_id: sponsorship_id.to_string(),
            status: SponsorshipStatus::Processing,
            account_created: false,
            key_encrypted: false,
            identity_linked: false,
            email_sent: false,
            profile_synced: false,
            failed_step: None,
            error: None,
        }
    }

    fn failed(mut self, step: ProcessStep, reason: String) -> Self {
        self.status = SponsorshipStatus::Failed;
        self.failed_step = Some(step);
        self.error = Some(reason);
        self
    }
}

/// Answer to "can this user be sponsored?".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Eligibility {
    pub eligible: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// The acting user's own sponsorship, if completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SponsorshipInfo {
    pub sponsored: bool,
    pub sponsor_username: Option<String>,
    pub hive_username: Option<String>,
    /// Unix seconds.
    pub sponsored_at: Option<i64>,
}

#[derive(Debug, thiserror::Error)]
pub enum SponsorshipError {
    #[error("{0}")]
    Validation(String),

    #[error("Cannot sponsor yourself")]
    SelfSponsorship,

    #[error("User {0} not found")]
    UserNotFound(String),

    #[error("Sponsor has no linked chain account")]
    SponsorLacksChainAccount,

    #[error("Invalid account name: {0}")]
    InvalidAccountName(#[from] AccountNameError),

    #[error("Account name {0} is already taken")]
    NameTaken(String),

    #[error("User already has a {0} sponsorship")]
    AlreadySponsoredOrPending(SponsorshipStatus),

    #[error("User already has a chain account")]
    RecipientHasChainAccount,

    #[error("Sponsorship {0} not found")]
    NotFound(String),

    #[error("Only the sponsor can process this sponsorship")]
    NotSponsor,

    #[error("Sponsorship is {current}, expected pending")]
    InvalidStateTransition { current: SponsorshipStatus },

    #[error("Chain lookup failed: {0}")]
    Chain(#[from] ChainError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}
