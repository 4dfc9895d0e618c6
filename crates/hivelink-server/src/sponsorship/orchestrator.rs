//! Sponsorship workflow.
//!
//! `pending -> processing -> completed | failed`, forward only. `process`
//! claims the row with a compare-and-set, runs the required steps (verify,
//! resolve contact, custody + attach + complete in one transaction), then
//! the best-effort steps (profile sync, credential email) concurrently.

use std::sync::{Arc, LazyLock};

use hivelink_core::db::unix_timestamp;
use hivelink_crypto::{ChainPrivateKey, CredentialVault};
use regex::Regex;
use tracing::{info, instrument, warn};

use super::side_effects::{CREDENTIAL_EMAIL, PROFILE_SYNC};
use super::{
    CreateSponsorship, Eligibility, GeneratedKeys, ProcessReport, ProcessStep, SideEffectRecorder,
    SponsorshipError, SponsorshipInfo,
};
use crate::chain::{ChainVerifier, ProfileMetadata, ProfilePublisher, validate_account_name};
use crate::identity::IdentityCandidate;
use crate::notify::{NotificationDispatcher, templates};
use crate::storage::{
    AppDatabase, CostType, DatabaseError, FinalizeOutcome, FinalizeSponsorship, IdentityType,
    KeyType, NewCustodialKey, NewSponsorship, Sponsorship, SponsorshipStatus, User,
};

static COST_AMOUNT: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^\d+(\.\d{1,3})?$").ok());

static TRANSACTION_ID: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[0-9a-fA-F]{40}$").ok());

fn is_match(pattern: &LazyLock<Option<Regex>>, value: &str) -> bool {
    pattern.as_ref().is_some_and(|re| re.is_match(value))
}

#[derive(Clone)]
pub struct SponsorshipService {
    db: AppDatabase,
    chain: Arc<dyn ChainVerifier>,
    publisher: Arc<dyn ProfilePublisher>,
    notifier: Arc<dyn NotificationDispatcher>,
    vault: Arc<CredentialVault>,
    side_effects: SideEffectRecorder,
}

impl SponsorshipService {
    pub fn new(
        db: AppDatabase,
        chain: Arc<dyn ChainVerifier>,
        publisher: Arc<dyn ProfilePublisher>,
        notifier: Arc<dyn NotificationDispatcher>,
        vault: Arc<CredentialVault>,
    ) -> Self {
        let side_effects = SideEffectRecorder::new(db.clone());
        Self {
            db,
            chain,
            publisher,
            notifier,
            vault,
            side_effects,
        }
    }

    async fn require_user(&self, user_id: &str) -> Result<User, SponsorshipError> {
        self.db.get_user(user_id).await.map_err(|e| match e {
            DatabaseError::NotFound(_) => SponsorshipError::UserNotFound(user_id.to_string()),
            other => SponsorshipError::Database(other),
        })
    }

    /// Name shown for a user: their primary chain account, else their handle.
    async fn public_name(&self, user: &User) -> Result<String, SponsorshipError> {
        Ok(self
            .db
            .get_primary_identity(&user.id, IdentityType::ChainAccount)
            .await?
            .and_then(|identity| identity.handle)
            .unwrap_or_else(|| user.handle.clone()))
    }

    /// Create a `pending` sponsorship. Preconditions are checked in order and
    /// nothing is written unless all pass.
    #[instrument(skip(self, request), fields(sponsor = %request.sponsor_user_id, recipient = %request.lite_user_id))]
    pub async fn create(&self, request: &CreateSponsorship) -> Result<Sponsorship, SponsorshipError> {
        let hive_username = request.hive_username.trim().to_ascii_lowercase();
        if request.lite_user_id.trim().is_empty() || hive_username.is_empty() {
            return Err(SponsorshipError::Validation(
                "lite_user_id and hive_username are required".to_string(),
            ));
        }
        if request.sponsor_user_id == request.lite_user_id {
            return Err(SponsorshipError::SelfSponsorship);
        }
        let cost_amount = validate_cost(request.cost_type, request.cost_amount.as_deref())?;

        self.require_user(&request.lite_user_id).await?;
        if !self
            .db
            .has_identity_type(&request.sponsor_user_id, IdentityType::ChainAccount)
            .await?
        {
            return Err(SponsorshipError::SponsorLacksChainAccount);
        }
        if let Some(existing) = self
            .db
            .get_active_sponsorship_for_recipient(&request.lite_user_id)
            .await?
        {
            return Err(SponsorshipError::AlreadySponsoredOrPending(existing.status));
        }
        if self
            .db
            .has_identity_type(&request.lite_user_id, IdentityType::ChainAccount)
            .await?
        {
            return Err(SponsorshipError::RecipientHasChainAccount);
        }

        validate_account_name(&hive_username)?;
        if self.chain.account_exists(&hive_username).await? {
            return Err(SponsorshipError::NameTaken(hive_username));
        }

        let sponsorship = self
            .db
            .create_sponsorship(&NewSponsorship {
                lite_user_id: &request.lite_user_id,
                sponsor_user_id: &request.sponsor_user_id,
                hive_username: &hive_username,
                cost_type: request.cost_type,
                cost_amount: cost_amount.as_deref(),
            })
            .await
            .map_err(|e| match e {
                // Lost the race against a concurrent create.
                DatabaseError::Conflict(_) => {
                    SponsorshipError::AlreadySponsoredOrPending(SponsorshipStatus::Pending)
                }
                other => SponsorshipError::Database(other),
            })?;

        info!(sponsorship_id = %sponsorship.id, hive_username = %sponsorship.hive_username, "Sponsorship created");
        Ok(sponsorship)
    }

    /// Run a `pending` sponsorship to `completed` or `failed`.
    ///
    /// Errors are returned only for requests rejected before the row is
    /// claimed. Once claimed, every outcome is a [`ProcessReport`].
    #[instrument(skip(self, keys))]
    pub async fn process(
        &self,
        acting_user_id: &str,
        sponsorship_id: &str,
        transaction_id: &str,
        keys: &GeneratedKeys,
    ) -> Result<ProcessReport, SponsorshipError> {
        let sponsorship = self.db.get_sponsorship(sponsorship_id).await.map_err(|e| match e {
            DatabaseError::NotFound(_) => SponsorshipError::NotFound(sponsorship_id.to_string()),
            other => SponsorshipError::Database(other),
        })?;
        if sponsorship.sponsor_user_id != acting_user_id {
            return Err(SponsorshipError::NotSponsor);
        }
        if sponsorship.status != SponsorshipStatus::Pending {
            return Err(SponsorshipError::InvalidStateTransition {
                current: sponsorship.status,
            });
        }

        let transaction_id = transaction_id.trim().to_ascii_lowercase();
        if !is_match(&TRANSACTION_ID, &transaction_id) {
            return Err(SponsorshipError::Validation(
                "transaction_id must be 40 hex characters".to_string(),
            ));
        }
        let posting_key = ChainPrivateKey::from_wif(&keys.posting).map_err(|e| {
            SponsorshipError::Validation(format!("keys.posting is not a valid private key: {e}"))
        })?;

        if !self.db.claim_sponsorship_for_processing(sponsorship_id).await? {
            // Another request claimed it between our read and the update.
            let current = self.db.get_sponsorship(sponsorship_id).await?.status;
            return Err(SponsorshipError::InvalidStateTransition { current });
        }
        info!(sponsorship_id, "Sponsorship claimed for processing");

        let report = self
            .run_claimed(&sponsorship, &transaction_id, keys, &posting_key)
            .await;

        #[cfg(feature = "metrics")]
        hivelink_core::metrics::record_sponsorship_outcome(report.status.as_str());

        Ok(report)
    }

    async fn run_claimed(
        &self,
        sponsorship: &Sponsorship,
        transaction_id: &str,
        keys: &GeneratedKeys,
        posting_key: &ChainPrivateKey,
    ) -> ProcessReport {
        match self
            .run_required_steps(sponsorship, transaction_id, keys, posting_key)
            .await
        {
            Ok((report, recipient)) => {
                self.run_best_effort_steps(sponsorship, &recipient, keys, posting_key, report)
                    .await
            }
            Err(report) => {
                let reason = report.error.as_deref().unwrap_or("unknown failure");
                match self.db.fail_sponsorship(&sponsorship.id, reason).await {
                    Ok(true) => {}
                    Ok(false) => warn!(sponsorship_id = %sponsorship.id, "Sponsorship left processing before it could be failed"),
                    Err(e) => warn!(sponsorship_id = %sponsorship.id, error = %e, "Failed to record sponsorship failure"),
                }
                warn!(
                    sponsorship_id = %sponsorship.id,
                    step = ?report.failed_step,
                    reason,
                    "Sponsorship failed"
                );
                report
            }
        }
    }

    /// Verify, resolve contact, then custody + attach + complete atomically.
    /// `Err` carries a report describing the failed step.
    async fn run_required_steps(
        &self,
        sponsorship: &Sponsorship,
        transaction_id: &str,
        keys: &GeneratedKeys,
        posting_key: &ChainPrivateKey,
    ) -> Result<(ProcessReport, User), ProcessReport> {
        let mut report = ProcessReport::new(&sponsorship.id);
        let account = sponsorship.hive_username.as_str();

        // a. verify
        if let Err(e) = self.chain.verify_account_creation(transaction_id, account).await {
            return Err(report.failed(ProcessStep::Verify, e.to_string()));
        }
        match self.chain.posting_public_keys(account).await {
            Ok(keys_on_chain) => {
                let derived = posting_key.public_key().to_string();
                if !keys_on_chain.iter().any(|k| *k == derived) {
                    return Err(report.failed(
                        ProcessStep::Verify,
                        format!("posting key does not match account {account}"),
                    ));
                }
            }
            Err(e) => return Err(report.failed(ProcessStep::Verify, e.to_string())),
        }
        report.account_created = true;

        // b. resolve recipient contact
        let recipient = match self.db.get_user(&sponsorship.lite_user_id).await {
            Ok(user) if user.email.as_deref().is_some_and(|e| !e.trim().is_empty()) => user,
            Ok(_) | Err(DatabaseError::NotFound(_)) => {
                return Err(report.failed(ProcessStep::ResolveContact, "contact not found".to_string()));
            }
            Err(e) => return Err(report.failed(ProcessStep::ResolveContact, e.to_string())),
        };

        // c. custody
        let sealed = match self.vault.encrypt(keys.posting.as_bytes()) {
            Ok(sealed) => sealed,
            Err(e) => return Err(report.failed(ProcessStep::Custody, e.to_string())),
        };
        let (encrypted_secret, iv, auth_tag) = sealed.to_hex();

        // d. attach identity, committed together with c and the completion
        let candidate = IdentityCandidate::chain_account(account);
        let finalize = FinalizeSponsorship {
            sponsorship_id: &sponsorship.id,
            hive_tx_id: transaction_id,
            key: NewCustodialKey {
                user_id: &recipient.id,
                hive_username: account,
                encrypted_secret: &encrypted_secret,
                iv: &iv,
                auth_tag: &auth_tag,
                key_type: KeyType::Sponsored,
            },
            identity: candidate.to_new_identity(&recipient.id, Some(&sponsorship.sponsor_user_id)),
        };
        match self.db.finalize_sponsorship(&finalize).await {
            Ok(FinalizeOutcome::Completed(identity)) => {
                info!(
                    sponsorship_id = %sponsorship.id,
                    identity_id = %identity.id,
                    "Sponsorship completed"
                );
            }
            Ok(FinalizeOutcome::IdentityOwnedBy(owner)) => {
                return Err(report.failed(
                    ProcessStep::AttachIdentity,
                    format!("chain account {account} is already linked to user {owner}"),
                ));
            }
            Ok(FinalizeOutcome::NotProcessing) => {
                return Err(report.failed(
                    ProcessStep::AttachIdentity,
                    "sponsorship left processing before completion".to_string(),
                ));
            }
            Err(e) => return Err(report.failed(ProcessStep::Custody, e.to_string())),
        }

        report.key_encrypted = true;
        report.identity_linked = true;
        report.status = SponsorshipStatus::Completed;
        Ok((report, recipient))
    }

    /// Profile sync and credential email, concurrently. Neither can change
    /// the sponsorship's status.
    async fn run_best_effort_steps(
        &self,
        sponsorship: &Sponsorship,
        recipient: &User,
        keys: &GeneratedKeys,
        posting_key: &ChainPrivateKey,
        mut report: ProcessReport,
    ) -> ProcessReport {
        let account = sponsorship.hive_username.as_str();
        let profile = ProfileMetadata {
            name: Some(
                recipient
                    .display_name
                    .clone()
                    .unwrap_or_else(|| recipient.handle.clone()),
            ),
            profile_image: recipient.avatar_url.clone(),
            about: None,
        };

        let sync = async {
            let result = self.publisher.publish_profile(account, posting_key, &profile).await;
            let (ok, detail) = match &result {
                Ok(tx_id) => (true, tx_id.clone()),
                Err(e) => (false, e.to_string()),
            };
            let outcome = if ok { Ok(Some(detail.as_str())) } else { Err(detail.as_str()) };
            self.side_effects
                .record(PROFILE_SYNC, &recipient.id, Some(&sponsorship.id), outcome)
                .await;
            ok
        };

        let email = async {
            let sponsor_name = match self.db.get_user(&sponsorship.sponsor_user_id).await {
                Ok(sponsor) => match self.public_name(&sponsor).await {
                    Ok(name) => name,
                    Err(_) => sponsor.handle.clone(),
                },
                Err(_) => "Your sponsor".to_string(),
            };
            let to = recipient.email.as_deref().unwrap_or_default();
            let message = templates::credential_email(to, account, &sponsor_name, keys);
            let result = self.notifier.send(&message).await;
            let (ok, detail) = match &result {
                Ok(id) => (true, id.clone()),
                Err(e) => (false, Some(e.to_string())),
            };
            let outcome = if ok { Ok(detail.as_deref()) } else { Err(detail.as_deref().unwrap_or("send failed")) };
            self.side_effects
                .record(CREDENTIAL_EMAIL, &recipient.id, Some(&sponsorship.id), outcome)
                .await;
            ok
        };

        let (profile_synced, email_sent) = tokio::join!(sync, email);
        report.profile_synced = profile_synced;
        report.email_sent = email_sent;
        report
    }

    /// Whether `user_id` can receive a sponsorship.
    pub async fn eligibility(&self, user_id: &str) -> Result<Eligibility, SponsorshipError> {
        self.require_user(user_id).await?;

        let reason = if self
            .db
            .has_identity_type(user_id, IdentityType::ChainAccount)
            .await?
        {
            Some("user already has a chain account")
        } else {
            match self.db.get_active_sponsorship_for_recipient(user_id).await? {
                Some(s) if s.status == SponsorshipStatus::Completed => Some("user is already sponsored"),
                Some(_) => Some("a sponsorship is already pending"),
                None => None,
            }
        };

        Ok(Eligibility {
            eligible: reason.is_none(),
            reason: reason.map(str::to_string),
        })
    }

    /// The acting user's completed sponsorship, if any.
    pub async fn my_info(&self, user_id: &str) -> Result<SponsorshipInfo, SponsorshipError> {
        let completed = self
            .db
            .get_active_sponsorship_for_recipient(user_id)
            .await?
            .filter(|s| s.status == SponsorshipStatus::Completed);

        let Some(sponsorship) = completed else {
            return Ok(SponsorshipInfo {
                sponsored: false,
                sponsor_username: None,
                hive_username: None,
                sponsored_at: None,
            });
        };

        let sponsor_username = match self.db.get_user(&sponsorship.sponsor_user_id).await {
            Ok(sponsor) => Some(self.public_name(&sponsor).await?),
            Err(DatabaseError::NotFound(_)) => None,
            Err(e) => return Err(e.into()),
        };

        Ok(SponsorshipInfo {
            sponsored: true,
            sponsor_username,
            hive_username: Some(sponsorship.hive_username),
            sponsored_at: sponsorship.completed_at,
        })
    }

    /// Fail sponsorships stuck in `processing` for longer than `stale_secs`.
    pub async fn sweep_stale(&self, stale_secs: i64) -> Result<u64, SponsorshipError> {
        let swept = self
            .db
            .fail_stale_processing(unix_timestamp() - stale_secs)
            .await?;
        if swept > 0 {
            warn!(swept, "Failed sponsorships interrupted during processing");
        }
        Ok(swept)
    }
}

/// `hive` costs need a decimal amount with up to three places; token costs
/// carry none.
fn validate_cost(cost_type: CostType, amount: Option<&str>) -> Result<Option<String>, SponsorshipError> {
    let amount = amount.map(str::trim).filter(|a| !a.is_empty());
    match (cost_type, amount) {
        (CostType::Hive, Some(a)) if is_match(&COST_AMOUNT, a) => Ok(Some(a.to_string())),
        (CostType::Hive, Some(a)) => Err(SponsorshipError::Validation(format!(
            "cost_amount {a:?} is not a decimal with at most 3 places"
        ))),
        (CostType::Hive, None) => Err(SponsorshipError::Validation(
            "cost_amount is required when cost_type is hive".to_string(),
        )),
        (CostType::AccountToken, _) => Ok(None),
    }
}
