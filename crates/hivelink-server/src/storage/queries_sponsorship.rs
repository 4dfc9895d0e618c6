//! Sponsorship queries.
//!
//! Every status change is a conditional `UPDATE ... WHERE status = <expected>`
//! so that transitions only move forward and two callers cannot both win.

use hivelink_core::db::{DatabaseError, unix_timestamp};

use super::db::AppDatabase;
use super::models::{CostType, Identity, Sponsorship};
use super::queries_identity::{IdentityInsert, NewIdentity, insert_identity_if_absent};
use super::queries_keys::{NewCustodialKey, upsert_custodial_key};

/// Parameters for a new sponsorship.
#[derive(Debug, Clone)]
pub struct NewSponsorship<'a> {
    pub lite_user_id: &'a str,
    pub sponsor_user_id: &'a str,
    pub hive_username: &'a str,
    pub cost_type: CostType,
    pub cost_amount: Option<&'a str>,
}

/// The writes that complete a sponsorship, committed together.
#[derive(Debug, Clone)]
pub struct FinalizeSponsorship<'a> {
    pub sponsorship_id: &'a str,
    pub hive_tx_id: &'a str,
    pub key: NewCustodialKey<'a>,
    pub identity: NewIdentity<'a>,
}

/// Outcome of [`AppDatabase::finalize_sponsorship`].
#[derive(Debug, Clone)]
pub enum FinalizeOutcome {
    /// Key stored, identity attached and sponsorship marked completed.
    Completed(Identity),
    /// The chain account is already linked to another user; the transaction
    /// was rolled back and nothing was written.
    IdentityOwnedBy(String),
    /// The sponsorship was no longer `processing`; rolled back.
    NotProcessing,
}

impl AppDatabase {
    // =========================================================================
    // Sponsorship queries
    // =========================================================================

    /// Create a `pending` sponsorship.
    ///
    /// A second live or completed sponsorship for the same recipient fails
    /// with [`DatabaseError::Conflict`] from the partial unique index.
    pub async fn create_sponsorship(
        &self,
        params: &NewSponsorship<'_>,
    ) -> Result<Sponsorship, DatabaseError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = unix_timestamp();

        sqlx::query(
            "INSERT INTO sponsorships (id, lite_user_id, sponsor_user_id, hive_username, cost_type, \
             cost_amount, status, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, 'pending', ?, ?)",
        )
        .bind(&id)
        .bind(params.lite_user_id)
        .bind(params.sponsor_user_id)
        .bind(params.hive_username)
        .bind(params.cost_type)
        .bind(params.cost_amount)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await?;

        self.get_sponsorship(&id).await
    }

    /// Get a sponsorship by ID.
    pub async fn get_sponsorship(&self, id: &str) -> Result<Sponsorship, DatabaseError> {
        sqlx::query_as::<_, Sponsorship>("SELECT * FROM sponsorships WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Sponsorship {id}")))
    }

    /// The recipient's pending, processing or completed sponsorship.
    pub async fn get_active_sponsorship_for_recipient(
        &self,
        lite_user_id: &str,
    ) -> Result<Option<Sponsorship>, DatabaseError> {
        let row = sqlx::query_as::<_, Sponsorship>(
            "SELECT * FROM sponsorships WHERE lite_user_id = ? \
             AND status IN ('pending', 'processing', 'completed') LIMIT 1",
        )
        .bind(lite_user_id)
        .fetch_optional(self.pool())
        .await?;

        Ok(row)
    }

    /// Move `pending -> processing`. Returns `false` if the sponsorship was
    /// not `pending`.
    pub async fn claim_sponsorship_for_processing(&self, id: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE sponsorships SET status = 'processing', updated_at = ? \
             WHERE id = ? AND status = 'pending'",
        )
        .bind(unix_timestamp())
        .bind(id)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Move `processing -> failed`, recording the reason.
    pub async fn fail_sponsorship(&self, id: &str, reason: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE sponsorships SET status = 'failed', error_message = ?, updated_at = ? \
             WHERE id = ? AND status = 'processing'",
        )
        .bind(reason)
        .bind(unix_timestamp())
        .bind(id)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Store the custodial key, attach the chain identity and mark the
    /// sponsorship completed in one transaction.
    pub async fn finalize_sponsorship(
        &self,
        params: &FinalizeSponsorship<'_>,
    ) -> Result<FinalizeOutcome, DatabaseError> {
        let mut tx = self.pool().begin().await?;

        upsert_custodial_key(&mut tx, &params.key).await?;

        let identity = match insert_identity_if_absent(&mut tx, &params.identity).await? {
            IdentityInsert::Inserted(identity) => identity,
            IdentityInsert::Existing(existing) if existing.user_id == params.identity.user_id => {
                existing
            }
            IdentityInsert::Existing(existing) | IdentityInsert::HandleTaken(existing) => {
                tx.rollback().await?;
                return Ok(FinalizeOutcome::IdentityOwnedBy(existing.user_id));
            }
        };

        let now = unix_timestamp();
        let result = sqlx::query(
            "UPDATE sponsorships SET status = 'completed', hive_tx_id = ?, completed_at = ?, \
             updated_at = ?, error_message = NULL WHERE id = ? AND status = 'processing'",
        )
        .bind(params.hive_tx_id)
        .bind(now)
        .bind(now)
        .bind(params.sponsorship_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(FinalizeOutcome::NotProcessing);
        }

        tx.commit().await?;
        Ok(FinalizeOutcome::Completed(identity))
    }

    /// Fail sponsorships stuck in `processing` since before `cutoff`.
    pub async fn fail_stale_processing(&self, cutoff: i64) -> Result<u64, DatabaseError> {
        let result = sqlx::query(
            "UPDATE sponsorships SET status = 'failed', error_message = ?, updated_at = ? \
             WHERE status = 'processing' AND updated_at < ?",
        )
        .bind("interrupted before completion")
        .bind(unix_timestamp())
        .bind(cutoff)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected())
    }
}
