//! Side-effect log queries.

use hivelink_core::db::{DatabaseError, unix_timestamp};

use super::db::AppDatabase;
use super::models::SideEffectRecord;

impl AppDatabase {
    /// Append an outcome to the side-effect log.
    pub async fn record_side_effect(
        &self,
        kind: &str,
        user_id: Option<&str>,
        sponsorship_id: Option<&str>,
        succeeded: bool,
        detail: Option<&str>,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO side_effect_log (kind, user_id, sponsorship_id, succeeded, detail, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(kind)
        .bind(user_id)
        .bind(sponsorship_id)
        .bind(succeeded)
        .bind(detail)
        .bind(unix_timestamp())
        .execute(self.pool())
        .await?;

        Ok(())
    }

    /// Log entries for one sponsorship, oldest first.
    pub async fn list_side_effects_for_sponsorship(
        &self,
        sponsorship_id: &str,
    ) -> Result<Vec<SideEffectRecord>, DatabaseError> {
        let rows = sqlx::query_as::<_, SideEffectRecord>(
            "SELECT * FROM side_effect_log WHERE sponsorship_id = ? ORDER BY id",
        )
        .bind(sponsorship_id)
        .fetch_all(self.pool())
        .await?;

        Ok(rows)
    }

    /// Failures of `kind` since `since` (unix seconds), for alerting.
    pub async fn count_side_effect_failures(
        &self,
        kind: &str,
        since: i64,
    ) -> Result<i64, DatabaseError> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM side_effect_log WHERE kind = ? AND succeeded = 0 AND created_at >= ?",
        )
        .bind(kind)
        .bind(since)
        .fetch_one(self.pool())
        .await?;

        Ok(count)
    }
}
