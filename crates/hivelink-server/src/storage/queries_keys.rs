//! Custodial key queries.

use hivelink_core::db::{DatabaseError, unix_timestamp};
use sqlx::SqliteConnection;

use super::db::AppDatabase;
use super::models::{CustodialKeyRecord, KeyType};

/// Hex-encoded encrypted posting key ready to persist.
#[derive(Clone)]
pub struct NewCustodialKey<'a> {
    pub user_id: &'a str,
    pub hive_username: &'a str,
    pub encrypted_secret: &'a str,
    pub iv: &'a str,
    pub auth_tag: &'a str,
    pub key_type: KeyType,
}

impl std::fmt::Debug for NewCustodialKey<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewCustodialKey")
            .field("user_id", &self.user_id)
            .field("hive_username", &self.hive_username)
            .field("key_type", &self.key_type)
            .finish_non_exhaustive()
    }
}

/// Insert or overwrite the user's record in a single statement.
pub(crate) async fn upsert_custodial_key(
    conn: &mut SqliteConnection,
    key: &NewCustodialKey<'_>,
) -> Result<(), DatabaseError> {
    let now = unix_timestamp();

    sqlx::query(
        "INSERT INTO custodial_key_records \
         (user_id, hive_username, encrypted_secret, iv, auth_tag, key_type, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(user_id) DO UPDATE SET \
         hive_username = excluded.hive_username, \
         encrypted_secret = excluded.encrypted_secret, \
         iv = excluded.iv, \
         auth_tag = excluded.auth_tag, \
         key_type = excluded.key_type, \
         updated_at = excluded.updated_at",
    )
    .bind(key.user_id)
    .bind(key.hive_username)
    .bind(key.encrypted_secret)
    .bind(key.iv)
    .bind(key.auth_tag)
    .bind(key.key_type)
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

impl AppDatabase {
    // =========================================================================
    // Custodial key queries
    // =========================================================================

    /// Insert or overwrite the user's custodial key.
    pub async fn upsert_custodial_key(
        &self,
        key: &NewCustodialKey<'_>,
    ) -> Result<CustodialKeyRecord, DatabaseError> {
        let mut conn = self.pool().acquire().await?;
        upsert_custodial_key(&mut conn, key).await?;
        drop(conn);

        self.get_custodial_key(key.user_id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Custodial key for {}", key.user_id)))
    }

    /// Get the user's custodial key record, if any.
    pub async fn get_custodial_key(
        &self,
        user_id: &str,
    ) -> Result<Option<CustodialKeyRecord>, DatabaseError> {
        let row = sqlx::query_as::<_, CustodialKeyRecord>(
            "SELECT * FROM custodial_key_records WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(self.pool())
        .await?;

        Ok(row)
    }

    /// Record that the key was decrypted for a backup.
    pub async fn touch_custodial_key(&self, user_id: &str) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE custodial_key_records SET last_used_at = ? WHERE user_id = ?")
            .bind(unix_timestamp())
            .bind(user_id)
            .execute(self.pool())
            .await?;

        Ok(())
    }

    /// Delete the user's custodial key. Returns `false` if none existed.
    pub async fn delete_custodial_key(&self, user_id: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM custodial_key_records WHERE user_id = ?")
            .bind(user_id)
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
