//! User and session queries.

use hivelink_core::db::{DatabaseError, unix_timestamp};

use super::db::AppDatabase;
use super::models::{Session, User};

impl AppDatabase {
    // =========================================================================
    // User queries
    // =========================================================================

    /// Create a new user.
    pub async fn create_user(
        &self,
        id: &str,
        handle: &str,
        display_name: Option<&str>,
        email: Option<&str>,
    ) -> Result<User, DatabaseError> {
        let now = unix_timestamp();

        sqlx::query(
            "INSERT INTO users (id, handle, display_name, email, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(handle)
        .bind(display_name)
        .bind(email)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await?;

        self.get_user(id).await
    }

    /// Get a user by ID.
    pub async fn get_user(&self, id: &str) -> Result<User, DatabaseError> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("User {id}")))
    }

    /// Get a user by handle.
    pub async fn get_user_by_handle(&self, handle: &str) -> Result<User, DatabaseError> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE handle = ?")
            .bind(handle)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("User with handle {handle}")))
    }

    // =========================================================================
    // Session queries
    // =========================================================================

    /// Store a session. Only the token hash is persisted.
    pub async fn create_session(
        &self,
        id: &str,
        user_id: &str,
        token_hash: &str,
        expires_at: i64,
    ) -> Result<Session, DatabaseError> {
        sqlx::query(
            "INSERT INTO sessions (id, user_id, refresh_token_hash, expires_at, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(user_id)
        .bind(token_hash)
        .bind(expires_at)
        .bind(unix_timestamp())
        .execute(self.pool())
        .await?;

        self.get_session(id).await
    }

    /// Get a session by ID.
    pub async fn get_session(&self, id: &str) -> Result<Session, DatabaseError> {
        sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Session {id}")))
    }

    /// Find a session by token hash, whatever its state.
    ///
    /// Callers decide between "unknown" and "expired/revoked".
    pub async fn get_session_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<Session>, DatabaseError> {
        let session =
            sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE refresh_token_hash = ?")
                .bind(token_hash)
                .fetch_optional(self.pool())
                .await?;

        Ok(session)
    }

    /// Revoke a session. Returns `false` if it was already revoked or unknown.
    pub async fn revoke_session(&self, id: &str) -> Result<bool, DatabaseError> {
        let result =
            sqlx::query("UPDATE sessions SET revoked_at = ? WHERE id = ? AND revoked_at IS NULL")
                .bind(unix_timestamp())
                .bind(id)
                .execute(self.pool())
                .await?;

        Ok(result.rows_affected() > 0)
    }
}
