//! Identity queries.
//!
//! Inserts are single `INSERT ... ON CONFLICT DO NOTHING` statements backed
//! by the partial unique indexes on `(identity_type, external_id)` and
//! `(identity_type, handle)`, so a concurrent duplicate can never slip in
//! between a lookup and a write.

use hivelink_core::db::{DatabaseError, unix_timestamp};
use sqlx::SqliteConnection;

use super::db::AppDatabase;
use super::models::{Identity, IdentityType};

/// Parameters for a new identity row.
#[derive(Debug, Clone)]
pub struct NewIdentity<'a> {
    pub user_id: &'a str,
    pub identity_type: IdentityType,
    pub handle: Option<&'a str>,
    pub address: Option<&'a str>,
    pub external_id: Option<&'a str>,
    pub metadata: &'a str,
    pub is_sponsored: bool,
    pub sponsor_user_id: Option<&'a str>,
}

/// Result of an atomic identity insert.
#[derive(Debug, Clone)]
pub enum IdentityInsert {
    /// A new row was written.
    Inserted(Identity),
    /// A row with the same `(type, external_id)` already exists; nothing was
    /// written. The owner may or may not be the caller.
    Existing(Identity),
    /// The external id is free but another row of the type holds the handle;
    /// nothing was written.
    HandleTaken(Identity),
}

/// Insert `identity` unless an identity with the same key already exists.
///
/// `is_primary` is computed in the same statement: it is set only when the
/// user has no identity of that type yet.
pub(crate) async fn insert_identity_if_absent(
    conn: &mut SqliteConnection,
    identity: &NewIdentity<'_>,
) -> Result<IdentityInsert, DatabaseError> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = unix_timestamp();

    let result = sqlx::query(
        "INSERT INTO identities (id, user_id, identity_type, handle, address, external_id, is_primary, \
         verified_at, metadata, is_sponsored, sponsor_user_id, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, \
         NOT EXISTS (SELECT 1 FROM identities WHERE user_id = ? AND identity_type = ?), \
         ?, ?, ?, ?, ?) \
         ON CONFLICT DO NOTHING",
    )
    .bind(&id)
    .bind(identity.user_id)
    .bind(identity.identity_type)
    .bind(identity.handle)
    .bind(identity.address)
    .bind(identity.external_id)
    .bind(identity.user_id)
    .bind(identity.identity_type)
    .bind(now)
    .bind(identity.metadata)
    .bind(identity.is_sponsored)
    .bind(identity.sponsor_user_id)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() > 0 {
        let row = sqlx::query_as::<_, Identity>("SELECT * FROM identities WHERE id = ?")
            .bind(&id)
            .fetch_one(&mut *conn)
            .await?;
        return Ok(IdentityInsert::Inserted(row));
    }

    if let Some(external_id) = identity.external_id {
        let same_key = sqlx::query_as::<_, Identity>(
            "SELECT * FROM identities WHERE identity_type = ? AND external_id = ?",
        )
        .bind(identity.identity_type)
        .bind(external_id)
        .fetch_optional(&mut *conn)
        .await?;
        if let Some(row) = same_key {
            return Ok(IdentityInsert::Existing(row));
        }
    }

    let same_handle = match identity.handle {
        Some(handle) => {
            sqlx::query_as::<_, Identity>(
                "SELECT * FROM identities WHERE identity_type = ? AND handle = ?",
            )
            .bind(identity.identity_type)
            .bind(handle)
            .fetch_optional(&mut *conn)
            .await?
        }
        None => None,
    };

    same_handle.map(IdentityInsert::HandleTaken).ok_or_else(|| {
        DatabaseError::Query(format!(
            "{} identity insert ignored but no conflicting row found",
            identity.identity_type
        ))
    })
}

impl AppDatabase {
    // =========================================================================
    // Identity queries
    // =========================================================================

    /// Atomically insert an identity unless its external key is taken.
    pub async fn insert_identity_if_absent(
        &self,
        identity: &NewIdentity<'_>,
    ) -> Result<IdentityInsert, DatabaseError> {
        let mut conn = self.pool().acquire().await?;
        insert_identity_if_absent(&mut conn, identity).await
    }

    /// All identities of a user, primary first.
    pub async fn list_identities(&self, user_id: &str) -> Result<Vec<Identity>, DatabaseError> {
        let rows = sqlx::query_as::<_, Identity>(
            "SELECT * FROM identities WHERE user_id = ? \
             ORDER BY identity_type, is_primary DESC, created_at",
        )
        .bind(user_id)
        .fetch_all(self.pool())
        .await?;

        Ok(rows)
    }

    /// The user's primary identity of a type, if any.
    pub async fn get_primary_identity(
        &self,
        user_id: &str,
        identity_type: IdentityType,
    ) -> Result<Option<Identity>, DatabaseError> {
        let row = sqlx::query_as::<_, Identity>(
            "SELECT * FROM identities WHERE user_id = ? AND identity_type = ? \
             ORDER BY is_primary DESC, created_at LIMIT 1",
        )
        .bind(user_id)
        .bind(identity_type)
        .fetch_optional(self.pool())
        .await?;

        Ok(row)
    }

    /// Whether the user holds at least one identity of the type.
    pub async fn has_identity_type(
        &self,
        user_id: &str,
        identity_type: IdentityType,
    ) -> Result<bool, DatabaseError> {
        Ok(self.get_primary_identity(user_id, identity_type).await?.is_some())
    }

    /// Count identities matching an external key (test and audit helper).
    pub async fn count_identities_by_external_id(
        &self,
        identity_type: IdentityType,
        external_id: &str,
    ) -> Result<i64, DatabaseError> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM identities WHERE identity_type = ? AND external_id = ?",
        )
        .bind(identity_type)
        .bind(external_id)
        .fetch_one(self.pool())
        .await?;

        Ok(count)
    }
}
