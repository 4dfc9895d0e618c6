//! Attach verified identities to users with merge detection.

use hivelink_core::db::DatabaseError;
use tracing::{info, instrument, warn};

use super::IdentityCandidate;
use crate::storage::{AppDatabase, Identity, IdentityInsert};

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Outcome of [`IdentityLinker::link`].
#[derive(Debug, Clone)]
pub enum LinkResult {
    /// A new identity row was created.
    Linked(Identity),
    /// The acting user already owns this identity; nothing changed.
    AlreadyLinkedToSelf(Identity),
    /// Another user owns this identity; nothing changed.
    MergeRequired { existing_user_id: String },
    /// The external id is unclaimed but its handle is held by a different
    /// identity of the same type; nothing changed.
    HandleTaken { existing_user_id: String },
}

impl LinkResult {
    /// Classify an insert outcome from the acting user's point of view.
    pub fn from_insert(acting_user_id: &str, insert: IdentityInsert) -> Self {
        match insert {
            IdentityInsert::Inserted(row) => Self::Linked(row),
            IdentityInsert::Existing(row) if row.user_id == acting_user_id => {
                Self::AlreadyLinkedToSelf(row)
            }
            IdentityInsert::Existing(row) => Self::MergeRequired {
                existing_user_id: row.user_id,
            },
            IdentityInsert::HandleTaken(row) => Self::HandleTaken {
                existing_user_id: row.user_id,
            },
        }
    }
}

#[derive(Clone)]
pub struct IdentityLinker {
    db: AppDatabase,
}

impl IdentityLinker {
    pub const fn new(db: AppDatabase) -> Self {
        Self { db }
    }

    /// Link `candidate` to `acting_user_id`.
    ///
    /// The existence check and the insert are one statement, so two
    /// concurrent links of the same external id cannot both create rows.
    #[instrument(skip(self, candidate), fields(identity_type = %candidate.identity_type, external_id = %candidate.external_id))]
    pub async fn link(
        &self,
        acting_user_id: &str,
        candidate: &IdentityCandidate,
    ) -> Result<LinkResult, LinkError> {
        let insert = self
            .db
            .insert_identity_if_absent(&candidate.to_new_identity(acting_user_id, None))
            .await?;
        let result = LinkResult::from_insert(acting_user_id, insert);

        match &result {
            LinkResult::Linked(row) => {
                info!(user_id = acting_user_id, identity_id = %row.id, is_primary = row.is_primary, "Identity linked");
            }
            LinkResult::AlreadyLinkedToSelf(row) => {
                info!(user_id = acting_user_id, identity_id = %row.id, "Identity already linked to user");
            }
            LinkResult::MergeRequired { existing_user_id } => {
                warn!(
                    user_id = acting_user_id,
                    existing_user_id = %existing_user_id,
                    "Identity owned by another user, merge required"
                );
            }
            LinkResult::HandleTaken { existing_user_id } => {
                warn!(
                    user_id = acting_user_id,
                    existing_user_id = %existing_user_id,
                    "Handle held by a different identity"
                );
            }
        }
        Ok(result)
    }

    pub async fn list(&self, user_id: &str) -> Result<Vec<Identity>, LinkError> {
        Ok(self.db.list_identities(user_id).await?)
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::storage::IdentityType;

    async fn setup() -> (AppDatabase, IdentityLinker) {
        let db = AppDatabase::open_in_memory().await.unwrap();
        db.create_user("user-a", "alice", None, None).await.unwrap();
        db.create_user("user-b", "bob", None, None).await.unwrap();
        let linker = IdentityLinker::new(db.clone());
        (db, linker)
    }

    fn social(fid: &str) -> IdentityCandidate {
        IdentityCandidate {
            identity_type: IdentityType::SocialGraph,
            external_id: fid.to_string(),
            handle: Some(format!("h{fid}")),
            address: Some("0xabc".to_string()),
            metadata: "{}".to_string(),
        }
    }

    #[tokio::test]
    async fn linking_twice_keeps_one_row() {
        let (db, linker) = setup().await;

        let first = linker.link("user-a", &social("1234")).await.unwrap();
        let LinkResult::Linked(row) = first else {
            panic!("expected Linked, got {first:?}");
        };
        assert!(row.is_primary);

        let second = linker.link("user-a", &social("1234")).await.unwrap();
        let LinkResult::AlreadyLinkedToSelf(again) = second else {
            panic!("expected AlreadyLinkedToSelf, got {second:?}");
        };
        assert_eq!(again.id, row.id);
        assert_eq!(
            db.count_identities_by_external_id(IdentityType::SocialGraph, "1234")
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn other_owner_requires_merge_and_writes_nothing() {
        let (db, linker) = setup().await;
        linker.link("user-a", &social("1234")).await.unwrap();

        let result = linker.link("user-b", &social("1234")).await.unwrap();
        match result {
            LinkResult::MergeRequired { existing_user_id } => assert_eq!(existing_user_id, "user-a"),
            other => panic!("expected MergeRequired, got {other:?}"),
        }
        assert!(linker.list("user-b").await.unwrap().is_empty());
        assert_eq!(
            db.count_identities_by_external_id(IdentityType::SocialGraph, "1234")
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn shared_handle_does_not_count_as_already_linked() {
        let (db, linker) = setup().await;
        let first = IdentityCandidate {
            handle: Some("skater".to_string()),
            ..social("1")
        };
        linker.link("user-a", &first).await.unwrap();

        let second = IdentityCandidate {
            handle: Some("skater".to_string()),
            ..social("2")
        };
        let result = linker.link("user-a", &second).await.unwrap();
        match result {
            LinkResult::HandleTaken { existing_user_id } => assert_eq!(existing_user_id, "user-a"),
            other => panic!("expected HandleTaken, got {other:?}"),
        }
        assert_eq!(
            db.count_identities_by_external_id(IdentityType::SocialGraph, "2")
                .await
                .unwrap(),
            0
        );
        assert_eq!(linker.list("user-a").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn second_identity_of_a_type_is_not_primary() {
        let (_db, linker) = setup().await;
        linker
            .link("user-a", &IdentityCandidate::wallet("0x1111111111111111111111111111111111111111"))
            .await
            .unwrap();
        let second = linker
            .link("user-a", &IdentityCandidate::wallet("0x2222222222222222222222222222222222222222"))
            .await
            .unwrap();
        let LinkResult::Linked(row) = second else {
            panic!("expected Linked, got {second:?}");
        };
        assert!(!row.is_primary);
        assert_eq!(linker.list("user-a").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn concurrent_links_create_a_single_row() {
        let (db, linker) = setup().await;
        let candidate = social("777");
        let (a, b) = tokio::join!(
            linker.link("user-a", &candidate),
            linker.link("user-b", &candidate)
        );
        let outcomes = [a.unwrap(), b.unwrap()];
        let linked = outcomes
            .iter()
            .filter(|r| matches!(r, LinkResult::Linked(_)))
            .count();
        let merges = outcomes
            .iter()
            .filter(|r| matches!(r, LinkResult::MergeRequired { .. }))
            .count();
        assert_eq!((linked, merges), (1, 1));
        assert_eq!(
            db.count_identities_by_external_id(IdentityType::SocialGraph, "777")
                .await
                .unwrap(),
            1
        );
    }
}
