//! External identities: linking and proof of control.

pub mod linker;
pub mod proof;

use serde_json::json;

pub use linker::{IdentityLinker, LinkError, LinkResult};
pub use proof::{Challenge, ProofError, ProofVerifier};

use crate::directory::DirectoryProfile;
use crate::storage::{IdentityType, NewIdentity};

/// An identity proven to belong to the acting user, ready to link.
///
/// All providers share one shape; `external_id` is the key uniqueness and
/// merge detection run on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityCandidate {
    pub identity_type: IdentityType,
    pub external_id: String,
    pub handle: Option<String>,
    pub address: Option<String>,
    /// JSON profile snapshot.
    pub metadata: String,
}

impl IdentityCandidate {
    pub fn chain_account(name: &str) -> Self {
        Self {
            identity_type: IdentityType::ChainAccount,
            external_id: name.to_string(),
            handle: Some(name.to_string()),
            address: None,
            metadata: "{}".to_string(),
        }
    }

    /// `address` must already be normalized to lowercase `0x` form.
    pub fn wallet(address: &str) -> Self {
        Self {
            identity_type: IdentityType::Wallet,
            external_id: address.to_string(),
            handle: None,
            address: Some(address.to_string()),
            metadata: "{}".to_string(),
        }
    }

    pub fn social_graph(profile: &DirectoryProfile) -> Self {
        let metadata = json!({
            "display_name": profile.display_name,
            "avatar_url": profile.avatar_url,
            "bio": profile.bio,
            "verified_addresses": profile.verified_addresses,
        });
        Self {
            identity_type: IdentityType::SocialGraph,
            external_id: profile.fid.to_string(),
            handle: Some(profile.username.clone()),
            address: Some(profile.custody_address.clone()),
            metadata: metadata.to_string(),
        }
    }

    /// Storage parameters for linking this candidate to `user_id`.
    pub fn to_new_identity<'a>(
        &'a self,
        user_id: &'a str,
        sponsor_user_id: Option<&'a str>,
    ) -> NewIdentity<'a> {
        NewIdentity {
            user_id,
            identity_type: self.identity_type,
            handle: self.handle.as_deref(),
            address: self.address.as_deref(),
            external_id: Some(&self.external_id),
            metadata: &self.metadata,
            is_sponsored: sponsor_user_id.is_some(),
            sponsor_user_id,
        }
    }
}
