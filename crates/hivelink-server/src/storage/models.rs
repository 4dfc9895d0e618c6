//! Data models for Hivelink storage.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: String,
    pub handle: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub email: Option<String>,
    pub status: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// External namespace an identity proves control of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum IdentityType {
    ChainAccount,
    Wallet,
    SocialGraph,
}

impl IdentityType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ChainAccount => "chain_account",
            Self::Wallet => "wallet",
            Self::SocialGraph => "social_graph",
        }
    }
}

impl fmt::Display for IdentityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Identity {
    pub id: String,
    pub user_id: String,
    pub identity_type: IdentityType,
    pub handle: Option<String>,
    pub address: Option<String>,
    pub external_id: Option<String>,
    pub is_primary: bool,
    pub verified_at: i64,
    /// JSON profile snapshot.
    pub metadata: String,
    pub is_sponsored: bool,
    pub sponsor_user_id: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub refresh_token_hash: String,
    pub expires_at: i64,
    pub revoked_at: Option<i64>,
    pub created_at: i64,
}

impl Session {
    /// Usable iff not revoked and `now < expires_at`.
    pub const fn is_usable_at(&self, now: i64) -> bool {
        self.revoked_at.is_none() && now < self.expires_at
    }
}

/// Sponsorship workflow state. Transitions only move forward:
/// `pending -> processing -> completed | failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum SponsorshipStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl SponsorshipStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for SponsorshipStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the sponsor pays for account creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum CostType {
    /// Creation fee paid in the chain's native token.
    Hive,
    /// A previously claimed account-creation token.
    AccountToken,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Sponsorship {
    pub id: String,
    pub lite_user_id: String,
    pub sponsor_user_id: String,
    pub hive_username: String,
    pub cost_type: CostType,
    /// Decimal string, e.g. `"3.000"`.
    pub cost_amount: Option<String>,
    pub hive_tx_id: Option<String>,
    pub status: SponsorshipStatus,
    pub error_message: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub completed_at: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum KeyType {
    Sponsored,
    UserProvided,
}

/// Encrypted posting credential. Only the hex-encoded ciphertext, nonce and
/// tag are stored.
#[derive(Clone, sqlx::FromRow)]
pub struct CustodialKeyRecord {
    pub user_id: String,
    pub hive_username: String,
    pub encrypted_secret: String,
    pub iv: String,
    pub auth_tag: String,
    pub key_type: KeyType,
    pub created_at: i64,
    pub updated_at: i64,
    pub last_used_at: Option<i64>,
}

impl fmt::Debug for CustodialKeyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustodialKeyRecord")
            .field("user_id", &self.user_id)
            .field("hive_username", &self.hive_username)
            .field("key_type", &self.key_type)
            .field("updated_at", &self.updated_at)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SideEffectRecord {
    pub id: i64,
    pub kind: String,
    pub user_id: Option<String>,
    pub sponsorship_id: Option<String>,
    pub succeeded: bool,
    pub detail: Option<String>,
    pub created_at: i64,
}
