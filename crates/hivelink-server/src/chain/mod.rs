//! Chain (Hive) collaborators.
//!
//! - [`ChainVerifier`] confirms that a transaction created an account and
//!   answers account-existence and posting-authority questions.
//! - [`ProfilePublisher`] writes public profile metadata to an account.
//!
//! [`HiveRpcClient`] implements both over condenser JSON-RPC.

pub mod name;
pub mod rpc;
pub mod transaction;

use std::time::Duration;

use async_trait::async_trait;
use hivelink_core::retry::RetryableError;
use hivelink_crypto::ChainPrivateKey;
use serde::{Deserialize, Serialize};

pub use name::{AccountNameError, validate_account_name};
pub use rpc::HiveRpcClient;

/// Operations that create an account.
pub const ACCOUNT_CREATION_OPS: [&str; 3] = [
    "account_create",
    "account_create_with_delegation",
    "create_claimed_account",
];

/// Confirmation that a transaction created an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountCreation {
    pub account: String,
    pub transaction_id: String,
    pub block_num: u64,
    /// Operation that created the account.
    pub operation: String,
    /// Whether the block is at or below the last irreversible block.
    pub irreversible: bool,
}

/// Public profile written to `posting_json_metadata`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub about: Option<String>,
}

impl ProfileMetadata {
    pub const fn is_empty(&self) -> bool {
        self.name.is_none() && self.profile_image.is_none() && self.about.is_none()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("Chain RPC request error: {0}")]
    Request(String),

    #[error("Chain RPC HTTP error (status {status}): {body}")]
    ApiError { status: u16, body: String },

    #[error("Chain RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Malformed chain RPC response: {0}")]
    Decode(String),

    #[error("Chain RPC timed out after {0:?}")]
    Timeout(Duration),

    #[error("Transaction {0} not found")]
    TransactionNotFound(String),

    #[error("Transaction {transaction_id} did not create account {expected}")]
    AccountMismatch {
        transaction_id: String,
        expected: String,
    },

    #[error("Account {0} does not exist on chain")]
    AccountMissing(String),

    #[error("Transaction signing failed: {0}")]
    Signing(String),

    #[error("Chain client configuration error: {0}")]
    Config(String),
}

impl RetryableError for ChainError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Request(_) | Self::Timeout(_) => true,
            Self::ApiError { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    fn timed_out(after: Duration) -> Self {
        Self::Timeout(after)
    }
}

/// Read access to chain state needed by the sponsorship workflow.
#[async_trait]
pub trait ChainVerifier: Send + Sync {
    /// Confirm that `transaction_id` created `account` and that the account
    /// now exists.
    async fn verify_account_creation(
        &self,
        transaction_id: &str,
        account: &str,
    ) -> Result<AccountCreation, ChainError>;

    async fn account_exists(&self, account: &str) -> Result<bool, ChainError>;

    /// `STM...` public keys in the account's posting authority.
    async fn posting_public_keys(&self, account: &str) -> Result<Vec<String>, ChainError>;
}

/// Writes public profile metadata to a chain account.
#[async_trait]
pub trait ProfilePublisher: Send + Sync {
    /// Broadcast the profile signed with the posting key; returns the
    /// transaction id.
    async fn publish_profile(
        &self,
        account: &str,
        posting_key: &ChainPrivateKey,
        profile: &ProfileMetadata,
    ) -> Result<String, ChainError>;
}
