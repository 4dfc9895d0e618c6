//! Social-graph directory client.
//!
//! Resolves a numeric profile id to its canonical profile: handle, custody
//! address and the wallet addresses the profile has verified.

pub mod neynar;

use std::time::Duration;

use async_trait::async_trait;
use hivelink_core::retry::RetryableError;
use serde::{Deserialize, Serialize};

pub use neynar::NeynarDirectory;

/// Canonical profile data for a social-graph identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryProfile {
    pub fid: u64,
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
    /// Lowercase `0x` address that signs on the profile's behalf.
    pub custody_address: String,
    /// Lowercase `0x` addresses the profile has verified.
    pub verified_addresses: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("Profile {0} not found")]
    NotFound(u64),

    #[error("Directory request error: {0}")]
    Request(String),

    #[error("Directory API error (status {status}): {body}")]
    ApiError { status: u16, body: String },

    #[error("Malformed directory response: {0}")]
    Decode(String),

    #[error("Directory request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Directory client configuration error: {0}")]
    Config(String),
}

impl RetryableError for DirectoryError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Request(_) | Self::Timeout(_) => true,
            Self::ApiError { status, .. } => *status >= 500 || *status == 429,
            Self::NotFound(_) | Self::Decode(_) | Self::Config(_) => false,
        }
    }

    fn timed_out(after: Duration) -> Self {
        Self::Timeout(after)
    }
}

/// Source of canonical social-graph profiles.
#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    async fn lookup_profile(&self, fid: u64) -> Result<DirectoryProfile, DirectoryError>;
}
