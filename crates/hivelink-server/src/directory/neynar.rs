//! Neynar-compatible directory client.
//!
//! `GET {base_url}/v2/farcaster/user/bulk?fids={fid}` with an `x-api-key`
//! header.

use async_trait::async_trait;
use hivelink_core::RetryPolicy;
use hivelink_core::config::DirectoryConfig;
use hivelink_crypto::normalize_address;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use super::{DirectoryError, DirectoryProfile, IdentityDirectory};
use crate::http::build_client;

#[derive(Debug, Deserialize)]
struct BulkUsersResponse {
    #[serde(default)]
    users: Vec<NeynarUser>,
}

#[derive(Debug, Deserialize)]
struct NeynarUser {
    fid: u64,
    username: String,
    display_name: Option<String>,
    pfp_url: Option<String>,
    custody_address: String,
    #[serde(default)]
    profile: Option<NeynarProfile>,
    #[serde(default)]
    verified_addresses: Option<VerifiedAddresses>,
}

#[derive(Debug, Deserialize)]
struct NeynarProfile {
    bio: Option<NeynarBio>,
}

#[derive(Debug, Deserialize)]
struct NeynarBio {
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct VerifiedAddresses {
    #[serde(default)]
    eth_addresses: Vec<String>,
}

impl NeynarUser {
    fn into_profile(self) -> Result<DirectoryProfile, DirectoryError> {
        let custody_address = normalize_address(&self.custody_address).ok_or_else(|| {
            DirectoryError::Decode(format!(
                "custody address {:?} is not a 20-byte hex address",
                self.custody_address
            ))
        })?;
        let verified_addresses = self
            .verified_addresses
            .unwrap_or_default()
            .eth_addresses
            .iter()
            .filter_map(|a| normalize_address(a))
            .collect();

        Ok(DirectoryProfile {
            fid: self.fid,
            username: self.username,
            display_name: self.display_name.filter(|s| !s.is_empty()),
            avatar_url: self.pfp_url.filter(|s| !s.is_empty()),
            bio: self
                .profile
                .and_then(|p| p.bio)
                .and_then(|b| b.text)
                .filter(|s| !s.is_empty()),
            custody_address,
            verified_addresses,
        })
    }
}

/// Directory client for the Neynar HTTP API.
#[derive(Debug)]
pub struct NeynarDirectory {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    retry: RetryPolicy,
}

impl NeynarDirectory {
    pub fn new(config: &DirectoryConfig, api_key: String) -> Result<Self, DirectoryError> {
        let http = build_client().map_err(|e| DirectoryError::Config(e.to_string()))?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            retry: RetryPolicy::from(&config.retry),
        })
    }

    async fn fetch_once(&self, fid: u64) -> Result<DirectoryProfile, DirectoryError> {
        let url = format!("{}/v2/farcaster/user/bulk?fids={fid}", self.base_url);
        let response = self
            .http
            .get(&url)
            .header("x-api-key", &self.api_key)
            .header("accept", "application/json")
            .send()
            .await
            .map_err(|e| DirectoryError::Request(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(DirectoryError::NotFound(fid));
        }
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());
            warn!(status = status.as_u16(), fid, "Directory API returned error");
            return Err(DirectoryError::ApiError {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: BulkUsersResponse = response
            .json()
            .await
            .map_err(|e| DirectoryError::Decode(e.to_string()))?;

        parsed
            .users
            .into_iter()
            .find(|u| u.fid == fid)
            .ok_or(DirectoryError::NotFound(fid))?
            .into_profile()
    }
}

#[async_trait]
impl IdentityDirectory for NeynarDirectory {
    #[instrument(skip(self))]
    async fn lookup_profile(&self, fid: u64) -> Result<DirectoryProfile, DirectoryError> {
        let profile = self
            .retry
            .run("directory.lookup_profile", move |_| self.fetch_once(fid))
            .await?;
        debug!(fid, username = %profile.username, "Directory profile resolved");
        Ok(profile)
    }
}
