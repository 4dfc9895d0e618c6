//! Configuration resolution for Hivelink.
//!
//! Resolution order (lowest to highest priority):
//! 1. Built-in defaults
//! 2. JSON config file (`--config` / `HIVELINK_CONFIG`)
//! 3. `HIVELINK_*` environment variables
//! 4. CLI arguments (applied by the binary)
//!
//! Secrets (vault master key, API keys) are deliberately absent from the file
//! format; the binary reads them from the environment only.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

/// Failure to load the config file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Complete Hivelink service configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ServiceConfig {
    pub server: ServerConfig,
    pub chain: ChainConfig,
    pub directory: DirectoryConfig,
    pub email: EmailConfig,
}

/// HTTP surface and workflow settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Cookie that carries the opaque session token.
    pub session_cookie: String,
    /// Hide internal error detail from API responses.
    pub production: bool,
    /// Sponsorships stuck in `processing` longer than this are failed by the
    /// background sweep.
    pub stale_processing_secs: i64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            session_cookie: "hivelink_session".to_string(),
            production: false,
            stale_processing_secs: 15 * 60,
        }
    }
}

/// Per-call timeout and retry budget for an external service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub timeout_ms: u64,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            max_attempts: 3,
            initial_backoff_ms: 250,
            max_backoff_ms: 2_000,
        }
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(s: &RetrySettings) -> Self {
        Self {
            initial_delay: Duration::from_millis(s.initial_backoff_ms),
            max_delay: Duration::from_millis(s.max_backoff_ms),
            multiplier: 2.0,
            max_attempts: s.max_attempts.max(1),
            request_timeout: Duration::from_millis(s.timeout_ms),
        }
    }
}

/// Chain JSON-RPC settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// RPC nodes, tried round-robin across retry attempts.
    pub rpc_urls: Vec<String>,
    pub retry: RetrySettings,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            rpc_urls: vec![
                "https://api.hive.blog".to_string(),
                "https://api.deathwing.me".to_string(),
            ],
            retry: RetrySettings::default(),
        }
    }
}

/// Social-graph directory API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    pub base_url: String,
    pub retry: RetrySettings,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.neynar.com".to_string(),
            retry: RetrySettings::default(),
        }
    }
}

/// Transactional email API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    pub api_url: String,
    pub from_address: String,
    pub retry: RetrySettings,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.resend.com/emails".to_string(),
            from_address: "Hivelink <accounts@hivelink.app>".to_string(),
            retry: RetrySettings {
                timeout_ms: 15_000,
                ..RetrySettings::default()
            },
        }
    }
}

/// Load configuration: defaults, then the optional file, then environment.
pub fn load_config(path: Option<&Path>) -> Result<ServiceConfig, ConfigError> {
    let mut config = match path {
        Some(p) => load_config_file(p)?,
        None => ServiceConfig::default(),
    };
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

fn load_config_file(path: &Path) -> Result<ServiceConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn apply_env_overrides(config: &mut ServiceConfig, var: impl Fn(&str) -> Option<String>) {
    if let Some(val) = var("HIVELINK_PRODUCTION") {
        config.server.production = matches!(val.as_str(), "1" | "true" | "yes");
    }
    if let Some(val) = var("HIVELINK_SESSION_COOKIE") {
        config.server.session_cookie = val;
    }
    if let Some(n) = var("HIVELINK_STALE_PROCESSING_SECS").and_then(|v| v.parse().ok()) {
        config.server.stale_processing_secs = n;
    }
    if let Some(val) = var("HIVELINK_CHAIN_RPC_URLS") {
        let urls: Vec<String> = val
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
        if !urls.is_empty() {
            config.chain.rpc_urls = urls;
        }
    }
    if let Some(n) = var("HIVELINK_CHAIN_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
        config.chain.retry.timeout_ms = n;
    }
    if let Some(n) = var("HIVELINK_CHAIN_MAX_ATTEMPTS").and_then(|v| v.parse().ok()) {
        config.chain.retry.max_attempts = n;
    }
    if let Some(val) = var("HIVELINK_DIRECTORY_URL") {
        config.directory.base_url = val;
    }
    if let Some(val) = var("HIVELINK_EMAIL_API_URL") {
        config.email.api_url = val;
    }
    if let Some(val) = var("HIVELINK_EMAIL_FROM") {
        config.email.from_address = val;
    }
}
