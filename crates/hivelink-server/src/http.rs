//! Shared outbound HTTP client construction.

/// User agent sent to external services.
const USER_AGENT: &str = concat!("hivelink/", env!("CARGO_PKG_VERSION"));

/// Build a `reqwest` client for talking to external services.
///
/// The workspace builds reqwest with `rustls-no-provider`, so the `ring`
/// provider is installed here (a no-op if one is already installed).
/// Per-request timeouts come from the caller's retry policy.
pub fn build_client() -> Result<reqwest::Client, reqwest::Error> {
    let _ = rustls::crypto::ring::default_provider().install_default();
    reqwest::Client::builder().user_agent(USER_AGENT).build()
}
