//! `Hivelink` Core Library
//!
//! Shared functionality for `Hivelink` components:
//! - `SQLite` pool helpers and the `define_database!` macro
//! - Layered service configuration
//! - Retry/backoff policy for calls to external services
//! - Tracing and (optional) metrics initialisation

pub mod config;
pub mod db;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod retry;
pub mod tracing_init;

pub use config::{ConfigError, ServiceConfig};
pub use retry::RetryPolicy;
