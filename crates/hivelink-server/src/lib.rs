//! Hivelink Server Library
//!
//! Core functionality for the Hivelink server:
//! - SQLite storage for users, identities, sessions, sponsorships and keys
//! - Opaque session validation
//! - Identity linking with merge detection and signature proofs
//! - Account sponsorship workflow and credential custody
//! - Adapters for the social-graph directory, chain RPC and email API
//! - axum HTTP surface

pub mod auth;
pub mod chain;
pub mod directory;
pub mod http;
pub mod identity;
pub mod notify;
pub mod server;
pub mod sponsorship;
pub mod storage;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;
