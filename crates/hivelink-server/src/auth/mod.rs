//! Authentication for the Hivelink server.
//!
//! Sessions are opaque random tokens; only their SHA-256 hash is stored.

pub mod session;

pub use session::{AuthError, IssuedSession, SessionValidator};
