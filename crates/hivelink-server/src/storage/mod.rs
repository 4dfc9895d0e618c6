//! SQLite storage for the Hivelink server.
//!
//! Persists users, identities, sessions, sponsorships, custodial key records
//! and the side-effect log. Uniqueness rules live in the schema (partial
//! unique indexes) so that concurrent requests cannot both succeed.

mod db;
mod models;
mod queries;
mod queries_identity;
mod queries_keys;
mod queries_side_effects;
mod queries_sponsorship;


pub use db::AppDatabase;
pub use hivelink_core::db::DatabaseError;
pub use models::*;
pub use queries_identity::{IdentityInsert, NewIdentity};
pub use queries_keys::NewCustodialKey;
pub use queries_sponsorship::{FinalizeOutcome, FinalizeSponsorship, NewSponsorship};
