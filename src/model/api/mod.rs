//! API-compatible types.
//!
//! The types in this module are serialised in an API-friendly way, e.g.:
//!
//! - IDs are serialised as hex strings.
//! - Datetimes are serialised as RFC 3339 strings.
//! - Entry hashes are serialised as lowercase hex.

pub mod auth;
pub mod candidate;
pub mod chain;
pub mod pagination;
pub mod vote;

mod id;

pub use id::ApiId;
