//! Outbound integration: escalation of undecided pairs to an external scorer.

#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "http")]
pub use http::{ReviewClient, ReviewRequest, ReviewScore, SyncError};
