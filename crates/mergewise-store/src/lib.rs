//! Persistence for deployable rules, execution statistics, and deployment records.
//!
//! [`RuleStore`] is the contract the execution engine and deployment manager
//! depend on. Two implementations ship here: [`MemoryStore`] for tests and
//! single-run CLI use, and [`JsonStore`], a directory of JSON documents.

mod error;
mod json;
mod memory;

pub use error::StoreError;
pub use json::JsonStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use mergewise_core::{BusinessRule, RuleDeploymentStatus, RuleStatistics};

/// Storage operations keyed by rule id, and by id + version for rule payloads.
///
/// No compare-and-swap is offered: concurrent writers to the same rule id
/// resolve last-write-wins.
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Current version of every enabled rule.
    async fn list_active_rules(&self) -> Result<Vec<BusinessRule>, StoreError>;

    /// Store `rule` under `(id, version)` without moving the current version.
    /// Storing an existing `(id, version)` overwrites that payload.
    async fn store_rule(&self, rule: &BusinessRule) -> Result<(), StoreError>;

    /// Make a stored version the current one.
    async fn promote_rule(&self, id: &str, version: u32) -> Result<(), StoreError>;

    /// Store `rule` and make it the current version.
    async fn save_rule(&self, rule: &BusinessRule) -> Result<(), StoreError> {
        self.store_rule(rule).await?;
        self.promote_rule(&rule.id, rule.version).await
    }

    async fn fetch_rule(&self, id: &str, version: u32) -> Result<BusinessRule, StoreError>;

    async fn current_rule(&self, id: &str) -> Result<Option<BusinessRule>, StoreError>;

    async fn update_statistics(&self, stats: &RuleStatistics) -> Result<(), StoreError>;

    async fn load_statistics(&self) -> Result<Vec<RuleStatistics>, StoreError>;

    async fn record_deployment(&self, status: &RuleDeploymentStatus) -> Result<(), StoreError>;

    async fn deployment(&self, id: &str) -> Result<Option<RuleDeploymentStatus>, StoreError>;
}

/// Reject ids that cannot be used as a single path component.
pub(crate) fn check_id(id: &str) -> Result<(), StoreError> {
    let bad = id.is_empty()
        || id == "."
        || id == ".."
        || id.contains(['/', '\\', '\0']);
    if bad {
        return Err(StoreError::InvalidId(id.to_string()));
    }
    Ok(())
}
