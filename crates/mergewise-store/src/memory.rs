//! In-memory store.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use mergewise_core::{BusinessRule, RuleDeploymentStatus, RuleStatistics};
use tokio::sync::RwLock;

use crate::{RuleStore, StoreError, check_id};

#[derive(Debug, Default)]
struct Inner {
    versions: BTreeMap<String, BTreeMap<u32, BusinessRule>>,
    current: BTreeMap<String, u32>,
    statistics: BTreeMap<String, RuleStatistics>,
    deployments: BTreeMap<String, RuleDeploymentStatus>,
}

/// Volatile store. Writes can be switched to fail, to exercise error paths.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
    fail_writes: AtomicBool,
    fail_deployments: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail with [`StoreError::Unavailable`].
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make only deployment-record writes fail.
    pub fn set_fail_deployments(&self, fail: bool) {
        self.fail_deployments.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes disabled".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl RuleStore for MemoryStore {
    async fn list_active_rules(&self) -> Result<Vec<BusinessRule>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .current
            .iter()
            .filter_map(|(id, version)| inner.versions.get(id)?.get(version))
            .filter(|rule| rule.enabled)
            .cloned()
            .collect())
    }

    async fn store_rule(&self, rule: &BusinessRule) -> Result<(), StoreError> {
        check_id(&rule.id)?;
        self.check_writable()?;
        self.inner
            .write()
            .await
            .versions
            .entry(rule.id.clone())
            .or_default()
            .insert(rule.version, rule.clone());
        Ok(())
    }

    async fn promote_rule(&self, id: &str, version: u32) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut inner = self.inner.write().await;
        let stored = inner
            .versions
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?
            .contains_key(&version);
        if !stored {
            return Err(StoreError::VersionNotFound {
                id: id.to_string(),
                version,
            });
        }
        inner.current.insert(id.to_string(), version);
        Ok(())
    }

    async fn fetch_rule(&self, id: &str, version: u32) -> Result<BusinessRule, StoreError> {
        let inner = self.inner.read().await;
        let versions = inner
            .versions
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        versions
            .get(&version)
            .cloned()
            .ok_or_else(|| StoreError::VersionNotFound {
                id: id.to_string(),
                version,
            })
    }

    async fn current_rule(&self, id: &str) -> Result<Option<BusinessRule>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .current
            .get(id)
            .and_then(|v| inner.versions.get(id)?.get(v))
            .cloned())
    }

    async fn update_statistics(&self, stats: &RuleStatistics) -> Result<(), StoreError> {
        self.check_writable()?;
        self.inner
            .write()
            .await
            .statistics
            .insert(stats.rule_id.clone(), stats.clone());
        Ok(())
    }

    async fn load_statistics(&self) -> Result<Vec<RuleStatistics>, StoreError> {
        Ok(self.inner.read().await.statistics.values().cloned().collect())
    }

    async fn record_deployment(&self, status: &RuleDeploymentStatus) -> Result<(), StoreError> {
        self.check_writable()?;
        if self.fail_deployments.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("deployment writes disabled".into()));
        }
        self.inner
            .write()
            .await
            .deployments
            .insert(status.rule_id.clone(), status.clone());
        Ok(())
    }

    async fn deployment(&self, id: &str) -> Result<Option<RuleDeploymentStatus>, StoreError> {
        Ok(self.inner.read().await.deployments.get(id).cloned())
    }
}
