//! Directory-of-JSON store.
//!
//! Layout under the root directory:
//!
//! ```text
//! rules/<id>/v<version>.json   one file per stored version
//! rules/<id>/current.json      {"version": n}
//! statistics/<id>.json
//! deployments/<id>.json
//! ```
//!
//! Files are written to a temporary sibling and renamed into place.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use mergewise_core::{BusinessRule, RuleDeploymentStatus, RuleStatistics};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{RuleStore, StoreError, check_id};

#[derive(Debug, Serialize, Deserialize)]
struct CurrentPointer {
    version: u32,
}

/// File-backed store that survives process restarts.
#[derive(Debug, Clone)]
pub struct JsonStore {
    root: PathBuf,
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl JsonStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        for sub in ["rules", "statistics", "deployments"] {
            let dir = root.join(sub);
            tokio::fs::create_dir_all(&dir).await.map_err(io_err(&dir))?;
        }
        info!(root = %root.display(), "opened json store");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn rule_dir(&self, id: &str) -> PathBuf {
        self.root.join("rules").join(id)
    }

    fn version_path(&self, id: &str, version: u32) -> PathBuf {
        self.rule_dir(id).join(format!("v{version}.json"))
    }

    fn current_path(&self, id: &str) -> PathBuf {
        self.rule_dir(id).join("current.json")
    }

    async fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err(parent))?;
        }
        let bytes = serde_json::to_vec_pretty(value)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await.map_err(io_err(&tmp))?;
        tokio::fs::rename(&tmp, path).await.map_err(io_err(path))?;
        debug!(path = %path.display(), "wrote json document");
        Ok(())
    }

    /// `Ok(None)` when the file does not exist.
    async fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>, StoreError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_err(path)(e)),
        }
    }

    /// Every `*.json` document directly inside `dir`.
    async fn read_all<T: DeserializeOwned>(&self, dir: &Path) -> Result<Vec<T>, StoreError> {
        let mut paths = Vec::new();
        let mut entries = tokio::fs::read_dir(dir).await.map_err(io_err(dir))?;
        while let Some(entry) = entries.next_entry().await.map_err(io_err(dir))? {
            let path = entry.path();
            if path.extension().is_some_and(|e| e == "json") {
                paths.push(path);
            }
        }
        paths.sort();
        let mut out = Vec::with_capacity(paths.len());
        for path in paths {
            if let Some(doc) = self.read_json(&path).await? {
                out.push(doc);
            }
        }
        Ok(out)
    }

    async fn rule_ids(&self) -> Result<Vec<String>, StoreError> {
        let dir = self.root.join("rules");
        let mut ids = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await.map_err(io_err(&dir))?;
        while let Some(entry) = entries.next_entry().await.map_err(io_err(&dir))? {
            let is_dir = entry
                .file_type()
                .await
                .map_err(io_err(&dir))?
                .is_dir();
            if is_dir && let Some(name) = entry.file_name().to_str() {
                ids.push(name.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[async_trait]
impl RuleStore for JsonStore {
    async fn list_active_rules(&self) -> Result<Vec<BusinessRule>, StoreError> {
        let mut rules = Vec::new();
        for id in self.rule_ids().await? {
            if let Some(rule) = self.current_rule(&id).await?
                && rule.enabled
            {
                rules.push(rule);
            }
        }
        Ok(rules)
    }

    async fn store_rule(&self, rule: &BusinessRule) -> Result<(), StoreError> {
        check_id(&rule.id)?;
        self.write_json(&self.version_path(&rule.id, rule.version), rule)
            .await
    }

    async fn promote_rule(&self, id: &str, version: u32) -> Result<(), StoreError> {
        // Fails with NotFound / VersionNotFound before the pointer moves.
        self.fetch_rule(id, version).await?;
        self.write_json(&self.current_path(id), &CurrentPointer { version })
            .await
    }

    async fn fetch_rule(&self, id: &str, version: u32) -> Result<BusinessRule, StoreError> {
        check_id(id)?;
        if !tokio::fs::try_exists(self.rule_dir(id))
            .await
            .map_err(io_err(&self.root))?
        {
            return Err(StoreError::NotFound(id.to_string()));
        }
        self.read_json(&self.version_path(id, version))
            .await?
            .ok_or_else(|| StoreError::VersionNotFound {
                id: id.to_string(),
                version,
            })
    }

    async fn current_rule(&self, id: &str) -> Result<Option<BusinessRule>, StoreError> {
        check_id(id)?;
        let Some(pointer) = self
            .read_json::<CurrentPointer>(&self.current_path(id))
            .await?
        else {
            return Ok(None);
        };
        self.read_json(&self.version_path(id, pointer.version)).await
    }

    async fn update_statistics(&self, stats: &RuleStatistics) -> Result<(), StoreError> {
        check_id(&stats.rule_id)?;
        let path = self
            .root
            .join("statistics")
            .join(format!("{}.json", stats.rule_id));
        self.write_json(&path, stats).await
    }

    async fn load_statistics(&self) -> Result<Vec<RuleStatistics>, StoreError> {
        self.read_all(&self.root.join("statistics")).await
    }

    async fn record_deployment(&self, status: &RuleDeploymentStatus) -> Result<(), StoreError> {
        check_id(&status.rule_id)?;
        let path = self
            .root
            .join("deployments")
            .join(format!("{}.json", status.rule_id));
        self.write_json(&path, status).await
    }

    async fn deployment(&self, id: &str) -> Result<Option<RuleDeploymentStatus>, StoreError> {
        check_id(id)?;
        let path = self.root.join("deployments").join(format!("{id}.json"));
        self.read_json(&path).await
    }
}
