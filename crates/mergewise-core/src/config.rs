//! Rule and engine configuration.
//!
//! Catalog rule configuration is defined statically (the defaults live next
//! to the detectors) and is never mutated in place: every update returns a new
//! [`CatalogConfig`] snapshot. A TOML file can patch individual rules and set
//! engine-wide limits.
//!
//! ```toml
//! [engine]
//! rule_timeout_ms = 5000
//! environment = "staging"
//!
//! [rules.freight_forwarder]
//! keywords = ["freight", "logistics", "dhl"]
//! priority = 9
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("{field} out of range: {value}")]
    OutOfRange { field: String, value: String },

    #[error("unknown rule: {0}")]
    UnknownRule(String),
}

// ── Rule configuration ──

/// Configuration of one catalog detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleConfiguration {
    pub enabled: bool,
    /// 1..=10, higher runs first.
    pub priority: u8,
    /// Added to the detector's base score, -100..=100.
    #[serde(default)]
    pub confidence_adjustment: i32,
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub thresholds: BTreeMap<String, f64>,
    #[serde(default)]
    pub exemption_message: Option<String>,
    #[serde(default)]
    pub business_justification: String,
}

impl RuleConfiguration {
    pub fn new(priority: u8) -> Self {
        Self {
            enabled: true,
            priority,
            confidence_adjustment: 0,
            patterns: Vec::new(),
            keywords: Vec::new(),
            thresholds: BTreeMap::new(),
            exemption_message: None,
            business_justification: String::new(),
        }
    }

    pub fn keywords(mut self, words: &[&str]) -> Self {
        self.keywords = words.iter().map(|w| w.to_string()).collect();
        self
    }

    pub fn patterns(mut self, patterns: &[&str]) -> Self {
        self.patterns = patterns.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn threshold(mut self, key: &str, value: f64) -> Self {
        self.thresholds.insert(key.to_string(), value);
        self
    }

    pub fn exemption(mut self, message: &str) -> Self {
        self.exemption_message = Some(message.to_string());
        self
    }

    pub fn justification(mut self, text: &str) -> Self {
        self.business_justification = text.to_string();
        self
    }

    /// Threshold by key, falling back to `default` when unset.
    pub fn threshold_or(&self, key: &str, default: f64) -> f64 {
        self.thresholds.get(key).copied().unwrap_or(default)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=10).contains(&self.priority) {
            return Err(ConfigError::OutOfRange {
                field: "priority".into(),
                value: self.priority.to_string(),
            });
        }
        if !(-100..=100).contains(&self.confidence_adjustment) {
            return Err(ConfigError::OutOfRange {
                field: "confidence_adjustment".into(),
                value: self.confidence_adjustment.to_string(),
            });
        }
        Ok(())
    }

    /// Return a copy with every `Some` field of `patch` applied.
    pub fn patched(&self, patch: &RulePatch) -> Result<Self, ConfigError> {
        let mut next = self.clone();
        if let Some(v) = patch.enabled {
            next.enabled = v;
        }
        if let Some(v) = patch.priority {
            next.priority = v;
        }
        if let Some(v) = patch.confidence_adjustment {
            next.confidence_adjustment = v;
        }
        if let Some(v) = &patch.patterns {
            next.patterns.clone_from(v);
        }
        if let Some(v) = &patch.keywords {
            next.keywords.clone_from(v);
        }
        if let Some(v) = &patch.thresholds {
            next.thresholds.extend(v.iter().map(|(k, t)| (k.clone(), *t)));
        }
        if let Some(v) = &patch.exemption_message {
            next.exemption_message = Some(v.clone());
        }
        if let Some(v) = &patch.business_justification {
            next.business_justification.clone_from(v);
        }
        next.validate()?;
        Ok(next)
    }
}

/// Partial update for a [`RuleConfiguration`]. Unset fields keep their value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RulePatch {
    pub enabled: Option<bool>,
    pub priority: Option<u8>,
    pub confidence_adjustment: Option<i32>,
    pub patterns: Option<Vec<String>>,
    pub keywords: Option<Vec<String>>,
    pub thresholds: Option<BTreeMap<String, f64>>,
    pub exemption_message: Option<String>,
    pub business_justification: Option<String>,
}

// ── Catalog snapshot ──

/// Immutable snapshot of every catalog rule's configuration, in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogConfig {
    rules: Vec<(String, RuleConfiguration)>,
}

impl CatalogConfig {
    pub fn from_rules(rules: Vec<(String, RuleConfiguration)>) -> Self {
        Self { rules }
    }

    pub fn get(&self, key: &str) -> Option<&RuleConfiguration> {
        self.rules.iter().find(|(k, _)| k == key).map(|(_, c)| c)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|(k, _)| k.as_str())
    }

    /// Enabled rules ordered by priority, descending. Ties keep declaration order.
    pub fn active(&self) -> Vec<(&str, &RuleConfiguration)> {
        let mut active: Vec<(&str, &RuleConfiguration)> = self
            .rules
            .iter()
            .filter(|(_, c)| c.enabled)
            .map(|(k, c)| (k.as_str(), c))
            .collect();
        active.sort_by(|a, b| b.1.priority.cmp(&a.1.priority));
        active
    }

    /// New snapshot with one rule patched.
    pub fn with_update(&self, key: &str, patch: &RulePatch) -> Result<Self, ConfigError> {
        let current = self
            .get(key)
            .ok_or_else(|| ConfigError::UnknownRule(key.to_string()))?;
        let updated = current.patched(patch)?;
        Ok(self.replaced(key, updated))
    }

    /// New snapshot with every patch from `patches` applied.
    pub fn with_updates(&self, patches: &BTreeMap<String, RulePatch>) -> Result<Self, ConfigError> {
        patches
            .iter()
            .try_fold(self.clone(), |cfg, (key, patch)| cfg.with_update(key, patch))
    }

    pub fn enable(&self, key: &str) -> Result<Self, ConfigError> {
        self.set_enabled(key, true)
    }

    pub fn disable(&self, key: &str) -> Result<Self, ConfigError> {
        self.set_enabled(key, false)
    }

    fn set_enabled(&self, key: &str, enabled: bool) -> Result<Self, ConfigError> {
        self.with_update(
            key,
            &RulePatch {
                enabled: Some(enabled),
                ..Default::default()
            },
        )
    }

    fn replaced(&self, key: &str, config: RuleConfiguration) -> Self {
        let rules = self
            .rules
            .iter()
            .map(|(k, c)| {
                if k == key {
                    (k.clone(), config.clone())
                } else {
                    (k.clone(), c.clone())
                }
            })
            .collect();
        Self { rules }
    }
}

// ── Engine settings / config file ──

/// Engine-wide limits for dynamic rule execution and deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Per-rule execution budget.
    pub rule_timeout_ms: u64,
    /// Interpreter step budget per rule execution.
    pub max_steps: u64,
    pub environment: String,
    /// Approvals a rule must carry before it can be deployed.
    pub required_approvals: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            rule_timeout_ms: 5000,
            max_steps: 10_000,
            environment: "production".to_string(),
            required_approvals: 0,
        }
    }
}

/// Parsed configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub engine: EngineSettings,
    /// Catalog patches keyed by rule key.
    pub rules: BTreeMap<String, RulePatch>,
}

impl ConfigFile {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let file: Self = toml::from_str(s)?;
        if file.engine.max_steps == 0 {
            return Err(ConfigError::OutOfRange {
                field: "engine.max_steps".into(),
                value: "0".into(),
            });
        }
        Ok(file)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file = Self::from_toml_str(&text)?;
        tracing::info!(
            path = %path.display(),
            patched_rules = file.rules.len(),
            "loaded config file"
        );
        Ok(file)
    }
}
