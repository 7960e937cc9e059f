//! Deployable, versioned business rules and their lifecycle records.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{EntityRecord, Recommendation, RuleDefinition, RuleType};

/// Authoring lifecycle of a rule payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleState {
    #[default]
    Draft,
    Validated,
    Active,
    Disabled,
}

/// A sign-off on a rule before deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Approval {
    pub approver: String,
    pub approved_at: DateTime<Utc>,
    #[serde(default)]
    pub comment: Option<String>,
}

/// Example pair shipped with a rule, checked on every deploy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleTestCase {
    pub name: String,
    pub record1: EntityRecord,
    pub record2: EntityRecord,
    #[serde(default = "default_test_score")]
    pub similarity_score: f64,
    /// `None` means the rule must not trigger.
    pub expected: Option<Recommendation>,
}

fn default_test_score() -> f64 {
    0.8
}

/// A deployable rule, distinct from the static heuristic catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusinessRule {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_category")]
    pub category: RuleType,
    /// Higher runs first.
    pub priority: u8,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub version: u32,
    #[serde(default)]
    pub author: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    /// Overrides the engine-wide execution budget.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    pub definition: RuleDefinition,
    #[serde(default)]
    pub test_cases: Vec<RuleTestCase>,
    #[serde(default)]
    pub approvals: Vec<Approval>,
    #[serde(default)]
    pub state: RuleState,
}

fn default_category() -> RuleType {
    RuleType::Custom
}

fn default_enabled() -> bool {
    true
}

impl BusinessRule {
    /// New draft at version 1.
    pub fn new(id: &str, name: &str, priority: u8, definition: RuleDefinition) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: String::new(),
            category: RuleType::Custom,
            priority,
            enabled: true,
            version: 1,
            author: String::new(),
            created_at: now,
            updated_at: now,
            timeout_ms: None,
            definition,
            test_cases: Vec::new(),
            approvals: Vec::new(),
            state: RuleState::Draft,
        }
    }

    /// Copy of this rule with a new body at the next version.
    pub fn revised(&self, definition: RuleDefinition) -> Self {
        Self {
            version: self.version + 1,
            definition,
            updated_at: Utc::now(),
            approvals: Vec::new(),
            state: RuleState::Draft,
            ..self.clone()
        }
    }
}

// ── Statistics ──

/// Per-rule execution counters. `executions == successes + failures`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleStatistics {
    pub rule_id: String,
    pub executions: u64,
    pub successes: u64,
    pub failures: u64,
    pub avg_execution_ms: f64,
    pub last_executed: Option<DateTime<Utc>>,
    pub recommendations: BTreeMap<Recommendation, u64>,
}

impl RuleStatistics {
    pub fn new(rule_id: &str) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            ..Default::default()
        }
    }

    /// Fold one execution into the counters.
    ///
    /// `recommendation` is only counted for successful executions that
    /// produced a verdict.
    pub fn record(
        &mut self,
        success: bool,
        recommendation: Option<Recommendation>,
        elapsed_ms: f64,
        at: DateTime<Utc>,
    ) {
        self.executions += 1;
        if success {
            self.successes += 1;
            if let Some(rec) = recommendation {
                *self.recommendations.entry(rec).or_insert(0) += 1;
            }
        } else {
            self.failures += 1;
        }
        let n = self.executions as f64;
        self.avg_execution_ms = (self.avg_execution_ms * (n - 1.0) + elapsed_ms) / n;
        self.last_executed = Some(at);
    }
}

// ── Deployment status ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentState {
    Active,
    RollingBack,
}

/// Live deployment record for a rule id, superseded on each redeploy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDeploymentStatus {
    pub rule_id: String,
    pub version: u32,
    pub environment: String,
    pub deployed_at: DateTime<Utc>,
    pub deployed_by: String,
    pub status: DeploymentState,
    /// The single retained rollback target.
    pub previous_version: Option<u32>,
}
