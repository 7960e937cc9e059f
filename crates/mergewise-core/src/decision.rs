//! Input context and output shape of dynamic rule evaluation.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ConfidenceBand, Recommendation, RuleResult};

/// Caller-supplied context for one evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationContext {
    /// Baseline similarity of the pair, 0..=1.
    pub similarity_score: f64,
    pub timestamp: DateTime<Utc>,
    pub environment: String,
}

impl EvaluationContext {
    pub fn new(similarity_score: f64, environment: &str) -> Self {
        Self {
            similarity_score: similarity_score.clamp(0.0, 1.0),
            timestamp: Utc::now(),
            environment: environment.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecisionStatistics {
    pub total_records: usize,
    pub duplicates_found: usize,
    pub processing_time_ms: f64,
}

/// The rule version that decided the outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedRule {
    pub id: String,
    pub version: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionMetadata {
    pub result: RuleResult,
    pub applied_rule: Option<AppliedRule>,
}

/// Outcome of evaluating the dynamic rule set against one pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionResult {
    pub recommendation: Recommendation,
    pub confidence: ConfidenceBand,
    /// 0..=1.
    pub score: f64,
    pub statistics: DecisionStatistics,
    pub data_quality_issues: Vec<String>,
    /// Score (0..=1) of every rule that produced a verdict, keyed by rule id.
    pub confidence_scores: BTreeMap<String, f64>,
    pub metadata: DecisionMetadata,
}

impl DecisionResult {
    pub fn is_definitive(&self) -> bool {
        self.metadata.applied_rule.is_some()
    }
}
