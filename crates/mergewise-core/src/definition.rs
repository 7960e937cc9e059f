//! Declarative condition/action descriptions for deployable rules.
//!
//! A rule body is data, never code: a tree of [`Condition`]s over the two
//! records and the evaluation context, plus a list of [`Action`]s that fill in
//! the fixed verdict shape. The host crate compiles this into an evaluator.
//!
//! ```json
//! {
//!   "condition": { "all": [
//!     { "op": "fields_match", "field": "address" },
//!     { "op": "contains_keyword", "field": "name", "keywords": ["holdings"] }
//!   ]},
//!   "actions": [
//!     { "action": "set_recommendation", "value": "reject" },
//!     { "action": "set_confidence", "score": 70 }
//!   ]
//! }
//! ```

use serde::{Deserialize, Serialize};

use crate::Recommendation;

/// Which record(s) a single-record condition inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    First,
    Second,
    #[default]
    Either,
    Both,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    /// Matches every pair.
    Always(bool),
    All(Vec<Condition>),
    Any(Vec<Condition>),
    Not(Box<Condition>),
    #[serde(untagged)]
    Leaf(Predicate),
}

/// A leaf test. Field names are canonical record fields (`name`, `address`, …)
/// or any raw key present in the records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Predicate {
    /// Normalised field value equals `value`.
    FieldEquals {
        field: String,
        value: String,
        #[serde(default)]
        target: Target,
    },
    /// Normalised field values of both records are equal and non-empty.
    FieldsMatch { field: String },
    /// Edit-distance similarity of the two field values is at least `min`.
    FieldSimilarity { field: String, min: f64 },
    FieldMissing {
        field: String,
        #[serde(default)]
        target: Target,
    },
    /// Case-insensitive regular expression against the raw field value.
    PatternMatch {
        field: String,
        pattern: String,
        #[serde(default)]
        target: Target,
    },
    /// Normalised field contains any of `keywords` as a whole token sequence.
    ContainsKeyword {
        field: String,
        keywords: Vec<String>,
        #[serde(default)]
        target: Target,
    },
    /// Context similarity score (0..=1) is at least `min`.
    ScoreAtLeast { min: f64 },
    /// Context similarity score (0..=1) is below `max`.
    ScoreBelow { max: f64 },
    /// Context environment equals `value`.
    EnvironmentIs { value: String },
}

/// Output step applied, in order, when the condition holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    SetRecommendation { value: Recommendation },
    /// Sets the 0..=100 score; the band follows from the score.
    SetConfidence { score: f64 },
    SetReasoning { text: String },
    SetJustification { text: String },
    SetExemption { text: String },
    AppendFlag { flag: String },
    /// Aborts the execution with an error. Used to retire rules and in drills.
    Fail { message: String },
}

/// Complete rule body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDefinition {
    pub condition: Condition,
    pub actions: Vec<Action>,
}

impl RuleDefinition {
    pub fn new(condition: Condition, actions: Vec<Action>) -> Self {
        Self { condition, actions }
    }
}
