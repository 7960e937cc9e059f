//! Per-rule verdicts and the vocabulary they are expressed in.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Category of a rule. Drives the synthesis weight of its verdicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    BusinessRelationship,
    Hierarchy,
    Geographic,
    BusinessType,
    EntityType,
    DataQuality,
    NameVariation,
    AddressVariation,
    Communication,
    Identifier,
    Custom,
}

impl RuleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BusinessRelationship => "business_relationship",
            Self::Hierarchy => "hierarchy",
            Self::Geographic => "geographic",
            Self::BusinessType => "business_type",
            Self::EntityType => "entity_type",
            Self::DataQuality => "data_quality",
            Self::NameVariation => "name_variation",
            Self::AddressVariation => "address_variation",
            Self::Communication => "communication",
            Self::Identifier => "identifier",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse confidence band attached to every verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceBand {
    High,
    Medium,
    Low,
}

impl ConfidenceBand {
    /// Band for a 0..=100 score: ≥ 80 high, ≥ 50 medium, otherwise low.
    pub fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            Self::High
        } else if score >= 50.0 {
            Self::Medium
        } else {
            Self::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl fmt::Display for ConfidenceBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a rule (or the synthesis) recommends doing with the pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Merge,
    Review,
    Reject,
    Flag,
}

impl Recommendation {
    pub const ALL: [Recommendation; 4] = [Self::Merge, Self::Review, Self::Reject, Self::Flag];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Merge => "merge",
            Self::Review => "review",
            Self::Reject => "reject",
            Self::Flag => "flag",
        }
    }
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One detector's verdict for a record pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleResult {
    pub rule_type: RuleType,
    pub rule_name: String,
    pub confidence: ConfidenceBand,
    /// 0..=100.
    pub confidence_score: f64,
    pub recommendation: Recommendation,
    pub reasoning: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_justification: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exemption_reason: Option<String>,
    #[serde(default)]
    pub flags: Vec<String>,
}

impl RuleResult {
    pub fn new(
        rule_type: RuleType,
        rule_name: impl Into<String>,
        confidence: ConfidenceBand,
        confidence_score: f64,
        recommendation: Recommendation,
        reasoning: impl Into<String>,
    ) -> Self {
        Self {
            rule_type,
            rule_name: rule_name.into(),
            confidence,
            confidence_score: confidence_score.clamp(0.0, 100.0),
            recommendation,
            reasoning: reasoning.into(),
            business_justification: None,
            exemption_reason: None,
            flags: Vec::new(),
        }
    }

    pub fn with_justification(mut self, justification: impl Into<String>) -> Self {
        let j = justification.into();
        if !j.is_empty() {
            self.business_justification = Some(j);
        }
        self
    }

    pub fn with_exemption(mut self, reason: impl Into<String>) -> Self {
        let r = reason.into();
        if !r.is_empty() {
            self.exemption_reason = Some(r);
        }
        self
    }

    pub fn with_flag(mut self, flag: impl Into<String>) -> Self {
        self.flags.push(flag.into());
        self
    }

    /// Shift the score by `delta` points, clamped to 0..=100.
    pub fn adjusted(mut self, delta: i32) -> Self {
        if delta != 0 {
            self.confidence_score = (self.confidence_score + f64::from(delta)).clamp(0.0, 100.0);
        }
        self
    }
}
