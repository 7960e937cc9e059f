//! The synthesised outcome for one record pair.

use serde::{Deserialize, Serialize};

use crate::{ConfidenceBand, Recommendation, RuleResult};

/// Final verdict for a pair, with the evidence that produced it.
///
/// Produced once per evaluation and not persisted here; export and review
/// collaborators consume it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmartAnalysisResult {
    pub confidence: ConfidenceBand,
    /// 0..=100.
    pub confidence_score: f64,
    pub recommendation: Recommendation,
    pub triggered_rules: Vec<RuleResult>,
    pub business_context: String,
    pub risk_factors: Vec<String>,
    pub exemptions: Vec<String>,
    pub name_analysis: NameAnalysis,
    pub address_analysis: AddressAnalysis,
    pub business_analysis: BusinessAnalysis,
    pub data_quality: DataQualityAnalysis,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NameAnalysis {
    pub normalized1: String,
    pub normalized2: String,
    pub similarity: f64,
    pub exact_match: bool,
    /// Names differ only by a legal-entity suffix.
    pub suffix_variation: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AddressAnalysis {
    pub normalized1: String,
    pub normalized2: String,
    pub similarity: f64,
    pub exact_match: bool,
    pub same_city: bool,
    /// Either address is a PO box.
    pub po_box: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BusinessAnalysis {
    pub industry1: Option<String>,
    pub industry2: Option<String>,
    /// `None` when either side has no industry code.
    pub industry_match: Option<bool>,
    /// Names of the triggered rules that speak to business structure.
    pub relationship_signals: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataQualityAnalysis {
    pub missing_fields1: Vec<String>,
    pub missing_fields2: Vec<String>,
    /// Fraction of comparable fields populated across both records (0..=1).
    pub completeness: f64,
    pub issues: Vec<String>,
}
