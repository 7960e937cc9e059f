//! Synthesis: combine a baseline fuzzy score with every triggered verdict.
//!
//! The final score is a weighted mean. The baseline enters with weight 1 and
//! each verdict with the fixed weight of its rule type. The decision policy
//! is then applied in order:
//!
//! 1. any `flag` verdict: `{low, flag}`, score capped at the lowest flagging score
//! 2. any exemption: `{low, review}`
//! 3. `final >= 85`: `{high, merge}`
//! 4. `65 <= final < 85`: `{medium, review}`
//! 5. otherwise `{low, reject}`
//!
//! [`synthesize`] is pure. Identical inputs always give identical output.

use mergewise_core::normalize::{self, NormalizedPair};
use mergewise_core::{
    AddressAnalysis, BusinessAnalysis, ConfidenceBand, DataQualityAnalysis, EntityRecord,
    NameAnalysis, Recommendation, RuleResult, RuleType, SmartAnalysisResult,
    record::COMPARABLE_FIELDS,
};

pub const DEFAULT_BUSINESS_CONTEXT: &str = "No specific business context identified";

pub const MERGE_THRESHOLD: f64 = 85.0;
pub const REVIEW_THRESHOLD: f64 = 65.0;

/// Weight of a verdict in the final score.
pub fn rule_weight(rule_type: RuleType) -> f64 {
    match rule_type {
        RuleType::BusinessRelationship => 0.9,
        RuleType::Hierarchy => 0.8,
        RuleType::Geographic => 0.7,
        RuleType::BusinessType => 0.6,
        RuleType::EntityType => 0.8,
        RuleType::DataQuality => 0.5,
        _ => 0.5,
    }
}

/// Weighted mean of the baseline (`fuzzy_score * 100`, weight 1) and each verdict.
pub fn weighted_score(fuzzy_score: f64, results: &[RuleResult]) -> f64 {
    let (score, weight) = results.iter().fold(
        (fuzzy_score.clamp(0.0, 1.0) * 100.0, 1.0),
        |(score, weight), r| {
            let w = rule_weight(r.rule_type);
            (score + r.confidence_score * w, weight + w)
        },
    );
    score / weight
}

/// Apply the decision policy to a weighted score.
pub fn decide(final_score: f64, results: &[RuleResult]) -> (ConfidenceBand, Recommendation, f64) {
    let flag_cap = results
        .iter()
        .filter(|r| r.recommendation == Recommendation::Flag)
        .map(|r| r.confidence_score)
        .reduce(f64::min);
    if let Some(cap) = flag_cap {
        return (ConfidenceBand::Low, Recommendation::Flag, final_score.min(cap));
    }
    if results.iter().any(|r| r.exemption_reason.is_some()) {
        return (ConfidenceBand::Low, Recommendation::Review, final_score);
    }
    if final_score >= MERGE_THRESHOLD {
        (ConfidenceBand::High, Recommendation::Merge, final_score)
    } else if final_score >= REVIEW_THRESHOLD {
        (ConfidenceBand::Medium, Recommendation::Review, final_score)
    } else {
        (ConfidenceBand::Low, Recommendation::Reject, final_score)
    }
}

/// Combine the baseline score and triggered verdicts into one result.
pub fn synthesize(
    r1: &EntityRecord,
    r2: &EntityRecord,
    fuzzy_score: f64,
    results: Vec<RuleResult>,
) -> SmartAnalysisResult {
    let pair = NormalizedPair::from_records(r1, r2);
    synthesize_normalized(r1, r2, &pair, fuzzy_score, results)
}

pub(crate) fn synthesize_normalized(
    r1: &EntityRecord,
    r2: &EntityRecord,
    pair: &NormalizedPair,
    fuzzy_score: f64,
    results: Vec<RuleResult>,
) -> SmartAnalysisResult {
    let final_score = weighted_score(fuzzy_score, &results);
    let (confidence, recommendation, confidence_score) = decide(final_score, &results);

    let justifications: Vec<&str> = results
        .iter()
        .filter_map(|r| r.business_justification.as_deref())
        .filter(|j| !j.is_empty())
        .collect();
    let business_context = if justifications.is_empty() {
        DEFAULT_BUSINESS_CONTEXT.to_string()
    } else {
        justifications.join(". ")
    };
    let exemptions = results
        .iter()
        .filter_map(|r| r.exemption_reason.clone())
        .filter(|e| !e.is_empty())
        .collect();
    let risk_factors = results.iter().flat_map(|r| r.flags.iter().cloned()).collect();

    SmartAnalysisResult {
        confidence,
        confidence_score,
        recommendation,
        business_context,
        risk_factors,
        exemptions,
        name_analysis: name_analysis(pair),
        address_analysis: address_analysis(pair),
        business_analysis: business_analysis(r1, r2, &results),
        data_quality: data_quality(r1, r2),
        triggered_rules: results,
    }
}

fn name_analysis(pair: &NormalizedPair) -> NameAnalysis {
    let exact_match = !pair.name1.is_empty() && pair.name1 == pair.name2;
    NameAnalysis {
        normalized1: pair.name1.clone(),
        normalized2: pair.name2.clone(),
        similarity: pair.name_similarity,
        exact_match,
        suffix_variation: exact_match && pair.raw_name1 != pair.raw_name2,
    }
}

fn address_analysis(pair: &NormalizedPair) -> AddressAnalysis {
    AddressAnalysis {
        normalized1: pair.address1.clone(),
        normalized2: pair.address2.clone(),
        similarity: pair.address_similarity,
        exact_match: !pair.address1.is_empty() && pair.address1 == pair.address2,
        same_city: !pair.city1.is_empty() && pair.same_city(),
        po_box: normalize::is_po_box(&pair.raw_address1) || normalize::is_po_box(&pair.raw_address2),
    }
}

fn business_analysis(r1: &EntityRecord, r2: &EntityRecord, results: &[RuleResult]) -> BusinessAnalysis {
    let industry1 = r1.industry().map(str::to_string);
    let industry2 = r2.industry().map(str::to_string);
    let industry_match = match (&industry1, &industry2) {
        (Some(a), Some(b)) => Some(normalize::normalize_text(a) == normalize::normalize_text(b)),
        _ => None,
    };
    let relationship_signals = results
        .iter()
        .filter(|r| {
            matches!(
                r.rule_type,
                RuleType::BusinessRelationship | RuleType::Hierarchy | RuleType::BusinessType
            )
        })
        .map(|r| r.rule_name.clone())
        .collect();
    BusinessAnalysis {
        industry1,
        industry2,
        industry_match,
        relationship_signals,
    }
}

fn data_quality(r1: &EntityRecord, r2: &EntityRecord) -> DataQualityAnalysis {
    let missing1 = r1.missing_fields();
    let missing2 = r2.missing_fields();
    let total = (COMPARABLE_FIELDS.len() * 2) as f64;
    let completeness = (total - (missing1.len() + missing2.len()) as f64) / total;

    let mut issues = Vec::new();
    for (label, missing) in [("record 1", &missing1), ("record 2", &missing2)] {
        for field in ["name", "address"] {
            if missing.contains(&field) {
                issues.push(format!("{label} is missing required field '{field}'"));
            }
        }
    }

    DataQualityAnalysis {
        missing_fields1: missing1.iter().map(|f| f.to_string()).collect(),
        missing_fields2: missing2.iter().map(|f| f.to_string()).collect(),
        completeness,
        issues,
    }
}
