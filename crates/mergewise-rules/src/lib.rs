//! Heuristic business-rule catalog and verdict synthesis.
//!
//! [`SmartAnalyzer`] is the entry point: it runs every enabled detector of a
//! [`Catalog`] over a record pair and synthesises the verdicts with the
//! caller's baseline fuzzy score.

pub mod catalog;
pub mod summary;
pub mod synthesis;

pub use catalog::{Catalog, CatalogError, CatalogRule, Detector, default_catalog_config};
pub use summary::{BatchSummary, BlockStats, MasterGroup, PairOutcome, build_blocks};
pub use synthesis::{decide, rule_weight, synthesize, weighted_score};

use mergewise_core::{CatalogConfig, EntityRecord, NormalizedPair, SmartAnalysisResult};

/// Catalog plus synthesis, bound to one configuration snapshot.
#[derive(Debug, Clone)]
pub struct SmartAnalyzer {
    catalog: Catalog,
}

impl SmartAnalyzer {
    pub fn new(config: &CatalogConfig) -> Result<Self, CatalogError> {
        Ok(Self {
            catalog: Catalog::new(config)?,
        })
    }

    pub fn with_defaults() -> Result<Self, CatalogError> {
        Self::new(&default_catalog_config())
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Analyse one pair. `fuzzy_score` is the external baseline, 0..=1.
    pub fn analyze(
        &self,
        r1: &EntityRecord,
        r2: &EntityRecord,
        fuzzy_score: f64,
    ) -> SmartAnalysisResult {
        let pair = NormalizedPair::from_records(r1, r2);
        let results = self.catalog.evaluate_normalized(r1, r2, &pair);
        let analysis = synthesis::synthesize_normalized(r1, r2, &pair, fuzzy_score, results);
        tracing::debug!(
            score = analysis.confidence_score,
            recommendation = %analysis.recommendation,
            triggered = analysis.triggered_rules.len(),
            "pair analysed"
        );
        analysis
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mergewise_core::{ConfidenceBand, Recommendation};

    fn analyzer() -> SmartAnalyzer {
        SmartAnalyzer::with_defaults().unwrap()
    }

    #[test]
    fn suffix_and_street_variants_merge() {
        let r1 = EntityRecord::company("Acme Corporation", "123 Main Street", "New York");
        let r2 = EntityRecord::company("ACME Corp", "123 Main St", "New York");
        let out = analyzer().analyze(&r1, &r2, 0.9);
        assert_eq!(out.recommendation, Recommendation::Merge);
        assert_eq!(out.confidence, ConfidenceBand::High);
        assert!(out.confidence_score >= 85.0, "{}", out.confidence_score);
        assert!(out.exemptions.is_empty());
    }

    #[test]
    fn legal_suffix_variants_at_one_address_merge() {
        let a = analyzer();
        for (n1, n2) in [
            ("Acme Widgets", "Acme Widgets Inc"),
            ("Northwind Traders", "Northwind Traders Ltd"),
            ("Contoso Pharmaceuticals", "Contoso Pharmaceuticals LLC"),
        ] {
            let r1 = EntityRecord::company(n1, "200 Market Street", "Seattle");
            let r2 = EntityRecord::company(n2, "200 Market St", "Seattle");
            let out = a.analyze(&r1, &r2, 0.95);
            assert_eq!(out.recommendation, Recommendation::Merge, "{n1} / {n2}");
            assert!(
                !out.risk_factors.contains(&"person_contact".to_string()),
                "{n1} / {n2}"
            );
        }
    }

    #[test]
    fn freight_forwarder_is_flagged_despite_shared_address() {
        let r1 = EntityRecord::company("DHL Express", "123 Industrial Way", "Houston");
        let r2 = EntityRecord::company("Acme Chemical Manufacturing", "123 Industrial Way", "Houston");
        let out = analyzer().analyze(&r1, &r2, 0.6);
        assert_eq!(out.recommendation, Recommendation::Flag);
        assert_eq!(out.confidence, ConfidenceBand::Low);
        assert!(out.risk_factors.contains(&"freight_forwarder".to_string()));
    }

    #[test]
    fn freight_flag_overrides_any_other_score() {
        let a = analyzer();
        let cases = [
            ("DHL Express", "DHL Express", 1.0),
            ("Kuehne Nagel AG", "Kuehne + Nagel", 0.95),
            ("Acme Logistics", "Acme Corp", 0.99),
            ("Globex", "Northwind Freight", 0.1),
        ];
        for (n1, n2, fuzzy) in cases {
            let r1 = EntityRecord::company(n1, "1 Harbour Rd", "Rotterdam");
            let r2 = EntityRecord::company(n2, "1 Harbour Rd", "Rotterdam");
            let out = a.analyze(&r1, &r2, fuzzy);
            assert_eq!(
                (out.recommendation, out.confidence),
                (Recommendation::Flag, ConfidenceBand::Low),
                "{n1} / {n2}"
            );
        }
    }

    #[test]
    fn test_account_flags_with_lowest_score() {
        let r1 = EntityRecord::company("TEST Company 111111", "9 Side St", "Austin");
        let r2 = EntityRecord::company("Globex Inc", "1 Main St", "Austin");
        let out = analyzer().analyze(&r1, &r2, 0.8);
        assert_eq!(out.recommendation, Recommendation::Flag);
        assert_eq!(out.confidence, ConfidenceBand::Low);
        assert_eq!(out.confidence_score, 5.0);
        assert!(out.risk_factors.contains(&"test_data".to_string()));
    }

    #[test]
    fn unrelated_pair_rejected() {
        let r1 = EntityRecord::company("Globex", "1 Main St", "Austin");
        let r2 = EntityRecord::company("Initech", "77 Elm Ave", "Boston");
        let out = analyzer().analyze(&r1, &r2, 0.2);
        assert!(out.triggered_rules.is_empty());
        assert_eq!(out.recommendation, Recommendation::Reject);
    }

    #[test]
    fn different_tax_ids_force_review() {
        let r1 = EntityRecord::company("Acme", "1 Main St", "Austin").with("vat", "GB111");
        let r2 = EntityRecord::company("Acme", "1 Main St", "Austin").with("vat", "GB222");
        let out = analyzer().analyze(&r1, &r2, 1.0);
        assert_eq!(out.recommendation, Recommendation::Review);
        assert_eq!(out.confidence, ConfidenceBand::Low);
        assert_eq!(
            out.exemptions,
            vec!["Different tax registrations indicate separate legal entities".to_string()]
        );
    }

    #[test]
    fn analysis_is_repeatable() {
        let a = analyzer();
        let r1 = EntityRecord::company("Shell Energy Division", "1 Bay Rd", "Perth");
        let r2 = EntityRecord::company("Shell Energy", "3 Bay Rd", "Perth");
        assert_eq!(a.analyze(&r1, &r2, 0.77), a.analyze(&r1, &r2, 0.77));
    }
}
