//! Batch pipeline: read candidate pairs, analyse or evaluate them, summarise.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;

use anyhow::Context;
use futures::stream::{self, StreamExt};
use mergewise_core::{DecisionResult, EntityRecord, EvaluationContext, SmartAnalysisResult};
use mergewise_host::RuleEngine;
use mergewise_rules::{BatchSummary, BlockStats, PairOutcome, SmartAnalyzer, build_blocks};
use mergewise_sync::{ReviewClient, ReviewScore, SyncError};
use serde::{Deserialize, Serialize};

/// One candidate pair as produced by the upstream fuzzy matcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairInput {
    pub id1: String,
    pub id2: String,
    /// Baseline similarity, 0..=1.
    pub fuzzy_score: f64,
    pub record1: EntityRecord,
    pub record2: EntityRecord,
}

pub struct BatchStats {
    pub pairs: usize,
    pub elapsed_secs: f64,
}

pub fn load_pairs(path: &Path) -> anyhow::Result<Vec<PairInput>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading pairs from {}", path.display()))?;
    let pairs: Vec<PairInput> = serde_json::from_str(&text)
        .with_context(|| format!("parsing pairs in {}", path.display()))?;
    for (i, pair) in pairs.iter().enumerate() {
        anyhow::ensure!(
            (0.0..=1.0).contains(&pair.fuzzy_score),
            "pair {i} ({} / {}): fuzzy_score {} is outside 0..=1",
            pair.id1,
            pair.id2,
            pair.fuzzy_score
        );
    }
    Ok(pairs)
}

/// Run the heuristic analyser over every pair, in input order.
pub fn analyze_all(
    analyzer: &SmartAnalyzer,
    pairs: &[PairInput],
) -> (Vec<SmartAnalysisResult>, BatchStats) {
    let start = Instant::now();
    let analyses = pairs
        .iter()
        .map(|p| analyzer.analyze(&p.record1, &p.record2, p.fuzzy_score))
        .collect();
    let stats = BatchStats {
        pairs: pairs.len(),
        elapsed_secs: start.elapsed().as_secs_f64(),
    };
    (analyses, stats)
}

/// Group outcomes by master record and bucket the distinct records.
pub fn summarize(pairs: &[PairInput], analyses: &[SmartAnalysisResult]) -> (BatchSummary, BlockStats) {
    let summary = BatchSummary::from_outcomes(pairs.iter().zip(analyses).map(|(p, a)| PairOutcome {
        master_id: &p.id1,
        duplicate_id: &p.id2,
        analysis: a,
    }));

    let mut records: BTreeMap<&str, &EntityRecord> = BTreeMap::new();
    for pair in pairs {
        records.entry(pair.id1.as_str()).or_insert(&pair.record1);
        records.entry(pair.id2.as_str()).or_insert(&pair.record2);
    }
    let blocks = build_blocks(records.into_iter());
    (summary, BlockStats::from_blocks(&blocks))
}

/// Escalate review-band pairs, at most `concurrency` requests in flight.
///
/// Results are returned in input order; decided pairs map to `Ok(None)`.
pub async fn escalate_all(
    client: &ReviewClient,
    pairs: &[PairInput],
    analyses: &[SmartAnalysisResult],
    concurrency: usize,
) -> Vec<Result<Option<ReviewScore>, SyncError>> {
    let mut results: Vec<(usize, Result<Option<ReviewScore>, SyncError>)> =
        stream::iter(pairs.iter().zip(analyses).enumerate())
            .map(|(i, (pair, analysis))| async move {
                (
                    i,
                    client
                        .escalate(&pair.record1, &pair.record2, analysis)
                        .await,
                )
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;
    results.sort_by_key(|(i, _)| *i);
    results.into_iter().map(|(_, r)| r).collect()
}

/// Evaluate every pair against the deployed dynamic rules.
pub async fn evaluate_all(
    engine: &RuleEngine,
    pairs: &[PairInput],
    environment: &str,
) -> Vec<DecisionResult> {
    let evaluations = pairs.iter().map(|pair| async move {
        let ctx = EvaluationContext::new(pair.fuzzy_score, environment);
        engine.evaluate(&pair.record1, &pair.record2, &ctx).await
    });
    futures::future::join_all(evaluations).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use mergewise_core::Recommendation;
    use std::io::Write;

    const PAIRS: &str = r#"[
        {
            "id1": "C-100", "id2": "C-101", "fuzzy_score": 0.86,
            "record1": {"name": "Acme Corp", "address": "10 Main Street", "city": "Austin"},
            "record2": {"name": "Acme Corporation", "address": "10 Main St", "city": "Austin"}
        },
        {
            "id1": "C-100", "id2": "C-205", "fuzzy_score": 0.70,
            "record1": {"name": "Acme Corp", "address": "10 Main Street", "city": "Austin"},
            "record2": {"name": "Acme Freight Holdings", "address": "PO Box 77", "city": "Austin"}
        }
    ]"#;

    fn write_pairs(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_pairs_file() {
        let file = write_pairs(PAIRS);
        let pairs = load_pairs(file.path()).unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[1].id2, "C-205");
        assert_eq!(pairs[0].record2.address(), Some("10 Main St"));
    }

    #[test]
    fn rejects_out_of_range_fuzzy_score() {
        let file = write_pairs(
            r#"[{"id1": "a", "id2": "b", "fuzzy_score": 86,
                 "record1": {"name": "A"}, "record2": {"name": "B"}}]"#,
        );
        let err = load_pairs(file.path()).unwrap_err();
        assert!(err.to_string().contains("fuzzy_score"));
    }

    #[test]
    fn summary_counts_every_pair_and_distinct_record() {
        let file = write_pairs(PAIRS);
        let pairs = load_pairs(file.path()).unwrap();
        let analyzer = SmartAnalyzer::with_defaults().unwrap();
        let (analyses, stats) = analyze_all(&analyzer, &pairs);
        assert_eq!(stats.pairs, 2);

        let (summary, blocks) = summarize(&pairs, &analyses);
        assert_eq!(summary.total_pairs, 2);
        assert_eq!(summary.by_recommendation.values().sum::<usize>(), 2);
        assert_eq!(blocks.records_in_blocks, 3);
    }

    #[tokio::test]
    async fn decided_pairs_skip_escalation() {
        let file = write_pairs(PAIRS);
        let pairs = load_pairs(file.path()).unwrap();
        let analyzer = SmartAnalyzer::with_defaults().unwrap();
        let (mut analyses, _) = analyze_all(&analyzer, &pairs);
        analyses[0].recommendation = Recommendation::Merge;
        analyses[1].recommendation = Recommendation::Reject;

        // Nothing listens here; a sent request would come back as an error.
        let client = ReviewClient::new("http://127.0.0.1:9".into());
        let results = escalate_all(&client, &pairs, &analyses, 4).await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| matches!(r, Ok(None))));
    }
}
