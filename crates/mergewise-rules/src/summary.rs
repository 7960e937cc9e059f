//! Batch reporting over many analysed pairs.
//!
//! Pairs are grouped by their first record (the master). Only `merge` and
//! `review` outcomes count as potential duplicates; rejected and flagged pairs
//! are tallied but never grouped.

use std::collections::BTreeMap;

use mergewise_core::normalize::block_key;
use mergewise_core::{ConfidenceBand, EntityRecord, Recommendation, SmartAnalysisResult};
use serde::{Deserialize, Serialize};

/// Group average at or above which a master group is high confidence.
pub const HIGH_GROUP_THRESHOLD: u32 = 98;
/// Group average at or above which a master group is medium confidence.
pub const MEDIUM_GROUP_THRESHOLD: u32 = 90;
/// A member below this score makes its whole group low confidence.
pub const LOW_MEMBER_THRESHOLD: f64 = 90.0;

/// One analysed pair, keyed by caller-chosen record ids.
#[derive(Debug, Clone)]
pub struct PairOutcome<'a> {
    pub master_id: &'a str,
    pub duplicate_id: &'a str,
    pub analysis: &'a SmartAnalysisResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateEntry {
    pub id: String,
    pub score: f64,
    pub recommendation: Recommendation,
    pub low_confidence: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasterGroup {
    pub master_id: String,
    pub duplicates: Vec<DuplicateEntry>,
    /// Mean member score, rounded.
    pub avg_score: u32,
    pub low_confidence_group: bool,
}

impl MasterGroup {
    pub fn duplicate_count(&self) -> usize {
        self.duplicates.len()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockStats {
    pub total_blocks: usize,
    pub max_block_size: usize,
    pub avg_block_size: f64,
    pub records_in_blocks: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total_pairs: usize,
    pub by_recommendation: BTreeMap<Recommendation, usize>,
    pub by_confidence: BTreeMap<ConfidenceBand, usize>,
    /// Sorted by average score, descending.
    pub groups: Vec<MasterGroup>,
    pub high_confidence_groups: usize,
    pub medium_confidence_groups: usize,
    pub low_confidence_groups: usize,
    pub total_potential_duplicates: usize,
}

impl BatchSummary {
    pub fn from_outcomes<'a>(outcomes: impl IntoIterator<Item = PairOutcome<'a>>) -> Self {
        let mut summary = Self::default();
        let mut groups: Vec<MasterGroup> = Vec::new();

        for outcome in outcomes {
            let analysis = outcome.analysis;
            summary.total_pairs += 1;
            *summary
                .by_recommendation
                .entry(analysis.recommendation)
                .or_insert(0) += 1;
            *summary.by_confidence.entry(analysis.confidence).or_insert(0) += 1;

            if !matches!(
                analysis.recommendation,
                Recommendation::Merge | Recommendation::Review
            ) {
                continue;
            }
            let entry = DuplicateEntry {
                id: outcome.duplicate_id.to_string(),
                score: analysis.confidence_score,
                recommendation: analysis.recommendation,
                low_confidence: analysis.confidence_score < LOW_MEMBER_THRESHOLD,
            };
            match groups.iter_mut().find(|g| g.master_id == outcome.master_id) {
                Some(group) => group.duplicates.push(entry),
                None => groups.push(MasterGroup {
                    master_id: outcome.master_id.to_string(),
                    duplicates: vec![entry],
                    avg_score: 0,
                    low_confidence_group: false,
                }),
            }
        }

        for group in &mut groups {
            let sum: f64 = group.duplicates.iter().map(|d| d.score).sum();
            group.avg_score = (sum / group.duplicates.len() as f64).round() as u32;
            group.low_confidence_group = group.duplicates.iter().any(|d| d.low_confidence);
        }
        groups.sort_by(|a, b| b.avg_score.cmp(&a.avg_score));

        summary.high_confidence_groups = groups
            .iter()
            .filter(|g| g.avg_score >= HIGH_GROUP_THRESHOLD)
            .count();
        summary.medium_confidence_groups = groups
            .iter()
            .filter(|g| (MEDIUM_GROUP_THRESHOLD..HIGH_GROUP_THRESHOLD).contains(&g.avg_score))
            .count();
        summary.low_confidence_groups = groups.iter().filter(|g| g.low_confidence_group).count();
        summary.total_potential_duplicates = groups.iter().map(MasterGroup::duplicate_count).sum();
        summary.groups = groups;
        summary
    }
}

/// Bucket records by [`block_key`]. Blocks keep input order.
pub fn build_blocks<'a>(
    records: impl IntoIterator<Item = (&'a str, &'a EntityRecord)>,
) -> BTreeMap<String, Vec<&'a str>> {
    let mut blocks: BTreeMap<String, Vec<&'a str>> = BTreeMap::new();
    for (id, record) in records {
        blocks
            .entry(block_key(record.name(), record.city()))
            .or_default()
            .push(id);
    }
    blocks
}

impl BlockStats {
    pub fn from_blocks(blocks: &BTreeMap<String, Vec<&str>>) -> Self {
        let records_in_blocks: usize = blocks.values().map(Vec::len).sum();
        Self {
            total_blocks: blocks.len(),
            max_block_size: blocks.values().map(Vec::len).max().unwrap_or(0),
            avg_block_size: if blocks.is_empty() {
                0.0
            } else {
                records_in_blocks as f64 / blocks.len() as f64
            },
            records_in_blocks,
        }
    }
}
