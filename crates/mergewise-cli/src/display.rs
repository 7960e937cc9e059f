//! Terminal rendering for analyses, decisions, summaries, and rule state.
//!
//! Cards are grouped into titled sections with a fixed label column, the same
//! layout for every entity the CLI prints.

use mergewise_core::{
    BusinessRule, CatalogConfig, DecisionResult, RuleDeploymentStatus, RuleResult, RuleStatistics,
    SmartAnalysisResult,
};
use mergewise_rules::{BatchSummary, BlockStats};
use mergewise_sync::ReviewScore;

use crate::batch::{BatchStats, PairInput};

const MAX_LIST_ITEMS: usize = 10;
const MAX_TEXT: usize = 72;

// ── Analyses ──

/// Print one heuristic analysis as a card.
pub fn print_analysis_card(pair: &PairInput, a: &SmartAnalysisResult, review: Option<&ReviewScore>) {
    println!("=== {} ↔ {} ===", pair.id1, pair.id2);
    println!(
        "{} ({}, {:.1})",
        a.recommendation.as_str().to_uppercase(),
        a.confidence.as_str(),
        a.confidence_score
    );
    println!();

    println!("Input");
    field("fuzzy_score", format!("{:.2}", pair.fuzzy_score));
    field("name", pair_of(pair.record1.name(), pair.record2.name()));
    field("address", pair_of(pair.record1.address(), pair.record2.address()));
    field("city", pair_of(pair.record1.city(), pair.record2.city()));

    println!("Name");
    field("similarity", format!("{:.2}", a.name_analysis.similarity));
    flag("exact_match", a.name_analysis.exact_match);
    flag("suffix_variation", a.name_analysis.suffix_variation);

    println!("Address");
    field("similarity", format!("{:.2}", a.address_analysis.similarity));
    flag("exact_match", a.address_analysis.exact_match);
    flag("same_city", a.address_analysis.same_city);
    flag("po_box", a.address_analysis.po_box);

    if !a.business_analysis.relationship_signals.is_empty()
        || a.business_analysis.industry_match.is_some()
    {
        println!("Business");
        if let Some(m) = a.business_analysis.industry_match {
            flag("industry_match", m);
        }
        list("relationship_signals", &a.business_analysis.relationship_signals);
    }

    println!("Data Quality");
    field(
        "completeness",
        format!("{:.0}%", a.data_quality.completeness * 100.0),
    );
    list("issues", &a.data_quality.issues);

    if !a.triggered_rules.is_empty() {
        println!("Triggered Rules ({})", a.triggered_rules.len());
        print_rule_results(&a.triggered_rules);
    }
    list("risk_factors", &a.risk_factors);
    list("exemptions", &a.exemptions);

    if let Some(r) = review {
        println!("External Review");
        field("score", format!("{:.1}", r.score));
        if let Some(p) = &r.provider {
            field("provider", p);
        }
        if let Some(reason) = &r.reasoning {
            field("reasoning", truncate(reason, MAX_TEXT));
        }
    }
    println!();
}

fn print_rule_results(results: &[RuleResult]) {
    let show = results.len().min(MAX_LIST_ITEMS);
    for r in &results[..show] {
        println!(
            "    {:<30} {:<7} {:>5.1}  {}",
            r.rule_name,
            r.recommendation.as_str(),
            r.confidence_score,
            r.confidence.as_str()
        );
        println!("      {}", truncate(&r.reasoning, MAX_TEXT));
        if let Some(e) = &r.exemption_reason {
            println!("      exemption: {}", truncate(e, MAX_TEXT));
        }
        if !r.flags.is_empty() {
            println!("      flags: {}", r.flags.join(", "));
        }
    }
    if results.len() > MAX_LIST_ITEMS {
        println!("    ... and {} more", results.len() - MAX_LIST_ITEMS);
    }
}

// ── Dynamic rule decisions ──

pub fn print_decision_card(pair: &PairInput, d: &DecisionResult) {
    println!("=== {} ↔ {} ===", pair.id1, pair.id2);
    println!(
        "{} ({}, {:.2})",
        d.recommendation.as_str().to_uppercase(),
        d.confidence.as_str(),
        d.score
    );
    match &d.metadata.applied_rule {
        Some(rule) => field("applied_rule", format!("{} v{}", rule.id, rule.version)),
        None => field("applied_rule", "none (default)"),
    }
    field("reasoning", truncate(&d.metadata.result.reasoning, MAX_TEXT));
    field(
        "processing_time",
        format!("{:.2} ms", d.statistics.processing_time_ms),
    );
    if !d.confidence_scores.is_empty() {
        println!("  rule scores:");
        for (id, score) in &d.confidence_scores {
            println!("    {:<30} {:.2}", id, score);
        }
    }
    list("data_quality_issues", &d.data_quality_issues);
    println!();
}

// ── Batch summary ──

pub fn print_summary(summary: &BatchSummary, blocks: &BlockStats, stats: &BatchStats) {
    println!("=== Summary ===");
    field(
        "pairs",
        format!("{} in {:.3}s", stats.pairs, stats.elapsed_secs),
    );
    for (rec, n) in &summary.by_recommendation {
        field(rec.as_str(), n);
    }
    for (band, n) in &summary.by_confidence {
        field(&format!("{} confidence", band.as_str()), n);
    }
    println!();

    println!("Blocks");
    field("total_blocks", blocks.total_blocks);
    field("max_block_size", blocks.max_block_size);
    field("avg_block_size", format!("{:.2}", blocks.avg_block_size));
    field("records_in_blocks", blocks.records_in_blocks);
    println!();

    println!("Master Groups ({})", summary.groups.len());
    field("high_confidence", summary.high_confidence_groups);
    field("medium_confidence", summary.medium_confidence_groups);
    field("low_confidence", summary.low_confidence_groups);
    field("potential_duplicates", summary.total_potential_duplicates);
    let show = summary.groups.len().min(MAX_LIST_ITEMS);
    for g in &summary.groups[..show] {
        let marker = if g.low_confidence_group { "  (low)" } else { "" };
        println!(
            "    {:<20} {:>3} avg  {} duplicate(s){}",
            g.master_id,
            g.avg_score,
            g.duplicate_count(),
            marker
        );
        for d in &g.duplicates {
            println!(
                "      {:<18} {:>5.1}  {}",
                d.id,
                d.score,
                d.recommendation.as_str()
            );
        }
    }
    if summary.groups.len() > MAX_LIST_ITEMS {
        println!("    ... and {} more", summary.groups.len() - MAX_LIST_ITEMS);
    }
}

// ── Rule state ──

pub fn print_catalog(config: &CatalogConfig) {
    println!("{:<28} {:>8} {:>8} {:>6}", "rule", "enabled", "priority", "adj");
    for key in config.keys() {
        if let Some(rule) = config.get(key) {
            println!(
                "{:<28} {:>8} {:>8} {:>+6}",
                key,
                if rule.enabled { "yes" } else { "no" },
                rule.priority,
                rule.confidence_adjustment
            );
        }
    }
}

pub fn print_rules(rules: &[BusinessRule]) {
    if rules.is_empty() {
        println!("No active dynamic rules.");
        return;
    }
    println!(
        "{:<24} {:>7} {:>8} {:<10} name",
        "id", "version", "priority", "state"
    );
    for r in rules {
        println!(
            "{:<24} {:>7} {:>8} {:<10} {}",
            r.id,
            r.version,
            r.priority,
            format!("{:?}", r.state).to_lowercase(),
            r.name
        );
    }
}

pub fn print_deployment(status: &RuleDeploymentStatus) {
    println!("=== {} ===", status.rule_id);
    field("version", status.version);
    field(
        "previous_version",
        status
            .previous_version
            .map_or_else(|| "-".to_string(), |v| v.to_string()),
    );
    field("environment", &status.environment);
    field("status", format!("{:?}", status.status).to_lowercase());
    field("deployed_by", &status.deployed_by);
    field("deployed_at", status.deployed_at.to_rfc3339());
}

pub fn print_statistics(stats: &[RuleStatistics]) {
    if stats.is_empty() {
        println!("No executions recorded.");
        return;
    }
    println!(
        "{:<24} {:>10} {:>9} {:>9} {:>10}  last executed",
        "rule", "executions", "successes", "failures", "avg ms"
    );
    for s in stats {
        println!(
            "{:<24} {:>10} {:>9} {:>9} {:>10.3}  {}",
            s.rule_id,
            s.executions,
            s.successes,
            s.failures,
            s.avg_execution_ms,
            s.last_executed
                .map_or_else(|| "-".to_string(), |t| t.to_rfc3339())
        );
        let counts: Vec<String> = s
            .recommendations
            .iter()
            .map(|(rec, n)| format!("{}={n}", rec.as_str()))
            .collect();
        if !counts.is_empty() {
            println!("    {}", counts.join("  "));
        }
    }
}

// ── Helpers ──

fn field(label: &str, value: impl std::fmt::Display) {
    println!("  {:<26} {}", label, value);
}

fn flag(label: &str, value: bool) {
    if value {
        field(label, "yes");
    }
}

fn list(label: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    let show = items.len().min(MAX_LIST_ITEMS);
    println!("  {label}:");
    for item in &items[..show] {
        println!("    - {}", truncate(item, MAX_TEXT));
    }
    if items.len() > MAX_LIST_ITEMS {
        println!("    ... and {} more", items.len() - MAX_LIST_ITEMS);
    }
}

fn pair_of(a: Option<&str>, b: Option<&str>) -> String {
    format!("{}  |  {}", a.unwrap_or("-"), b.unwrap_or("-"))
}

/// Shorten to at most `max` characters, ending in `...` when cut.
fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{kept}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("Société Générale Holdings", 10), "Société...");
        assert_eq!(truncate("abcdef", 3), "...");
    }

    #[test]
    fn pair_of_fills_missing_sides() {
        assert_eq!(pair_of(Some("Acme"), None), "Acme  |  -");
    }
}
