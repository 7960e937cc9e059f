//! Dynamic rule execution engine.
//!
//! Lifecycle: [`RuleEngine::new`] → [`initialize`](RuleEngine::initialize)
//! (load rules and statistics from the store) → [`evaluate`](RuleEngine::evaluate)
//! → [`shutdown`](RuleEngine::shutdown).
//!
//! Rules run one at a time, highest priority first, each on the blocking
//! pool so interpretation never occupies a runtime worker. A rule that times
//! out or fails is recorded as a failed execution and skipped. The first verdict that
//! is not `review` decides the pair.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use mergewise_core::{
    AppliedRule, BusinessRule, ConfidenceBand, DecisionMetadata, DecisionResult,
    DecisionStatistics, EngineSettings, EntityRecord, EvaluationContext, Recommendation,
    RuleResult, RuleStatistics, RuleType,
};
use mergewise_store::{RuleStore, StoreError};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::compiler::{CompileError, CompiledRule, compile};
use crate::exec::Budget;
use crate::stats::StatsRecorder;

pub const DEFAULT_REASONING: &str = "No business rules triggered definitive action";

/// Score (0..=1) returned when no rule is definitive.
pub const DEFAULT_SCORE: f64 = 0.5;

pub struct RuleEngine {
    store: Arc<dyn RuleStore>,
    settings: EngineSettings,
    registry: RwLock<BTreeMap<String, Arc<CompiledRule>>>,
    stats: StatsRecorder,
}

impl RuleEngine {
    /// Construct the engine and its statistics task. Must be called inside a
    /// Tokio runtime. The registry starts empty.
    pub fn new(store: Arc<dyn RuleStore>, settings: EngineSettings) -> Self {
        let stats = StatsRecorder::spawn(Arc::clone(&store));
        Self {
            store,
            settings,
            registry: RwLock::new(BTreeMap::new()),
            stats,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Load active rules and persisted statistics. Rules that no longer
    /// compile are logged and left out. Returns the number of rules loaded.
    pub async fn initialize(&self) -> Result<usize, StoreError> {
        self.stats.seed(self.store.load_statistics().await?);
        let rules = self.store.list_active_rules().await?;
        let mut registry = self.registry.write().await;
        registry.clear();
        for rule in &rules {
            match compile(rule) {
                Ok(compiled) => {
                    registry.insert(rule.id.clone(), Arc::new(compiled));
                }
                Err(e) => warn!(rule_id = %rule.id, error = %e, "stored rule does not compile"),
            }
        }
        info!(rules = registry.len(), "rule engine initialized");
        Ok(registry.len())
    }

    /// Compile and install a rule directly, without deployment checks.
    pub async fn register(&self, rule: &BusinessRule) -> Result<(), CompileError> {
        let compiled = compile(rule)?;
        self.install(compiled).await;
        Ok(())
    }

    pub(crate) async fn install(&self, compiled: CompiledRule) {
        debug!(rule_id = %compiled.id, version = compiled.version, "installing rule");
        self.registry
            .write()
            .await
            .insert(compiled.id.clone(), Arc::new(compiled));
    }

    pub(crate) async fn set_enabled(&self, rule_id: &str, enabled: bool) {
        let mut registry = self.registry.write().await;
        if let Some(rule) = registry.get(rule_id) {
            let mut updated = CompiledRule::clone(rule);
            updated.enabled = enabled;
            registry.insert(rule_id.to_string(), Arc::new(updated));
        }
    }

    /// Installed version of a rule, if any.
    pub async fn installed_version(&self, rule_id: &str) -> Option<u32> {
        self.registry.read().await.get(rule_id).map(|r| r.version)
    }

    /// Enabled rules, highest priority first; ties by id.
    pub async fn active_rules(&self) -> Vec<Arc<CompiledRule>> {
        let mut rules: Vec<Arc<CompiledRule>> = self
            .registry
            .read()
            .await
            .values()
            .filter(|r| r.enabled)
            .cloned()
            .collect();
        rules.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));
        rules
    }

    pub(crate) fn budget_for(&self, rule: &CompiledRule) -> Budget {
        let timeout = rule
            .timeout
            .unwrap_or(Duration::from_millis(self.settings.rule_timeout_ms));
        Budget::new(timeout, self.settings.max_steps)
    }

    /// Evaluate the active rules against one pair.
    ///
    /// Never fails: rule errors are logged and counted, and the worst case is
    /// the default low-confidence review.
    pub async fn evaluate(
        &self,
        r1: &EntityRecord,
        r2: &EntityRecord,
        ctx: &EvaluationContext,
    ) -> DecisionResult {
        let started = Instant::now();
        let mut confidence_scores = BTreeMap::new();
        let input = Arc::new((r1.clone(), r2.clone(), ctx.clone()));

        for rule in self.active_rules().await {
            let t0 = Instant::now();
            let mut budget = self.budget_for(&rule);
            let task = {
                let rule = Arc::clone(&rule);
                let input = Arc::clone(&input);
                tokio::task::spawn_blocking(move || {
                    let (r1, r2, ctx) = &*input;
                    rule.execute(r1, r2, ctx, &mut budget)
                })
            };
            let joined = task.await;
            let elapsed_ms = t0.elapsed().as_secs_f64() * 1000.0;
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(rule_id = %rule.id, error = %e, "rule task aborted; continuing");
                    self.stats.record(&rule.id, false, None, elapsed_ms);
                    continue;
                }
            };

            match outcome {
                Ok(Some(result)) => {
                    self.stats
                        .record(&rule.id, true, Some(result.recommendation), elapsed_ms);
                    confidence_scores.insert(rule.id.clone(), result.confidence_score / 100.0);
                    if result.recommendation != Recommendation::Review {
                        debug!(
                            rule_id = %rule.id,
                            version = rule.version,
                            recommendation = %result.recommendation,
                            "definitive verdict"
                        );
                        let applied = AppliedRule {
                            id: rule.id.clone(),
                            version: rule.version,
                        };
                        return decision(r1, r2, result, Some(applied), confidence_scores, started);
                    }
                }
                Ok(None) => self.stats.record(&rule.id, true, None, elapsed_ms),
                Err(e) => {
                    warn!(rule_id = %rule.id, error = %e, "rule execution failed; continuing");
                    self.stats.record(&rule.id, false, None, elapsed_ms);
                }
            }
        }

        let fallback = RuleResult::new(
            RuleType::Custom,
            "default",
            ConfidenceBand::Low,
            DEFAULT_SCORE * 100.0,
            Recommendation::Review,
            DEFAULT_REASONING,
        );
        decision(r1, r2, fallback, None, confidence_scores, started)
    }

    pub async fn statistics(&self, rule_id: &str) -> Option<RuleStatistics> {
        self.stats.get(rule_id).await
    }

    pub async fn all_statistics(&self) -> Vec<RuleStatistics> {
        self.stats.all().await
    }

    /// Wait for reported executions to be folded in and written.
    pub async fn flush_statistics(&self) {
        self.stats.flush().await;
    }

    /// Drain statistics and stop background work.
    pub async fn shutdown(&self) {
        self.stats.shutdown().await;
        info!("rule engine stopped");
    }
}

fn decision(
    r1: &EntityRecord,
    r2: &EntityRecord,
    result: RuleResult,
    applied_rule: Option<AppliedRule>,
    confidence_scores: BTreeMap<String, f64>,
    started: Instant,
) -> DecisionResult {
    let mut data_quality_issues = Vec::new();
    for (label, record) in [("record 1", r1), ("record 2", r2)] {
        for field in ["name", "address"] {
            if record.field(field).is_none() {
                data_quality_issues.push(format!("{label} is missing required field '{field}'"));
            }
        }
    }
    let (score, confidence) = if applied_rule.is_some() {
        (result.confidence_score / 100.0, result.confidence)
    } else {
        (DEFAULT_SCORE, ConfidenceBand::Low)
    };
    DecisionResult {
        recommendation: result.recommendation,
        confidence,
        score,
        statistics: DecisionStatistics {
            total_records: 2,
            duplicates_found: usize::from(result.recommendation == Recommendation::Merge),
            processing_time_ms: started.elapsed().as_secs_f64() * 1000.0,
        },
        data_quality_issues,
        confidence_scores,
        metadata: DecisionMetadata {
            result,
            applied_rule,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mergewise_core::{Action, Condition, Predicate, RuleDefinition, Target};
    use mergewise_store::MemoryStore;

    fn rule(id: &str, priority: u8, condition: Condition, actions: Vec<Action>) -> BusinessRule {
        BusinessRule::new(id, id, priority, RuleDefinition::new(condition, actions))
    }

    fn verdict(rec: Recommendation, score: f64) -> Vec<Action> {
        vec![
            Action::SetRecommendation { value: rec },
            Action::SetConfidence { score },
        ]
    }

    fn pair() -> (EntityRecord, EntityRecord) {
        (
            EntityRecord::company("Acme Holdings", "1 Main St", "Austin"),
            EntityRecord::company("Acme Holdings Inc", "1 Main Street", "Austin"),
        )
    }

    fn ctx() -> EvaluationContext {
        EvaluationContext::new(0.9, "production")
    }

    fn engine() -> RuleEngine {
        RuleEngine::new(Arc::new(MemoryStore::new()), EngineSettings::default())
    }

    #[tokio::test]
    async fn empty_registry_returns_default() {
        let engine = engine();
        let (r1, r2) = pair();
        let out = engine.evaluate(&r1, &r2, &ctx()).await;
        assert_eq!(out.recommendation, Recommendation::Review);
        assert_eq!(out.confidence, ConfidenceBand::Low);
        assert_eq!(out.score, DEFAULT_SCORE);
        assert_eq!(out.metadata.result.reasoning, DEFAULT_REASONING);
        assert!(!out.is_definitive());
        assert_eq!(out.statistics.total_records, 2);
        assert_eq!(out.statistics.duplicates_found, 0);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn other_tasks_progress_while_a_rule_runs() {
        let settings = EngineSettings {
            max_steps: 1_000_000,
            ..EngineSettings::default()
        };
        let engine = RuleEngine::new(Arc::new(MemoryStore::new()), settings);
        let heavy = Condition::All(vec![Condition::Always(true); 200_000]);
        engine
            .register(&rule("heavy", 5, heavy, verdict(Recommendation::Merge, 90.0)))
            .await
            .unwrap();

        let ticked = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let ticker = {
            let ticked = Arc::clone(&ticked);
            tokio::spawn(async move {
                ticked.store(true, std::sync::atomic::Ordering::SeqCst);
            })
        };

        let (r1, r2) = pair();
        let out = engine.evaluate(&r1, &r2, &ctx()).await;
        assert_eq!(out.recommendation, Recommendation::Merge);
        // The single runtime thread was free while the rule was interpreted.
        assert!(ticked.load(std::sync::atomic::Ordering::SeqCst));
        ticker.await.unwrap();
    }

    #[tokio::test]
    async fn failing_rule_is_isolated() {
        let engine = engine();
        engine
            .register(&rule(
                "boom",
                9,
                Condition::Always(true),
                vec![Action::Fail { message: "always throws".into() }],
            ))
            .await
            .unwrap();
        engine
            .register(&rule("merge", 5, Condition::Always(true), verdict(Recommendation::Merge, 88.0)))
            .await
            .unwrap();

        let (r1, r2) = pair();
        let out = engine.evaluate(&r1, &r2, &ctx()).await;
        assert_eq!(out.recommendation, Recommendation::Merge);
        assert_eq!(
            out.metadata.applied_rule,
            Some(AppliedRule { id: "merge".into(), version: 1 })
        );
        assert!((out.score - 0.88).abs() < 1e-9);
        assert_eq!(out.statistics.duplicates_found, 1);

        let boom = engine.statistics("boom").await.unwrap();
        assert_eq!((boom.executions, boom.successes, boom.failures), (1, 0, 1));
        let merge = engine.statistics("merge").await.unwrap();
        assert_eq!(merge.recommendations.get(&Recommendation::Merge), Some(&1));
    }

    #[tokio::test]
    async fn first_definitive_verdict_short_circuits() {
        let engine = engine();
        engine
            .register(&rule("review", 9, Condition::Always(true), verdict(Recommendation::Review, 40.0)))
            .await
            .unwrap();
        engine
            .register(&rule("reject", 7, Condition::Always(true), verdict(Recommendation::Reject, 75.0)))
            .await
            .unwrap();
        engine
            .register(&rule("merge", 3, Condition::Always(true), verdict(Recommendation::Merge, 95.0)))
            .await
            .unwrap();

        let (r1, r2) = pair();
        let out = engine.evaluate(&r1, &r2, &ctx()).await;
        assert_eq!(out.recommendation, Recommendation::Reject);
        assert_eq!(out.confidence_scores.len(), 2);
        assert!((out.confidence_scores["review"] - 0.4).abs() < 1e-9);
        assert!(engine.statistics("merge").await.is_none(), "never executed");
    }

    #[tokio::test]
    async fn non_matching_rule_counts_as_success() {
        let engine = engine();
        engine
            .register(&rule(
                "needs-vat",
                5,
                Condition::Leaf(Predicate::FieldsMatch { field: "vat".into() }),
                verdict(Recommendation::Merge, 99.0),
            ))
            .await
            .unwrap();
        let (r1, r2) = pair();
        let out = engine.evaluate(&r1, &r2, &ctx()).await;
        assert!(!out.is_definitive());
        let stats = engine.statistics("needs-vat").await.unwrap();
        assert_eq!((stats.executions, stats.successes), (1, 1));
        assert!(stats.recommendations.is_empty());
    }

    #[tokio::test]
    async fn zero_timeout_is_a_failed_execution() {
        let engine = engine();
        let mut slow = rule("slow", 9, Condition::Always(true), verdict(Recommendation::Reject, 80.0));
        slow.timeout_ms = Some(0);
        engine.register(&slow).await.unwrap();

        let (r1, r2) = pair();
        let out = engine.evaluate(&r1, &r2, &ctx()).await;
        assert!(!out.is_definitive());
        assert_eq!(engine.statistics("slow").await.unwrap().failures, 1);
    }

    #[tokio::test]
    async fn disabled_rules_do_not_run() {
        let engine = engine();
        engine
            .register(&rule("merge", 5, Condition::Always(true), verdict(Recommendation::Merge, 90.0)))
            .await
            .unwrap();
        engine.set_enabled("merge", false).await;
        let (r1, r2) = pair();
        assert!(!engine.evaluate(&r1, &r2, &ctx()).await.is_definitive());
        engine.set_enabled("merge", true).await;
        assert!(engine.evaluate(&r1, &r2, &ctx()).await.is_definitive());
    }

    #[tokio::test]
    async fn statistics_are_monotonic() {
        let engine = engine();
        engine
            .register(&rule(
                "flaky",
                5,
                Condition::Leaf(Predicate::FieldEquals {
                    field: "name".into(),
                    value: "boom".into(),
                    target: Target::First,
                }),
                vec![Action::Fail { message: "bad input".into() }],
            ))
            .await
            .unwrap();

        let ok = EntityRecord::company("Acme", "1 Main St", "Austin");
        let bad = EntityRecord::company("Boom", "1 Main St", "Austin");
        let n = 12;
        let mut failures = 0;
        for i in 0..n {
            let first = if i % 3 == 0 { &bad } else { &ok };
            if i % 3 == 0 {
                failures += 1;
            }
            engine.evaluate(first, &ok, &ctx()).await;
        }
        let stats = engine.statistics("flaky").await.unwrap();
        assert_eq!(stats.executions, n);
        assert_eq!(stats.successes + stats.failures, n);
        assert_eq!(stats.failures, failures);
    }

    #[tokio::test]
    async fn initialize_loads_store() {
        let store = Arc::new(MemoryStore::new());
        store
            .save_rule(&rule("stored", 5, Condition::Always(true), verdict(Recommendation::Reject, 70.0)))
            .await
            .unwrap();
        let mut seeded = RuleStatistics::new("stored");
        seeded.executions = 3;
        seeded.successes = 3;
        store.update_statistics(&seeded).await.unwrap();

        let engine = RuleEngine::new(store, EngineSettings::default());
        assert_eq!(engine.initialize().await.unwrap(), 1);
        let (r1, r2) = pair();
        let out = engine.evaluate(&r1, &r2, &ctx()).await;
        assert_eq!(out.recommendation, Recommendation::Reject);
        assert_eq!(engine.statistics("stored").await.unwrap().executions, 4);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn missing_fields_reported() {
        let engine = engine();
        let r1 = EntityRecord::new().with("name", "Acme");
        let r2 = EntityRecord::company("Acme", "1 Main St", "Austin");
        let out = engine.evaluate(&r1, &r2, &ctx()).await;
        assert_eq!(
            out.data_quality_issues,
            vec!["record 1 is missing required field 'address'".to_string()]
        );
    }
}
