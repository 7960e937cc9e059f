//! Deployment and lifecycle management for dynamic rules.
//!
//! `deploy` validates, compiles, smoke-tests and runs the rule's own test
//! cases before anything is written. Persistence is part of a deploy: the
//! payload is stored, the deployment record written, and only then is the
//! store's current version moved. If any of those writes fails, the deploy
//! fails, the current version is unchanged and the engine is not touched.
//!
//! Exactly one previous version is retained per rule id. Rolling back
//! redeploys that version without retaining another, so a second rollback
//! without an intervening deploy fails.
//!
//! Operations on the same rule id are serialised within this process.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError};

use chrono::Utc;
use mergewise_core::{
    Approval, BusinessRule, DeploymentState, EntityRecord, EvaluationContext, RuleDeploymentStatus,
    RuleState,
};
use mergewise_store::{RuleStore, StoreError};
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, warn};

use crate::compiler::{CompileError, CompiledRule, compile};
use crate::engine::RuleEngine;
use crate::exec::ExecutionError;

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("compile failed: {0}")]
    Compile(#[from] CompileError),

    #[error("smoke test failed: {0}")]
    SmokeTest(ExecutionError),

    #[error("persistence failed: {0}")]
    Persistence(#[from] StoreError),

    #[error("rule not found: {0}")]
    NotFound(String),
}

#[derive(Debug, Error)]
pub enum RollbackError {
    #[error("rule {0} has no previous version to roll back to")]
    NoPreviousVersion(String),

    #[error("rule {0} is not deployed")]
    NotDeployed(String),

    #[error("cannot load rollback target: {0}")]
    Fetch(StoreError),

    #[error("redeploy of previous version failed: {0}")]
    Redeploy(DeployError),
}

/// Synthetic pair every rule must survive before deployment.
fn smoke_pair() -> (EntityRecord, EntityRecord) {
    (
        EntityRecord::company("Smoke Test Holdings", "1 Example Street", "Springfield")
            .with("phone", "+1 555 010 0000")
            .with("country", "US"),
        EntityRecord::company("Smoke Test Holdings Ltd", "1 Example St", "Springfield")
            .with("phone", "555-010-0000")
            .with("country", "US"),
    )
}

type LockMap = std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>;

/// Holds one rule id's lock. The map entry is dropped with the last holder.
struct RuleLock<'a> {
    locks: &'a LockMap,
    rule_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for RuleLock<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(&self.rule_id)
            .is_some_and(|l| Arc::strong_count(l) == 1)
        {
            locks.remove(&self.rule_id);
        }
    }
}

pub struct DeploymentManager {
    engine: Arc<RuleEngine>,
    store: Arc<dyn RuleStore>,
    locks: LockMap,
}

impl DeploymentManager {
    pub fn new(engine: Arc<RuleEngine>, store: Arc<dyn RuleStore>) -> Self {
        Self {
            engine,
            store,
            locks: LockMap::default(),
        }
    }

    pub fn engine(&self) -> &Arc<RuleEngine> {
        &self.engine
    }

    async fn lock(&self, rule_id: &str) -> RuleLock<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(rule_id.to_string()).or_default())
        };
        let guard = lock.lock_owned().await;
        RuleLock {
            locks: &self.locks,
            rule_id: rule_id.to_string(),
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Append a sign-off to a rule's approval chain.
    pub fn approve(
        &self,
        rule: &mut BusinessRule,
        approver: &str,
        comment: Option<&str>,
    ) -> Result<(), DeployError> {
        let approver = approver.trim();
        if approver.is_empty() {
            return Err(DeployError::Validation("approver is required".into()));
        }
        if rule.approvals.iter().any(|a| a.approver == approver) {
            return Err(DeployError::Validation(format!(
                "{approver} has already approved {}",
                rule.id
            )));
        }
        rule.approvals.push(Approval {
            approver: approver.to_string(),
            approved_at: Utc::now(),
            comment: comment.map(str::to_string),
        });
        info!(rule_id = %rule.id, approver, approvals = rule.approvals.len(), "rule approved");
        Ok(())
    }

    pub async fn deploy(
        &self,
        rule: BusinessRule,
        deployed_by: &str,
    ) -> Result<RuleDeploymentStatus, DeployError> {
        let _guard = self.lock(&rule.id).await;
        self.deploy_locked(rule, deployed_by, true).await
    }

    async fn deploy_locked(
        &self,
        mut rule: BusinessRule,
        deployed_by: &str,
        retain_previous: bool,
    ) -> Result<RuleDeploymentStatus, DeployError> {
        self.validate(&rule)?;
        let compiled = compile(&rule)?;
        rule.state = RuleState::Validated;
        self.smoke_test(&compiled)?;
        self.run_test_cases(&rule, &compiled)?;

        let current = self.store.deployment(&rule.id).await?;
        let previous_version = match (&current, retain_previous) {
            (Some(status), true) if status.version != rule.version => Some(status.version),
            (Some(status), true) => status.previous_version,
            _ => None,
        };

        rule.state = RuleState::Active;
        self.store.store_rule(&rule).await?;
        let status = RuleDeploymentStatus {
            rule_id: rule.id.clone(),
            version: rule.version,
            environment: self.engine.settings().environment.clone(),
            deployed_at: Utc::now(),
            deployed_by: deployed_by.to_string(),
            status: DeploymentState::Active,
            previous_version,
        };
        self.store.record_deployment(&status).await?;
        // Moving the current pointer commits the deploy.
        if let Err(e) = self.store.promote_rule(&rule.id, rule.version).await {
            if let Some(prior) = &current
                && let Err(restore) = self.store.record_deployment(prior).await
            {
                warn!(rule_id = %rule.id, error = %restore, "could not restore deployment record");
            }
            return Err(e.into());
        }
        self.engine.install(compiled).await;

        info!(
            rule_id = %rule.id,
            version = rule.version,
            previous_version = ?previous_version,
            deployed_by,
            "deployed rule"
        );
        Ok(status)
    }

    fn validate(&self, rule: &BusinessRule) -> Result<(), DeployError> {
        let missing = |what: &str| DeployError::Validation(format!("{what} is required"));
        if rule.id.trim().is_empty() {
            return Err(missing("id"));
        }
        if rule.name.trim().is_empty() {
            return Err(missing("name"));
        }
        if rule.version == 0 {
            return Err(DeployError::Validation("version must be at least 1".into()));
        }
        if rule.definition.actions.is_empty() {
            return Err(missing("at least one action"));
        }
        let required = self.engine.settings().required_approvals;
        if rule.approvals.len() < required {
            return Err(DeployError::Validation(format!(
                "{} of {required} required approvals",
                rule.approvals.len()
            )));
        }
        Ok(())
    }

    fn smoke_test(&self, compiled: &CompiledRule) -> Result<(), DeployError> {
        let (r1, r2) = smoke_pair();
        let ctx = EvaluationContext::new(0.8, &self.engine.settings().environment);
        compiled
            .execute(&r1, &r2, &ctx, &mut self.engine.budget_for(compiled))
            .map(|_| ())
            .map_err(DeployError::SmokeTest)
    }

    fn run_test_cases(&self, rule: &BusinessRule, compiled: &CompiledRule) -> Result<(), DeployError> {
        for case in &rule.test_cases {
            let ctx = EvaluationContext::new(case.similarity_score, &self.engine.settings().environment);
            let got = compiled
                .execute(&case.record1, &case.record2, &ctx, &mut self.engine.budget_for(compiled))
                .map_err(|e| {
                    DeployError::Validation(format!("test case '{}' errored: {e}", case.name))
                })?
                .map(|r| r.recommendation);
            if got != case.expected {
                return Err(DeployError::Validation(format!(
                    "test case '{}' expected {}, got {}",
                    case.name,
                    case.expected.map_or("no verdict", |r| r.as_str()),
                    got.map_or("no verdict", |r| r.as_str()),
                )));
            }
        }
        Ok(())
    }

    /// Restore the single retained previous version.
    pub async fn rollback(
        &self,
        rule_id: &str,
        requested_by: &str,
    ) -> Result<RuleDeploymentStatus, RollbackError> {
        let _guard = self.lock(rule_id).await;
        let status = self
            .store
            .deployment(rule_id)
            .await
            .map_err(RollbackError::Fetch)?
            .ok_or_else(|| RollbackError::NotDeployed(rule_id.to_string()))?;
        let previous = status
            .previous_version
            .ok_or_else(|| RollbackError::NoPreviousVersion(rule_id.to_string()))?;

        let rolling = RuleDeploymentStatus {
            status: DeploymentState::RollingBack,
            ..status.clone()
        };
        self.store
            .record_deployment(&rolling)
            .await
            .map_err(RollbackError::Fetch)?;
        info!(rule_id, from = status.version, to = previous, "rolling back");

        let result = match self.store.fetch_rule(rule_id, previous).await {
            Ok(payload) => self
                .deploy_locked(payload, requested_by, false)
                .await
                .map_err(RollbackError::Redeploy),
            Err(e) => Err(RollbackError::Fetch(e)),
        };

        if let Err(e) = &result {
            warn!(rule_id, error = %e, "rollback failed; restoring active status");
            if let Err(restore) = self.store.record_deployment(&status).await {
                warn!(rule_id, error = %restore, "could not restore deployment status");
            }
        }
        result
    }

    pub async fn enable(&self, rule_id: &str) -> Result<BusinessRule, DeployError> {
        self.set_enabled(rule_id, true).await
    }

    pub async fn disable(&self, rule_id: &str) -> Result<BusinessRule, DeployError> {
        self.set_enabled(rule_id, false).await
    }

    /// Flip the enabled flag of the current version and re-persist it.
    async fn set_enabled(&self, rule_id: &str, enabled: bool) -> Result<BusinessRule, DeployError> {
        let _guard = self.lock(rule_id).await;
        let mut rule = self
            .store
            .current_rule(rule_id)
            .await?
            .ok_or_else(|| DeployError::NotFound(rule_id.to_string()))?;
        rule.enabled = enabled;
        rule.state = if enabled {
            RuleState::Active
        } else {
            RuleState::Disabled
        };
        self.store.save_rule(&rule).await?;
        if enabled && self.engine.installed_version(rule_id).await.is_none() {
            self.engine.install(compile(&rule)?).await;
        } else {
            self.engine.set_enabled(rule_id, enabled).await;
        }
        info!(rule_id, version = rule.version, enabled, "rule enablement changed");
        Ok(rule)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mergewise_core::{
        Action, Condition, EngineSettings, Predicate, Recommendation, RuleDefinition,
        RuleTestCase, Target,
    };
    use mergewise_store::MemoryStore;

    fn definition(rec: Recommendation) -> RuleDefinition {
        RuleDefinition::new(
            Condition::Leaf(Predicate::ContainsKeyword {
                field: "name".into(),
                keywords: vec!["holdings".into()],
                target: Target::Either,
            }),
            vec![
                Action::SetRecommendation { value: rec },
                Action::SetConfidence { score: 80.0 },
            ],
        )
    }

    fn setup(settings: EngineSettings) -> (Arc<MemoryStore>, DeploymentManager) {
        let store = Arc::new(MemoryStore::new());
        let engine = Arc::new(RuleEngine::new(store.clone(), settings));
        let manager = DeploymentManager::new(engine, store.clone());
        (store, manager)
    }

    fn v1() -> BusinessRule {
        BusinessRule::new("holdings", "Holdings veto", 6, definition(Recommendation::Reject))
    }

    #[tokio::test]
    async fn deploy_persists_and_installs() {
        let (store, manager) = setup(EngineSettings::default());
        let status = manager.deploy(v1(), "alice").await.unwrap();
        assert_eq!(status.version, 1);
        assert_eq!(status.status, DeploymentState::Active);
        assert_eq!(status.previous_version, None);

        let stored = store.current_rule("holdings").await.unwrap().unwrap();
        assert_eq!(stored.state, RuleState::Active);
        assert_eq!(manager.engine().installed_version("holdings").await, Some(1));
    }

    #[tokio::test]
    async fn validation_failure_changes_nothing() {
        let (store, manager) = setup(EngineSettings::default());
        let mut bad = v1();
        bad.name = " ".into();
        assert!(matches!(
            manager.deploy(bad, "alice").await,
            Err(DeployError::Validation(_))
        ));
        let mut no_actions = v1();
        no_actions.definition.actions.clear();
        assert!(matches!(
            manager.deploy(no_actions, "alice").await,
            Err(DeployError::Validation(_))
        ));
        assert!(store.current_rule("holdings").await.unwrap().is_none());
        assert!(store.deployment("holdings").await.unwrap().is_none());
        assert!(manager.engine().installed_version("holdings").await.is_none());
    }

    #[tokio::test]
    async fn smoke_test_rejects_throwing_rule() {
        let (_, manager) = setup(EngineSettings::default());
        let rule = BusinessRule::new(
            "boom",
            "Boom",
            5,
            RuleDefinition::new(
                Condition::Always(true),
                vec![Action::Fail { message: "nope".into() }],
            ),
        );
        assert!(matches!(
            manager.deploy(rule, "alice").await,
            Err(DeployError::SmokeTest(_))
        ));
    }

    #[tokio::test]
    async fn test_cases_must_pass() {
        let (_, manager) = setup(EngineSettings::default());
        let mut rule = v1();
        rule.test_cases.push(RuleTestCase {
            name: "holding company".into(),
            record1: EntityRecord::company("Acme Holdings", "1 Main St", "Austin"),
            record2: EntityRecord::company("Acme", "1 Main St", "Austin"),
            similarity_score: 0.8,
            expected: Some(Recommendation::Reject),
        });
        rule.test_cases.push(RuleTestCase {
            name: "plain company".into(),
            record1: EntityRecord::company("Acme", "1 Main St", "Austin"),
            record2: EntityRecord::company("Acme Inc", "1 Main St", "Austin"),
            similarity_score: 0.8,
            expected: None,
        });
        manager.deploy(rule.clone(), "alice").await.unwrap();

        rule.test_cases[1].expected = Some(Recommendation::Merge);
        let err = manager.deploy(rule.revised(rule.definition.clone()), "alice").await;
        assert!(matches!(err, Err(DeployError::Validation(m)) if m.contains("plain company")));
    }

    #[tokio::test]
    async fn approvals_are_enforced() {
        let settings = EngineSettings {
            required_approvals: 2,
            ..EngineSettings::default()
        };
        let (_, manager) = setup(settings);
        let mut rule = v1();
        manager.approve(&mut rule, "lead", Some("looks right")).unwrap();
        assert!(matches!(
            manager.approve(&mut rule, "lead", None),
            Err(DeployError::Validation(_))
        ));
        assert!(matches!(
            manager.deploy(rule.clone(), "alice").await,
            Err(DeployError::Validation(_))
        ));
        manager.approve(&mut rule, "compliance", None).unwrap();
        manager.deploy(rule, "alice").await.unwrap();
    }

    #[tokio::test]
    async fn persistence_failure_fails_deploy() {
        let (store, manager) = setup(EngineSettings::default());
        store.set_fail_writes(true);
        assert!(matches!(
            manager.deploy(v1(), "alice").await,
            Err(DeployError::Persistence(_))
        ));
        assert!(manager.engine().installed_version("holdings").await.is_none());
    }

    #[tokio::test]
    async fn failed_deployment_record_keeps_previous_version_current() {
        let (store, manager) = setup(EngineSettings::default());
        manager.deploy(v1(), "alice").await.unwrap();

        store.set_fail_deployments(true);
        assert!(matches!(
            manager
                .deploy(v1().revised(definition(Recommendation::Flag)), "bob")
                .await,
            Err(DeployError::Persistence(_))
        ));
        assert_eq!(store.current_rule("holdings").await.unwrap().unwrap().version, 1);
        assert_eq!(store.deployment("holdings").await.unwrap().unwrap().version, 1);
        assert_eq!(manager.engine().installed_version("holdings").await, Some(1));

        // A restarted engine loads what the store says is current.
        let restarted = RuleEngine::new(store.clone(), EngineSettings::default());
        assert_eq!(restarted.initialize().await.unwrap(), 1);
        assert_eq!(restarted.installed_version("holdings").await, Some(1));
    }

    #[tokio::test]
    async fn failed_rollback_write_keeps_current_version() {
        let (store, manager) = setup(EngineSettings::default());
        manager.deploy(v1(), "alice").await.unwrap();
        manager
            .deploy(v1().revised(definition(Recommendation::Flag)), "bob")
            .await
            .unwrap();

        store.set_fail_deployments(true);
        assert!(manager.rollback("holdings", "carol").await.is_err());
        store.set_fail_deployments(false);

        assert_eq!(store.current_rule("holdings").await.unwrap().unwrap().version, 2);
        let status = store.deployment("holdings").await.unwrap().unwrap();
        assert_eq!((status.version, status.status), (2, DeploymentState::Active));
        assert_eq!(manager.engine().installed_version("holdings").await, Some(2));
    }

    #[tokio::test]
    async fn rule_locks_are_released_after_use() {
        let (_, manager) = setup(EngineSettings::default());
        manager.deploy(v1(), "alice").await.unwrap();
        manager
            .deploy(v1().revised(definition(Recommendation::Flag)), "bob")
            .await
            .unwrap();
        manager.rollback("holdings", "carol").await.unwrap();
        manager.disable("holdings").await.unwrap();
        let _ = manager.rollback("ghost", "carol").await;
        let _ = manager.enable("ghost").await;
        assert_eq!(manager.tracked_locks(), 0);

        let (a, b) = tokio::join!(
            manager.deploy(BusinessRule::new("a", "A", 5, definition(Recommendation::Reject)), "alice"),
            manager.deploy(BusinessRule::new("b", "B", 5, definition(Recommendation::Reject)), "alice"),
        );
        a.unwrap();
        b.unwrap();
        assert_eq!(manager.tracked_locks(), 0);
    }

    #[tokio::test]
    async fn rollback_restores_previous_payload_once() {
        let (store, manager) = setup(EngineSettings::default());
        let first = v1();
        manager.deploy(first.clone(), "alice").await.unwrap();
        let expected_v1 = store.fetch_rule("holdings", 1).await.unwrap();

        let second = first.revised(definition(Recommendation::Flag));
        let status = manager.deploy(second, "bob").await.unwrap();
        assert_eq!((status.version, status.previous_version), (2, Some(1)));

        let status = manager.rollback("holdings", "carol").await.unwrap();
        assert_eq!(status.version, 1);
        assert_eq!(status.previous_version, None);
        assert_eq!(status.status, DeploymentState::Active);
        assert_eq!(store.current_rule("holdings").await.unwrap().unwrap(), expected_v1);
        assert_eq!(manager.engine().installed_version("holdings").await, Some(1));

        assert!(matches!(
            manager.rollback("holdings", "carol").await,
            Err(RollbackError::NoPreviousVersion(_))
        ));
    }

    #[tokio::test]
    async fn rollback_of_unknown_rule() {
        let (_, manager) = setup(EngineSettings::default());
        assert!(matches!(
            manager.rollback("ghost", "carol").await,
            Err(RollbackError::NotDeployed(_))
        ));
    }

    #[tokio::test]
    async fn failed_rollback_restores_active_status() {
        let (store, manager) = setup(EngineSettings::default());
        manager.deploy(v1(), "alice").await.unwrap();
        manager
            .deploy(v1().revised(definition(Recommendation::Flag)), "bob")
            .await
            .unwrap();

        // Point the retained version at a payload that was never stored.
        let mut status = store.deployment("holdings").await.unwrap().unwrap();
        status.previous_version = Some(7);
        store.record_deployment(&status).await.unwrap();

        assert!(matches!(
            manager.rollback("holdings", "carol").await,
            Err(RollbackError::Fetch(_))
        ));
        let after = store.deployment("holdings").await.unwrap().unwrap();
        assert_eq!(after.status, DeploymentState::Active);
        assert_eq!(after.version, 2);
    }

    #[tokio::test]
    async fn enable_disable_keep_version() {
        let (store, manager) = setup(EngineSettings::default());
        manager.deploy(v1(), "alice").await.unwrap();

        let disabled = manager.disable("holdings").await.unwrap();
        assert!(!disabled.enabled);
        assert_eq!(disabled.version, 1);
        assert_eq!(disabled.state, RuleState::Disabled);
        assert!(manager.engine().active_rules().await.is_empty());
        assert!(store.list_active_rules().await.unwrap().is_empty());

        let enabled = manager.enable("holdings").await.unwrap();
        assert_eq!(enabled.version, 1);
        assert_eq!(manager.engine().active_rules().await.len(), 1);

        assert!(matches!(
            manager.enable("ghost").await,
            Err(DeployError::NotFound(_))
        ));
    }
}
