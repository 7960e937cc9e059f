//! Core types, normalisation, and configuration shared by every Mergewise crate.

pub mod analysis;
pub mod config;
pub mod decision;
pub mod definition;
pub mod normalize;
pub mod record;
pub mod rule;
pub mod verdict;

pub use analysis::{
    AddressAnalysis, BusinessAnalysis, DataQualityAnalysis, NameAnalysis, SmartAnalysisResult,
};
pub use config::{CatalogConfig, ConfigError, ConfigFile, EngineSettings, RuleConfiguration, RulePatch};
pub use decision::{AppliedRule, DecisionMetadata, DecisionResult, DecisionStatistics, EvaluationContext};
pub use definition::{Action, Condition, Predicate, RuleDefinition, Target};
pub use normalize::NormalizedPair;
pub use record::EntityRecord;
pub use rule::{
    Approval, BusinessRule, DeploymentState, RuleDeploymentStatus, RuleState, RuleStatistics,
    RuleTestCase,
};
pub use verdict::{ConfidenceBand, Recommendation, RuleResult, RuleType};
