//! Dynamic rule runtime: compile declarative rules, run them under a step and
//! time budget, keep per-rule statistics, and manage deployment and rollback.

pub mod compiler;
pub mod deploy;
pub mod engine;
pub mod exec;
pub mod stats;

pub use compiler::{CompileError, CompiledRule, MAX_CONDITION_DEPTH, compile};
pub use deploy::{DeployError, DeploymentManager, RollbackError};
pub use engine::RuleEngine;
pub use exec::{Budget, ExecutionError};
pub use stats::StatsRecorder;
