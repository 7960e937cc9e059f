//! Budgeted interpretation of compiled rules.
//!
//! Every condition node and every action costs one step. Before each step the
//! interpreter checks the wall-clock deadline and the step budget, so a rule
//! that runs over is stopped, not merely abandoned.

use std::time::{Duration, Instant};

use mergewise_core::normalize::{normalize_text, similarity};
use mergewise_core::{
    Action, ConfidenceBand, EntityRecord, EvaluationContext, Recommendation, RuleResult, Target,
};
use thiserror::Error;

use crate::compiler::{CompiledRule, Node, Test};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExecutionError {
    #[error("rule {rule_id} timed out after {elapsed_ms} ms")]
    Timeout { rule_id: String, elapsed_ms: u64 },

    #[error("rule {rule_id} failed: {message}")]
    Failed { rule_id: String, message: String },
}

impl ExecutionError {
    pub fn rule_id(&self) -> &str {
        match self {
            Self::Timeout { rule_id, .. } | Self::Failed { rule_id, .. } => rule_id,
        }
    }
}

/// Deadline plus step allowance for one rule execution.
#[derive(Debug)]
pub struct Budget {
    started: Instant,
    deadline: Instant,
    max_steps: u64,
    steps: u64,
}

enum Exhausted {
    Deadline,
    Steps,
}

impl Budget {
    pub fn new(timeout: Duration, max_steps: u64) -> Self {
        let started = Instant::now();
        Self {
            started,
            deadline: started + timeout,
            max_steps,
            steps: 0,
        }
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    fn tick(&mut self) -> Result<(), Exhausted> {
        if Instant::now() >= self.deadline {
            return Err(Exhausted::Deadline);
        }
        self.steps += 1;
        if self.steps > self.max_steps {
            return Err(Exhausted::Steps);
        }
        Ok(())
    }
}

/// Fields a rule can fill in. Everything else about the verdict is fixed.
struct Draft {
    recommendation: Recommendation,
    score: f64,
    reasoning: Option<String>,
    justification: Option<String>,
    exemption: Option<String>,
    flags: Vec<String>,
}

impl CompiledRule {
    /// Run the rule against one pair.
    ///
    /// `Ok(None)` means the condition did not hold.
    pub fn execute(
        &self,
        r1: &EntityRecord,
        r2: &EntityRecord,
        ctx: &EvaluationContext,
        budget: &mut Budget,
    ) -> Result<Option<RuleResult>, ExecutionError> {
        let exhausted = |budget: &Budget, e: Exhausted| match e {
            Exhausted::Deadline => ExecutionError::Timeout {
                rule_id: self.id.clone(),
                elapsed_ms: budget.started.elapsed().as_millis() as u64,
            },
            Exhausted::Steps => ExecutionError::Failed {
                rule_id: self.id.clone(),
                message: format!("step budget of {} exhausted", budget.max_steps),
            },
        };

        let matched = match eval(&self.condition, r1, r2, ctx, budget) {
            Ok(m) => m,
            Err(e) => return Err(exhausted(budget, e)),
        };
        if !matched {
            return Ok(None);
        }

        let mut draft = Draft {
            recommendation: Recommendation::Review,
            score: 50.0,
            reasoning: None,
            justification: None,
            exemption: None,
            flags: Vec::new(),
        };
        for action in &self.actions {
            if let Err(e) = budget.tick() {
                return Err(exhausted(budget, e));
            }
            match action {
                Action::SetRecommendation { value } => draft.recommendation = *value,
                Action::SetConfidence { score } => draft.score = *score,
                Action::SetReasoning { text } => draft.reasoning = Some(text.clone()),
                Action::SetJustification { text } => draft.justification = Some(text.clone()),
                Action::SetExemption { text } => draft.exemption = Some(text.clone()),
                Action::AppendFlag { flag } => draft.flags.push(flag.clone()),
                Action::Fail { message } => {
                    return Err(ExecutionError::Failed {
                        rule_id: self.id.clone(),
                        message: message.clone(),
                    });
                }
            }
        }

        let reasoning = draft
            .reasoning
            .unwrap_or_else(|| format!("Rule '{}' matched", self.name));
        let mut result = RuleResult::new(
            self.category,
            self.name.clone(),
            ConfidenceBand::from_score(draft.score),
            draft.score,
            draft.recommendation,
            reasoning,
        )
        .with_justification(draft.justification.unwrap_or_default())
        .with_exemption(draft.exemption.unwrap_or_default());
        result.flags = draft.flags;
        Ok(Some(result))
    }
}

fn eval(
    node: &Node,
    r1: &EntityRecord,
    r2: &EntityRecord,
    ctx: &EvaluationContext,
    budget: &mut Budget,
) -> Result<bool, Exhausted> {
    budget.tick()?;
    match node {
        Node::Const(b) => Ok(*b),
        Node::All(children) => {
            for child in children {
                if !eval(child, r1, r2, ctx, budget)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Node::Any(children) => {
            for child in children {
                if eval(child, r1, r2, ctx, budget)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Node::Not(inner) => Ok(!eval(inner, r1, r2, ctx, budget)?),
        Node::Test(test) => Ok(check(test, r1, r2, ctx)),
    }
}

fn on_target(target: Target, a: bool, b: impl FnOnce() -> bool) -> bool {
    match target {
        Target::First => a,
        Target::Second => b(),
        Target::Either => a || b(),
        Target::Both => a && b(),
    }
}

fn contains_phrase(text: &str, phrase: &str) -> bool {
    !text.is_empty() && format!(" {text} ").contains(&format!(" {phrase} "))
}

fn check(test: &Test, r1: &EntityRecord, r2: &EntityRecord, ctx: &EvaluationContext) -> bool {
    let norm = |r: &EntityRecord, field: &str| r.field(field).map(normalize_text);
    match test {
        Test::FieldEquals {
            field,
            value,
            target,
        } => {
            let eq = |r: &EntityRecord| norm(r, field).as_deref() == Some(value.as_str());
            on_target(*target, eq(r1), || eq(r2))
        }
        Test::FieldsMatch { field } => match (norm(r1, field), norm(r2, field)) {
            (Some(a), Some(b)) => !a.is_empty() && a == b,
            _ => false,
        },
        Test::FieldSimilarity { field, min } => match (norm(r1, field), norm(r2, field)) {
            (Some(a), Some(b)) => similarity(&a, &b) >= *min,
            _ => false,
        },
        Test::FieldMissing { field, target } => {
            on_target(*target, r1.field(field).is_none(), || r2.field(field).is_none())
        }
        Test::Pattern {
            field,
            regex,
            target,
        } => {
            let hit = |r: &EntityRecord| r.field(field).is_some_and(|v| regex.is_match(v));
            on_target(*target, hit(r1), || hit(r2))
        }
        Test::Keywords {
            field,
            keywords,
            target,
        } => {
            let hit = |r: &EntityRecord| {
                norm(r, field).is_some_and(|v| keywords.iter().any(|k| contains_phrase(&v, k)))
            };
            on_target(*target, hit(r1), || hit(r2))
        }
        Test::ScoreAtLeast(min) => ctx.similarity_score >= *min,
        Test::ScoreBelow(max) => ctx.similarity_score < *max,
        Test::Environment(env) => ctx.environment.eq_ignore_ascii_case(env),
    }
}
