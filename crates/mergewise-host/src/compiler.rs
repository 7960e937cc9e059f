//! Rule definition compiler.
//!
//! Turns the declarative [`RuleDefinition`] of a [`BusinessRule`] into a
//! [`CompiledRule`]: regexes built, keywords normalised, ranges checked.
//! The result is a closed tree of tests and output actions. Nothing in it can
//! reach the registry, other rules, or the engine.

use std::time::Duration;

use mergewise_core::normalize::normalize_text;
use mergewise_core::{
    Action, BusinessRule, Condition, Predicate, RuleDefinition, RuleType, Target,
};
use regex::{Regex, RegexBuilder};
use thiserror::Error;

/// Deepest condition nesting accepted.
pub const MAX_CONDITION_DEPTH: usize = 32;

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("condition references an empty field name")]
    EmptyField,

    #[error("invalid pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        source: regex::Error,
    },

    #[error("{what} out of range: {value}")]
    OutOfRange { what: &'static str, value: f64 },

    #[error("keyword list for field {0:?} is empty")]
    NoKeywords(String),

    #[error("rule has no actions")]
    NoActions,

    #[error("condition nesting deeper than {MAX_CONDITION_DEPTH}")]
    TooDeep,
}

/// A compiled condition node.
#[derive(Debug, Clone)]
pub(crate) enum Node {
    Const(bool),
    All(Vec<Node>),
    Any(Vec<Node>),
    Not(Box<Node>),
    Test(Test),
}

#[derive(Debug, Clone)]
pub(crate) enum Test {
    FieldEquals {
        field: String,
        value: String,
        target: Target,
    },
    FieldsMatch {
        field: String,
    },
    FieldSimilarity {
        field: String,
        min: f64,
    },
    FieldMissing {
        field: String,
        target: Target,
    },
    Pattern {
        field: String,
        regex: Regex,
        target: Target,
    },
    Keywords {
        field: String,
        keywords: Vec<String>,
        target: Target,
    },
    ScoreAtLeast(f64),
    ScoreBelow(f64),
    Environment(String),
}

/// Executable form of one rule version.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub id: String,
    pub version: u32,
    pub name: String,
    pub category: RuleType,
    pub priority: u8,
    pub enabled: bool,
    /// Overrides the engine-wide budget.
    pub timeout: Option<Duration>,
    pub(crate) condition: Node,
    pub(crate) actions: Vec<Action>,
}

/// Compile a rule. Lifecycle fields (id, name, version) are not checked here.
pub fn compile(rule: &BusinessRule) -> Result<CompiledRule, CompileError> {
    let (condition, actions) = compile_definition(&rule.definition)?;
    Ok(CompiledRule {
        id: rule.id.clone(),
        version: rule.version,
        name: rule.name.clone(),
        category: rule.category,
        priority: rule.priority,
        enabled: rule.enabled,
        timeout: rule.timeout_ms.map(Duration::from_millis),
        condition,
        actions,
    })
}

pub(crate) fn compile_definition(
    definition: &RuleDefinition,
) -> Result<(Node, Vec<Action>), CompileError> {
    if definition.actions.is_empty() {
        return Err(CompileError::NoActions);
    }
    for action in &definition.actions {
        if let Action::SetConfidence { score } = action
            && !(0.0..=100.0).contains(score)
        {
            return Err(CompileError::OutOfRange {
                what: "confidence score",
                value: *score,
            });
        }
    }
    let condition = compile_condition(&definition.condition, 0)?;
    Ok((condition, definition.actions.clone()))
}

fn compile_condition(condition: &Condition, depth: usize) -> Result<Node, CompileError> {
    if depth > MAX_CONDITION_DEPTH {
        return Err(CompileError::TooDeep);
    }
    let children = |items: &[Condition]| {
        items
            .iter()
            .map(|c| compile_condition(c, depth + 1))
            .collect::<Result<Vec<_>, _>>()
    };
    Ok(match condition {
        Condition::Always(b) => Node::Const(*b),
        Condition::All(items) => Node::All(children(items)?),
        Condition::Any(items) => Node::Any(children(items)?),
        Condition::Not(inner) => Node::Not(Box::new(compile_condition(inner, depth + 1)?)),
        Condition::Leaf(predicate) => Node::Test(compile_predicate(predicate)?),
    })
}

fn field_name(field: &str) -> Result<String, CompileError> {
    let field = field.trim();
    if field.is_empty() {
        return Err(CompileError::EmptyField);
    }
    Ok(field.to_string())
}

fn unit_interval(what: &'static str, value: f64) -> Result<f64, CompileError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(CompileError::OutOfRange { what, value });
    }
    Ok(value)
}

fn compile_predicate(predicate: &Predicate) -> Result<Test, CompileError> {
    Ok(match predicate {
        Predicate::FieldEquals {
            field,
            value,
            target,
        } => Test::FieldEquals {
            field: field_name(field)?,
            value: normalize_text(value),
            target: *target,
        },
        Predicate::FieldsMatch { field } => Test::FieldsMatch {
            field: field_name(field)?,
        },
        Predicate::FieldSimilarity { field, min } => Test::FieldSimilarity {
            field: field_name(field)?,
            min: unit_interval("similarity threshold", *min)?,
        },
        Predicate::FieldMissing { field, target } => Test::FieldMissing {
            field: field_name(field)?,
            target: *target,
        },
        Predicate::PatternMatch {
            field,
            pattern,
            target,
        } => Test::Pattern {
            field: field_name(field)?,
            regex: RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .map_err(|source| CompileError::InvalidPattern {
                    pattern: pattern.clone(),
                    source,
                })?,
            target: *target,
        },
        Predicate::ContainsKeyword {
            field,
            keywords,
            target,
        } => {
            let field = field_name(field)?;
            let keywords: Vec<String> = keywords
                .iter()
                .map(|k| normalize_text(k))
                .filter(|k| !k.is_empty())
                .collect();
            if keywords.is_empty() {
                return Err(CompileError::NoKeywords(field));
            }
            Test::Keywords {
                field,
                keywords,
                target: *target,
            }
        }
        Predicate::ScoreAtLeast { min } => Test::ScoreAtLeast(unit_interval("score", *min)?),
        Predicate::ScoreBelow { max } => Test::ScoreBelow(unit_interval("score", *max)?),
        Predicate::EnvironmentIs { value } => Test::Environment(value.trim().to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mergewise_core::Recommendation;

    fn reject() -> Vec<Action> {
        vec![Action::SetRecommendation {
            value: Recommendation::Reject,
        }]
    }

    fn rule(condition: Condition, actions: Vec<Action>) -> BusinessRule {
        BusinessRule::new("r1", "Rule", 5, RuleDefinition::new(condition, actions))
    }

    #[test]
    fn compiles_nested_conditions() {
        let cond = Condition::All(vec![
            Condition::Leaf(Predicate::FieldsMatch {
                field: "address".into(),
            }),
            Condition::Not(Box::new(Condition::Leaf(Predicate::PatternMatch {
                field: "name".into(),
                pattern: r"\bholdings\b".into(),
                target: Target::Either,
            }))),
        ]);
        let compiled = compile(&rule(cond, reject())).unwrap();
        assert!(matches!(compiled.condition, Node::All(ref c) if c.len() == 2));
        assert_eq!(compiled.version, 1);
        assert!(compiled.timeout.is_none());
    }

    #[test]
    fn rejects_bad_regex() {
        let cond = Condition::Leaf(Predicate::PatternMatch {
            field: "name".into(),
            pattern: "(".into(),
            target: Target::Either,
        });
        assert!(matches!(
            compile(&rule(cond, reject())),
            Err(CompileError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn rejects_empty_actions_and_fields() {
        assert!(matches!(
            compile(&rule(Condition::Always(true), vec![])),
            Err(CompileError::NoActions)
        ));
        let cond = Condition::Leaf(Predicate::FieldsMatch { field: "  ".into() });
        assert!(matches!(
            compile(&rule(cond, reject())),
            Err(CompileError::EmptyField)
        ));
    }

    #[test]
    fn rejects_out_of_range_values() {
        let cond = Condition::Leaf(Predicate::ScoreAtLeast { min: 85.0 });
        assert!(matches!(
            compile(&rule(cond, reject())),
            Err(CompileError::OutOfRange { .. })
        ));
        let actions = vec![Action::SetConfidence { score: 150.0 }];
        assert!(matches!(
            compile(&rule(Condition::Always(true), actions)),
            Err(CompileError::OutOfRange { .. })
        ));
    }

    #[test]
    fn rejects_blank_keyword_lists() {
        let cond = Condition::Leaf(Predicate::ContainsKeyword {
            field: "name".into(),
            keywords: vec!["  ".into(), "!".into()],
            target: Target::Either,
        });
        assert!(matches!(
            compile(&rule(cond, reject())),
            Err(CompileError::NoKeywords(_))
        ));
    }

    #[test]
    fn rejects_deep_nesting() {
        let mut cond = Condition::Always(true);
        for _ in 0..=MAX_CONDITION_DEPTH {
            cond = Condition::Not(Box::new(cond));
        }
        assert!(matches!(
            compile(&rule(cond, reject())),
            Err(CompileError::TooDeep)
        ));
    }
}
