//! The flag rule engine: evaluate a flag's ordered rule list against a
//! context, and [`CompiledEvaluator`], a precompiled form that front-loads
//! rollout-threshold validation and `ANY_OF`/`NOT_ANY_OF` set construction
//! so repeated evaluation of the same flag against many contexts does not
//! redo that work per call.

use crate::context::{self, FlatContext};
use crate::filter::{eval_filter, Filter, GroupOp};
use crate::operator::ContextOp;
use crate::{missing_fields_to_vec, EvaluationResult, MissingFields, Rule};
use chrono::Utc;
use flagcore_error::{ErrorCode, FlagError};
use std::collections::HashSet;

/// Evaluate `rules` in order against `context`, returning the first match.
///
/// This is the direct, uncompiled path: it flattens `context`, walks
/// `rules` once, and returns as soon as the bookkeeping for
/// [`EvaluationResult`] is complete. Prefer [`CompiledEvaluator`] when the
/// same rule list is evaluated against many contexts.
#[must_use]
pub fn evaluate_flag(flag_key: &str, rules: &[Rule], context: &serde_json::Value) -> EvaluationResult {
    let flat = context::flatten(context);
    let now = Utc::now();
    let mut missing = MissingFields::new();
    let mut results = Vec::with_capacity(rules.len());
    let mut matched_index = None;
    for (i, rule) in rules.iter().enumerate() {
        let matched = eval_filter(&rule.filter, flag_key, &flat, &mut missing, now);
        results.push(matched);
        if matched && matched_index.is_none() {
            matched_index = Some(i);
        }
    }
    let reason = match matched_index {
        Some(i) => format!("rule #{i} matched"),
        None => "no matched rules".to_string(),
    };
    EvaluationResult {
        flag_key: flag_key.to_string(),
        value: matched_index.map(|i| rules[i].value.clone()),
        context: flat,
        rule_evaluation_results: results,
        missing_context_fields: missing_fields_to_vec(missing),
        reason,
    }
}

/// A filter tree with `ANY_OF`/`NOT_ANY_OF` argument lists precomputed into
/// hash sets. Structurally identical to [`Filter`] otherwise.
#[derive(Debug, Clone)]
enum CompiledFilter {
    Group { operator: GroupOp, filters: Vec<CompiledFilter> },
    Negation { filter: Box<CompiledFilter> },
    Context { field: String, operator: ContextOp, values: Vec<String>, value_set: Option<HashSet<String>> },
    Rollout { key: String, partial_rollout_attribute: String, partial_rollout_threshold: u32 },
    Constant { value: bool },
}

fn compile_filter(filter: &Filter) -> Result<CompiledFilter, FlagError> {
    Ok(match filter {
        Filter::Group { operator, filters } => CompiledFilter::Group {
            operator: *operator,
            filters: filters.iter().map(compile_filter).collect::<Result<_, _>>()?,
        },
        Filter::Negation { filter } => CompiledFilter::Negation { filter: Box::new(compile_filter(filter)?) },
        Filter::Context { field, operator, values } => {
            let value_set = matches!(operator, ContextOp::AnyOf | ContextOp::NotAnyOf)
                .then(|| values.iter().cloned().collect());
            CompiledFilter::Context { field: field.clone(), operator: *operator, values: values.clone(), value_set }
        }
        Filter::Rollout { key, partial_rollout_attribute, partial_rollout_threshold } => {
            if *partial_rollout_threshold > 100_000 {
                return Err(FlagError::new(
                    ErrorCode::HashThresholdOutOfRange,
                    format!("rollout threshold {partial_rollout_threshold} exceeds the 100000-wide bucket space"),
                )
                .with_context("key", key.clone())
                .with_context("partial_rollout_attribute", partial_rollout_attribute.clone()));
            }
            CompiledFilter::Rollout {
                key: key.clone(),
                partial_rollout_attribute: partial_rollout_attribute.clone(),
                partial_rollout_threshold: *partial_rollout_threshold,
            }
        }
        Filter::Constant { value } => CompiledFilter::Constant { value: *value },
    })
}

fn eval_compiled(
    filter: &CompiledFilter,
    flag_key: &str,
    ctx: &FlatContext,
    missing: &mut MissingFields,
    now: chrono::DateTime<Utc>,
) -> bool {
    match filter {
        CompiledFilter::Group { operator, filters } => match operator {
            GroupOp::And => filters.iter().all(|f| eval_compiled(f, flag_key, ctx, missing, now)),
            GroupOp::Or => filters.iter().any(|f| eval_compiled(f, flag_key, ctx, missing, now)),
        },
        CompiledFilter::Negation { filter } => !eval_compiled(filter, flag_key, ctx, missing, now),
        CompiledFilter::Context { field, operator, values, value_set } => match ctx.get(field) {
            Some(value) => match (operator, value_set) {
                (ContextOp::AnyOf, Some(set)) => set.contains(value),
                (ContextOp::NotAnyOf, Some(set)) => !set.contains(value),
                _ => crate::operator::evaluate(value, *operator, values, now),
            },
            None => {
                missing.insert(field.clone());
                false
            }
        },
        CompiledFilter::Rollout { key, partial_rollout_attribute, partial_rollout_threshold } => {
            match ctx.get(partial_rollout_attribute) {
                Some(attr_value) if !attr_value.is_empty() => {
                    let hash_input = format!("{key}.{attr_value}");
                    crate::hash::hash_int(&hash_input) < *partial_rollout_threshold
                }
                _ => {
                    missing.insert(partial_rollout_attribute.clone());
                    false
                }
            }
        }
        CompiledFilter::Constant { value } => *value,
    }
}

#[derive(Debug)]
struct CompiledRule {
    value: serde_json::Value,
    filter: CompiledFilter,
}

/// A rule list precompiled for repeated evaluation.
///
/// Construction validates every [`Filter::Rollout`] threshold up front
/// (returning a [`FlagError`] for a structurally invalid flag rather than
/// silently refusing to ever match it) and precomputes hash sets for
/// `ANY_OF`/`NOT_ANY_OF` context comparisons.
#[derive(Debug)]
pub struct CompiledEvaluator {
    rules: Vec<CompiledRule>,
}

impl CompiledEvaluator {
    /// Compile `rules`. Fails if any rollout filter's threshold exceeds the
    /// `[0, 100_000]` bucket space.
    pub fn new(rules: Vec<Rule>) -> Result<Self, FlagError> {
        let compiled = rules
            .into_iter()
            .map(|r| Ok(CompiledRule { value: r.value, filter: compile_filter(&r.filter)? }))
            .collect::<Result<Vec<_>, FlagError>>()?;
        Ok(Self { rules: compiled })
    }

    /// Evaluate the compiled rule list against `context`.
    #[must_use]
    pub fn evaluate(&self, flag_key: &str, context: &serde_json::Value) -> EvaluationResult {
        let flat = context::flatten(context);
        let now = Utc::now();
        let mut missing = MissingFields::new();
        let mut results = Vec::with_capacity(self.rules.len());
        let mut matched_index = None;
        for (i, rule) in self.rules.iter().enumerate() {
            let matched = eval_compiled(&rule.filter, flag_key, &flat, &mut missing, now);
            results.push(matched);
            if matched && matched_index.is_none() {
                matched_index = Some(i);
            }
        }
        let reason = match matched_index {
            Some(i) => format!("rule #{i} matched"),
            None => "no matched rules".to_string(),
        };
        EvaluationResult {
            flag_key: flag_key.to_string(),
            value: matched_index.map(|i| self.rules[i].value.clone()),
            context: flat,
            rule_evaluation_results: results,
            missing_context_fields: missing_fields_to_vec(missing),
            reason,
        }
    }

    /// Number of compiled rules.
    #[must_use]
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::GroupOp;
    use serde_json::json;

    fn simple_rules() -> Vec<Rule> {
        vec![
            Rule {
                value: json!("beta"),
                filter: Filter::Context { field: "company.plan".into(), operator: ContextOp::Is, values: vec!["pro".into()] },
            },
            Rule { value: json!("default"), filter: Filter::Constant { value: true } },
        ]
    }

    #[test]
    fn first_match_wins() {
        let ctx = json!({"company": {"plan": "pro"}});
        let result = evaluate_flag("rollout-flag", &simple_rules(), &ctx);
        assert_eq!(result.value, Some(json!("beta")));
        assert_eq!(result.reason, "rule #0 matched");
        assert_eq!(result.rule_evaluation_results, vec![true, true]);
    }

    #[test]
    fn falls_through_to_later_rule() {
        let ctx = json!({"company": {"plan": "free"}});
        let result = evaluate_flag("rollout-flag", &simple_rules(), &ctx);
        assert_eq!(result.value, Some(json!("default")));
        assert_eq!(result.reason, "rule #1 matched");
    }

    #[test]
    fn no_rules_match() {
        let rules = vec![Rule {
            value: json!("x"),
            filter: Filter::Context { field: "user.id".into(), operator: ContextOp::Is, values: vec!["u1".into()] },
        }];
        let result = evaluate_flag("flag", &rules, &json!({}));
        assert_eq!(result.value, None);
        assert_eq!(result.reason, "no matched rules");
        assert_eq!(result.missing_context_fields, vec!["user.id".to_string()]);
    }

    #[test]
    fn compiled_evaluator_rejects_out_of_range_rollout_threshold() {
        let rules = vec![Rule {
            value: json!(true),
            filter: Filter::Rollout {
                key: "flag".into(),
                partial_rollout_attribute: "user.id".into(),
                partial_rollout_threshold: 200_000,
            },
        }];
        let err = CompiledEvaluator::new(rules).unwrap_err();
        assert_eq!(err.code, ErrorCode::HashThresholdOutOfRange);
    }

    #[test]
    fn compiled_evaluator_matches_uncompiled_for_any_of() {
        let rules = vec![Rule {
            value: json!("match"),
            filter: Filter::Context {
                field: "user.segment".into(),
                operator: ContextOp::AnyOf,
                values: vec!["beta".into(), "internal".into()],
            },
        }];
        let ctx = json!({"user": {"segment": "internal"}});
        let compiled = CompiledEvaluator::new(rules.clone()).unwrap();
        let a = compiled.evaluate("flag", &ctx);
        let b = evaluate_flag("flag", &rules, &ctx);
        assert_eq!(a.value, b.value);
        assert_eq!(a.value, Some(json!("match")));
    }

    #[test]
    fn compiled_evaluator_rule_count() {
        let compiled = CompiledEvaluator::new(simple_rules()).unwrap();
        assert_eq!(compiled.rule_count(), 2);
    }

    #[test]
    fn nested_group_compiles_and_evaluates() {
        let rules = vec![Rule {
            value: json!(true),
            filter: Filter::Group {
                operator: GroupOp::And,
                filters: vec![
                    Filter::Context { field: "a".into(), operator: ContextOp::Is, values: vec!["1".into()] },
                    Filter::Negation {
                        filter: Box::new(Filter::Context { field: "b".into(), operator: ContextOp::IsTrue, values: vec![] }),
                    },
                ],
            },
        }];
        let compiled = CompiledEvaluator::new(rules).unwrap();
        let result = compiled.evaluate("flag", &json!({"a": "1", "b": "false"}));
        assert_eq!(result.value, Some(json!(true)));
    }
}
