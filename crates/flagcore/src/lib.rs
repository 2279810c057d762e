//! flagcore
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The deterministic, side-effect-free subsystem that decides, for a given
//! caller context, which value (if any) a feature flag resolves to.
//!
//! Evaluation never performs I/O and never throws across its public
//! boundary: malformed input, missing context fields, and unknown
//! operators all degrade to `false` (see [`operator`] and [`filter`]),
//! with the reason surfaced in [`EvaluationResult::missing_context_fields`]
//! rather than as an error. The only place this crate returns
//! `Result<_, flagcore_error::FlagError>` is compiling a rule list into a
//! [`engine::CompiledEvaluator`], which can reject a structurally invalid
//! rollout threshold up front.

/// Context flattening and unflattening (dotted-path addressing).
pub mod context;
/// The flag rule engine: first-match evaluation and the compiled evaluator.
pub mod engine;
/// Recursive filter-tree evaluation (group/negation/context/rollout/constant).
pub mod filter;
/// Deterministic percentage-rollout hashing.
pub mod hash;
/// Single-operator comparison semantics (`IS`, `ANY_OF`, `GT`, dates, ...).
pub mod operator;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub use context::FlatContext;
pub use filter::Filter;
pub use operator::ContextOp;

/// A feature flag: an opaque key and an ordered list of rules.
///
/// Order is significant — the first rule whose filter matches wins.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Flag {
    /// Opaque string identifier, unique within a deployment.
    pub key: String,
    /// Ordered rules; first match wins.
    pub rules: Vec<Rule>,
}

/// A single clause of a flag: a filter paired with the value it produces.
///
/// `value` is treated opaquely by the core — a simple boolean flag stores
/// `true`/`false`, a multi-variant flag stores an arbitrary JSON payload.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Rule {
    /// The flag's payload when this rule's filter matches.
    pub value: serde_json::Value,
    /// The predicate deciding whether this rule applies.
    pub filter: Filter,
}

/// The outcome of evaluating a flag's rule list against a context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EvaluationResult {
    /// The flag identifier that was evaluated.
    pub flag_key: String,
    /// The matched rule's value, or `None` if no rule matched.
    pub value: Option<serde_json::Value>,
    /// The flattened context that was evaluated against.
    pub context: FlatContext,
    /// One boolean per rule, in rule order.
    pub rule_evaluation_results: Vec<bool>,
    /// Context paths that some rule required but the context did not supply.
    pub missing_context_fields: Vec<String>,
    /// `"rule #N matched"` for the first matching index, else `"no matched rules"`.
    pub reason: String,
}

/// Collects missing-field paths encountered while evaluating a filter tree.
///
/// A `BTreeSet` keeps the output deterministic without requiring callers to
/// sort; spec only requires deduplication, not a particular order.
pub type MissingFields = BTreeSet<String>;

fn missing_fields_to_vec(fields: MissingFields) -> Vec<String> {
    fields.into_iter().collect()
}

#[cfg(test)]
mod lib_tests {
    use super::*;

    #[test]
    fn flag_and_rule_round_trip_json() {
        let flag = Flag {
            key: "new-onboarding".into(),
            rules: vec![Rule {
                value: serde_json::json!(true),
                filter: Filter::Constant { value: true },
            }],
        };
        let json = serde_json::to_string(&flag).unwrap();
        let back: Flag = serde_json::from_str(&json).unwrap();
        assert_eq!(back.key, flag.key);
        assert_eq!(back.rules.len(), 1);
    }
}
