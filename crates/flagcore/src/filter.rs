//! The filter tree: the recursive predicate language a [`crate::Rule`]
//! attaches to a flag value.
//!
//! A filter is evaluated against a single flattened context and produces a
//! single `bool`. Evaluation never fails — a missing context field is
//! recorded into the caller-supplied `missing` set and the leaf simply
//! evaluates to `false`, so a malformed or incomplete context degrades a
//! flag toward "off" rather than aborting evaluation.

use crate::context::FlatContext;
use crate::operator::{self, ContextOp};
use crate::MissingFields;
use chrono::{DateTime, Utc};
use flagcore_error::{ErrorCode, FlagError};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// How a [`Filter::Group`]'s children combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GroupOp {
    /// All children must match. An empty group matches (vacuous truth).
    And,
    /// At least one child must match. An empty group does not match.
    Or,
}

/// A node in the filter tree.
///
/// `Deserialize` is hand-written rather than derived: an unrecognized
/// `type` discriminant, or an unrecognized `operator` inside a `context`
/// leaf, degrades just that node to `Constant { value: false }` instead of
/// failing the whole document — see [`Filter::from_value`].
#[derive(Debug, Clone, Serialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Filter {
    /// Combine child filters with `AND` or `OR` short-circuit semantics.
    Group {
        /// The combinator.
        operator: GroupOp,
        /// Child filters, evaluated in order.
        filters: Vec<Filter>,
    },
    /// Invert a child filter.
    Negation {
        /// The filter whose result is inverted.
        filter: Box<Filter>,
    },
    /// Compare one context field against a fixed set of arguments.
    Context {
        /// Dotted path into the flattened context (see [`crate::context`]).
        field: String,
        /// The comparison to apply.
        operator: ContextOp,
        /// Arguments to the comparison; arity depends on `operator`.
        values: Vec<String>,
    },
    /// A deterministic percentage rollout keyed on one context attribute.
    Rollout {
        /// The flag key this rollout belongs to, mixed into the hash input
        /// so the same entity buckets independently per flag.
        key: String,
        /// Dotted path of the context field identifying the rollout unit
        /// (e.g. a user or company id).
        partial_rollout_attribute: String,
        /// Threshold in `[0, 100_000]`; the entity is in the rollout when
        /// its hash bucket is strictly less than this value.
        partial_rollout_threshold: u32,
    },
    /// An unconditional literal, useful as a default "else" branch.
    Constant {
        /// The literal result.
        value: bool,
    },
}

impl<'de> Deserialize<'de> for Filter {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        Filter::from_value(value).map_err(serde::de::Error::custom)
    }
}

impl Filter {
    /// Parse one filter node out of a JSON value.
    ///
    /// An unrecognized `type` tag, or an unrecognized `operator` inside a
    /// `context` leaf, degrades that single node to `Constant { value:
    /// false }` and logs via [`tracing::error!`] rather than failing —
    /// everything else (a missing required field, a wrong JSON shape inside
    /// a recognized variant) is still a hard deserialize error, since the
    /// degrade contract only covers unrecognized discriminants.
    fn from_value(value: serde_json::Value) -> Result<Filter, String> {
        let tag = value.get("type").and_then(serde_json::Value::as_str).map(str::to_owned);
        let Some(tag) = tag else {
            return Err("filter node is missing its \"type\" field".to_string());
        };
        match tag.as_str() {
            "group" => {
                let operator: GroupOp = field(&value, "operator")?;
                let raw_filters: Vec<serde_json::Value> = field(&value, "filters")?;
                let filters = raw_filters.into_iter().map(Filter::from_value).collect::<Result<_, _>>()?;
                Ok(Filter::Group { operator, filters })
            }
            "negation" => {
                let inner: serde_json::Value = field(&value, "filter")?;
                Ok(Filter::Negation { filter: Box::new(Filter::from_value(inner)?) })
            }
            "context" => {
                let field_path: String = field(&value, "field")?;
                let values: Vec<String> = field(&value, "values")?;
                let operator_raw: serde_json::Value = field(&value, "operator")?;
                match serde_json::from_value::<ContextOp>(operator_raw.clone()) {
                    Ok(operator) => Ok(Filter::Context { field: field_path, operator, values }),
                    Err(_) => {
                        let err = FlagError::new(
                            ErrorCode::FilterUnknownDiscriminant,
                            "unrecognized context operator; degrading filter to constant false",
                        )
                        .with_context("field", &field_path)
                        .with_context("operator", &operator_raw);
                        tracing::error!(error = %err, "unknown filter discriminant");
                        Ok(Filter::Constant { value: false })
                    }
                }
            }
            "rollout" => Ok(Filter::Rollout {
                key: field(&value, "key")?,
                partial_rollout_attribute: field(&value, "partial_rollout_attribute")?,
                partial_rollout_threshold: field(&value, "partial_rollout_threshold")?,
            }),
            "constant" => Ok(Filter::Constant { value: field(&value, "value")? }),
            other => {
                let err = FlagError::new(
                    ErrorCode::FilterUnknownDiscriminant,
                    "unrecognized filter type; degrading to constant false",
                )
                .with_context("type", other);
                tracing::error!(error = %err, "unknown filter discriminant");
                Ok(Filter::Constant { value: false })
            }
        }
    }
}

/// Pull a required field off a filter-node JSON object and deserialize it,
/// turning a missing field or a type mismatch into the same `String` error
/// [`Filter::from_value`] propagates for any other structural problem.
fn field<T: serde::de::DeserializeOwned>(value: &serde_json::Value, name: &str) -> Result<T, String> {
    let raw = value.get(name).ok_or_else(|| format!("filter node is missing \"{name}\""))?;
    serde_json::from_value(raw.clone()).map_err(|e| format!("field \"{name}\": {e}"))
}

/// Evaluate `filter` against `ctx`, recording any missing context field
/// paths into `missing` and returning whether the flag's owning flag key
/// matters for rollout hashing.
#[must_use]
pub fn eval_filter(
    filter: &Filter,
    flag_key: &str,
    ctx: &FlatContext,
    missing: &mut MissingFields,
    now: DateTime<Utc>,
) -> bool {
    match filter {
        Filter::Group { operator, filters } => match operator {
            GroupOp::And => filters.iter().all(|f| eval_filter(f, flag_key, ctx, missing, now)),
            GroupOp::Or => filters.iter().any(|f| eval_filter(f, flag_key, ctx, missing, now)),
        },
        Filter::Negation { filter } => !eval_filter(filter, flag_key, ctx, missing, now),
        Filter::Context { field, operator: op, values } => match ctx.get(field) {
            Some(value) => operator::evaluate(value, *op, values, now),
            None => {
                missing.insert(field.clone());
                false
            }
        },
        Filter::Rollout {
            key,
            partial_rollout_attribute,
            partial_rollout_threshold,
        } => match ctx.get(partial_rollout_attribute) {
            Some(attr_value) if !attr_value.is_empty() => {
                let hash_input = format!("{key}.{attr_value}");
                crate::hash::hash_int(&hash_input) < *partial_rollout_threshold
            }
            _ => {
                missing.insert(partial_rollout_attribute.clone());
                false
            }
        },
        Filter::Constant { value } => *value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    fn ctx(pairs: &[(&str, &str)]) -> FlatContext {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn empty_and_group_is_vacuously_true() {
        let f = Filter::Group { operator: GroupOp::And, filters: vec![] };
        let mut missing = MissingFields::new();
        assert!(eval_filter(&f, "flag", &ctx(&[]), &mut missing, now()));
    }

    #[test]
    fn empty_or_group_is_false() {
        let f = Filter::Group { operator: GroupOp::Or, filters: vec![] };
        let mut missing = MissingFields::new();
        assert!(!eval_filter(&f, "flag", &ctx(&[]), &mut missing, now()));
    }

    #[test]
    fn and_group_with_negation_short_circuits_correctly() {
        let f = Filter::Group {
            operator: GroupOp::And,
            filters: vec![
                Filter::Context {
                    field: "company.plan".into(),
                    operator: ContextOp::Is,
                    values: vec!["pro".into()],
                },
                Filter::Negation {
                    filter: Box::new(Filter::Context {
                        field: "company.trial".into(),
                        operator: ContextOp::IsTrue,
                        values: vec![],
                    }),
                },
            ],
        };
        let mut missing = MissingFields::new();
        let c = ctx(&[("company.plan", "pro"), ("company.trial", "false")]);
        assert!(eval_filter(&f, "flag", &c, &mut missing, now()));
        assert!(missing.is_empty());
    }

    #[test]
    fn missing_context_field_is_recorded_and_degrades_to_false() {
        let f = Filter::Context {
            field: "user.id".into(),
            operator: ContextOp::Is,
            values: vec!["u1".into()],
        };
        let mut missing = MissingFields::new();
        assert!(!eval_filter(&f, "flag", &ctx(&[]), &mut missing, now()));
        assert!(missing.contains("user.id"));
    }

    #[test]
    fn rollout_below_threshold_matches() {
        // "EEuoT8KShb" hashes to 38026 (see crate::hash); a threshold above
        // that bucket must match, below it must not.
        let f = Filter::Rollout {
            key: "EEuoT8KShb".into(),
            partial_rollout_attribute: "user.id".into(),
            partial_rollout_threshold: 50_000,
        };
        let c = ctx(&[("user.id", "")]);
        let mut missing = MissingFields::new();
        // empty attribute value counts as missing, not present.
        assert!(!eval_filter(&f, "unused", &c, &mut missing, now()));
        assert!(missing.contains("user.id"));
    }

    #[test]
    fn rollout_missing_attribute_is_recorded_as_missing() {
        let f = Filter::Rollout {
            key: "k".into(),
            partial_rollout_attribute: "user.id".into(),
            partial_rollout_threshold: 50_000,
        };
        let mut missing = MissingFields::new();
        assert!(!eval_filter(&f, "unused", &ctx(&[]), &mut missing, now()));
        assert_eq!(missing.len(), 1);
        assert!(missing.contains("user.id"));
    }

    #[test]
    fn constant_is_unconditional() {
        let mut missing = MissingFields::new();
        assert!(eval_filter(&Filter::Constant { value: true }, "f", &ctx(&[]), &mut missing, now()));
        assert!(!eval_filter(&Filter::Constant { value: false }, "f", &ctx(&[]), &mut missing, now()));
    }

    #[test]
    fn unknown_filter_type_degrades_to_constant_false() {
        let json = serde_json::json!({"type": "time_travel", "whatever": 1});
        let f: Filter = serde_json::from_value(json).unwrap();
        assert!(matches!(f, Filter::Constant { value: false }));
    }

    #[test]
    fn unknown_context_operator_degrades_to_constant_false() {
        let json = serde_json::json!({
            "type": "context",
            "field": "user.id",
            "operator": "LOOKS_LIKE_A_DUCK",
            "values": ["u1"],
        });
        let f: Filter = serde_json::from_value(json).unwrap();
        assert!(matches!(f, Filter::Constant { value: false }));
    }

    #[test]
    fn unknown_filter_type_nested_in_a_group_only_degrades_that_leaf() {
        let json = serde_json::json!({
            "type": "group",
            "operator": "OR",
            "filters": [
                {"type": "mystery"},
                {"type": "context", "field": "a", "operator": "IS", "values": ["1"]},
            ],
        });
        let f: Filter = serde_json::from_value(json).unwrap();
        let mut missing = MissingFields::new();
        let c = ctx(&[("a", "1")]);
        assert!(eval_filter(&f, "flag", &c, &mut missing, now()));
    }

    #[test]
    fn missing_type_discriminant_is_a_hard_deserialize_error() {
        let json = serde_json::json!({"field": "a"});
        assert!(serde_json::from_value::<Filter>(json).is_err());
    }

    #[test]
    fn structurally_malformed_known_variant_is_a_hard_deserialize_error() {
        // "rollout" is recognized, but missing its required "key" — this is
        // not a discriminant problem, so it must still fail loudly.
        let json = serde_json::json!({
            "type": "rollout",
            "partial_rollout_attribute": "user.id",
            "partial_rollout_threshold": 10_000,
        });
        assert!(serde_json::from_value::<Filter>(json).is_err());
    }

    #[test]
    fn nested_groups_compose() {
        let f = Filter::Group {
            operator: GroupOp::Or,
            filters: vec![
                Filter::Context {
                    field: "a".into(),
                    operator: ContextOp::Is,
                    values: vec!["1".into()],
                },
                Filter::Group {
                    operator: GroupOp::And,
                    filters: vec![
                        Filter::Context { field: "b".into(), operator: ContextOp::Is, values: vec!["2".into()] },
                        Filter::Context { field: "c".into(), operator: ContextOp::Is, values: vec!["3".into()] },
                    ],
                },
            ],
        };
        let mut missing = MissingFields::new();
        let c = ctx(&[("b", "2"), ("c", "3")]);
        assert!(eval_filter(&f, "flag", &c, &mut missing, now()));
    }
}
