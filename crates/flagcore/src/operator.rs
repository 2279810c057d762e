//! Single-operator comparison semantics.
//!
//! [`evaluate`] applies one [`ContextOp`] to a single resolved field value
//! (a string already pulled out of the flattened context) and a list of
//! string arguments. It is only ever called once the filter-tree evaluator
//! (see [`crate::filter`]) has confirmed the field is present — `SET` and
//! `NOT_SET` therefore only distinguish "present and empty" from "present
//! and non-empty"; a genuinely absent field is handled upstream.

use chrono::{DateTime, NaiveDate, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The closed set of comparison operators a `Context` filter leaf can use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContextOp {
    /// Exact string equality.
    Is,
    /// Exact string inequality.
    IsNot,
    /// Membership in the argument list.
    AnyOf,
    /// Non-membership in the argument list.
    NotAnyOf,
    /// Case-insensitive substring match.
    Contains,
    /// Negated case-insensitive substring match.
    NotContains,
    /// Numeric greater-than, compared as strings (see [`evaluate`]).
    Gt,
    /// Numeric less-than, compared as strings (see [`evaluate`]).
    Lt,
    /// Field present and a non-empty string.
    Set,
    /// Field present and an empty string.
    NotSet,
    /// Field textually equals `"true"`.
    IsTrue,
    /// Field textually equals `"false"`.
    IsFalse,
    /// Field-as-date is before `now - days`.
    Before,
    /// Field-as-date is after `now - days`.
    After,
    /// Field-as-date is on or before an absolute date (inclusive).
    DateBefore,
    /// Field-as-date is on or after an absolute date (inclusive).
    DateAfter,
}

/// Apply `op` to `field_value` and `args`, evaluated as of `now`.
///
/// Never panics. Malformed arguments (wrong arity, unparseable numbers or
/// dates) degrade to `false`; callers that want diagnostics should log
/// before calling, since this function has no logger of its own.
#[must_use]
pub fn evaluate(field_value: &str, op: ContextOp, args: &[String], now: DateTime<Utc>) -> bool {
    match op {
        ContextOp::Is => args.first().is_some_and(|a| a == field_value),
        ContextOp::IsNot => args.first().is_some_and(|a| a != field_value),
        ContextOp::AnyOf => args.iter().any(|a| a == field_value),
        ContextOp::NotAnyOf => args.iter().all(|a| a != field_value),
        ContextOp::Contains => args
            .first()
            .is_some_and(|a| field_value.to_lowercase().contains(&a.to_lowercase())),
        ContextOp::NotContains => args
            .first()
            .is_some_and(|a| !field_value.to_lowercase().contains(&a.to_lowercase())),
        ContextOp::Gt => compare_numeric_as_string(field_value, args, |a, b| a > b),
        ContextOp::Lt => compare_numeric_as_string(field_value, args, |a, b| a < b),
        ContextOp::Set => !field_value.is_empty(),
        ContextOp::NotSet => field_value.is_empty(),
        ContextOp::IsTrue => field_value == "true",
        ContextOp::IsFalse => field_value == "false",
        ContextOp::Before => relative_days(field_value, args, now, |field, cutoff| field < cutoff),
        ContextOp::After => relative_days(field_value, args, now, |field, cutoff| field > cutoff),
        ContextOp::DateBefore => absolute_date(field_value, args, |field, target| field <= target),
        ContextOp::DateAfter => absolute_date(field_value, args, |field, target| field >= target),
    }
}

/// `GT`/`LT` require both sides to parse as finite numbers, but then compare
/// the *original strings* lexicographically — a documented compatibility
/// quirk callers must zero-pad or single-digit around, not a bug to "fix".
fn compare_numeric_as_string(field_value: &str, args: &[String], cmp: impl Fn(&str, &str) -> bool) -> bool {
    let Some(arg) = args.first() else {
        return false;
    };
    let field_is_finite_number = field_value.parse::<f64>().is_ok_and(f64::is_finite);
    let arg_is_finite_number = arg.parse::<f64>().is_ok_and(f64::is_finite);
    if !field_is_finite_number || !arg_is_finite_number {
        return false;
    }
    cmp(field_value, arg.as_str())
}

fn relative_days(
    field_value: &str,
    args: &[String],
    now: DateTime<Utc>,
    cmp: impl Fn(DateTime<Utc>, DateTime<Utc>) -> bool,
) -> bool {
    let Some(days) = args.first().and_then(|a| a.parse::<i64>().ok()).filter(|d| *d >= 0) else {
        return false;
    };
    let Some(field_date) = parse_flexible_date(field_value) else {
        return false;
    };
    let cutoff = now - chrono::Duration::days(days);
    cmp(field_date, cutoff)
}

fn absolute_date(
    field_value: &str,
    args: &[String],
    cmp: impl Fn(DateTime<Utc>, DateTime<Utc>) -> bool,
) -> bool {
    let Some(arg) = args.first() else {
        return false;
    };
    let (Some(field_date), Some(target_date)) =
        (parse_flexible_date(field_value), parse_flexible_date(arg))
    else {
        return false;
    };
    cmp(field_date, target_date)
}

/// Parse either a full RFC 3339 timestamp or a bare `YYYY-MM-DD` date
/// (interpreted as midnight UTC), mirroring the permissive date parsing
/// every collaborating SDK performs before comparing.
fn parse_flexible_date(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}
