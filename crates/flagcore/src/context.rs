//! Context flattening and unflattening.
//!
//! Converts a nested, JSON-like context into a flat mapping of dotted-path
//! to string (and back). The filter tree evaluator and the operator
//! evaluator only ever see the flattened form.

use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Maximum nesting depth the flattener will descend into.
///
/// Contexts are expected to be JSON-like and acyclic; this cap is a
/// defensive backstop against pathological input, not a feature.
const MAX_DEPTH: usize = 32;

/// A flattened context: dotted-path → string value.
///
/// `BTreeMap` keeps iteration order sorted, which both gives a stable
/// cache-key serialization (see `flagcore-cache`) and makes `unflatten`'s
/// "shorter leaf wins over a deeper subtree" rule fall out of iteration
/// order for free — a prefix key always sorts before any key it prefixes.
pub type FlatContext = BTreeMap<String, String>;

/// Flatten a nested context into a dotted-path mapping.
///
/// - Primitive leaves are written at the current path using their natural
///   textual form (`true`/`false`, the number's own `Display`, or the
///   string itself).
/// - `null` becomes `""`.
/// - A non-empty array recurses with `.0`, `.1`, ... suffixes; an empty
///   array writes `""` at its own path.
/// - A non-empty object recurses per own key; an empty object writes `""`
///   at its own path.
/// - A bare primitive at the root is written under the empty-string key.
#[must_use]
pub fn flatten(ctx: &Value) -> FlatContext {
    let mut out = FlatContext::new();
    flatten_into("", ctx, 0, &mut out);
    out
}

fn flatten_into(path: &str, value: &Value, depth: usize, out: &mut FlatContext) {
    if depth > MAX_DEPTH {
        tracing::warn!(path, depth, "context nesting exceeded depth cap; dropping subtree");
        return;
    }
    match value {
        Value::Null => {
            out.insert(path.to_string(), String::new());
        }
        Value::Bool(b) => {
            out.insert(path.to_string(), b.to_string());
        }
        Value::Number(n) => {
            out.insert(path.to_string(), n.to_string());
        }
        Value::String(s) => {
            out.insert(path.to_string(), s.clone());
        }
        Value::Array(items) => {
            if items.is_empty() {
                out.insert(path.to_string(), String::new());
            } else {
                for (i, item) in items.iter().enumerate() {
                    flatten_into(&join(path, &i.to_string()), item, depth + 1, out);
                }
            }
        }
        Value::Object(map) => {
            if map.is_empty() {
                out.insert(path.to_string(), String::new());
            } else {
                for (k, v) in map {
                    flatten_into(&join(path, k), v, depth + 1, out);
                }
            }
        }
    }
}

fn join(path: &str, suffix: &str) -> String {
    if path.is_empty() {
        suffix.to_string()
    } else {
        format!("{path}.{suffix}")
    }
}

/// Reconstruct a nested JSON object from a flattened context.
///
/// Every leaf becomes a JSON string (the flattener is lossy: numeric and
/// boolean typing is not recovered). Arrays are never reconstructed —
/// numeric-looking path segments become ordinary object keys. When a
/// shorter path and a longer path that extends it both exist (e.g. `"a"`
/// and `"a.b"`), the shorter leaf wins and the deeper key is dropped.
#[must_use]
pub fn unflatten(map: &FlatContext) -> Value {
    let mut root = Map::new();
    for (key, value) in map {
        if key.is_empty() {
            continue;
        }
        insert_path(&mut root, &key.split('.').collect::<Vec<_>>(), value);
    }
    Value::Object(root)
}

fn insert_path(obj: &mut Map<String, Value>, segments: &[&str], value: &str) {
    let Some((head, rest)) = segments.split_first() else {
        return;
    };
    if rest.is_empty() {
        // Don't let a later deeper key overwrite a leaf already won by a
        // shorter path — but a plain duplicate key just overwrites, which
        // matches map semantics.
        if !matches!(obj.get(*head), Some(Value::Object(_))) {
            obj.insert((*head).to_string(), Value::String(value.to_string()));
        }
        return;
    }
    match obj.get(*head) {
        Some(Value::Object(_)) => {}
        Some(_) => return, // prefix is already a leaf; deeper key is dropped
        None => {
            obj.insert((*head).to_string(), Value::Object(Map::new()));
        }
    }
    if let Some(Value::Object(child)) = obj.get_mut(*head) {
        insert_path(child, rest, value);
    }
}
