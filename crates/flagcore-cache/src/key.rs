//! Cache key canonicalization.
//!
//! A cache key is derived from the API base URL and the flattened context
//! that was evaluated against, so two contexts that flatten identically
//! share one cache entry and a single in-flight fetch (see
//! `flagcore-client`'s single-flight dedup).

use std::collections::BTreeMap;

/// Build the canonical cache key for `api_base` and a flattened context.
///
/// Format: `{api_base}&{percent-encoded "key=value" pairs sorted by key,
/// joined with "&"}`. `BTreeMap` iteration is already key-sorted, so the
/// pairs need no separate sort step.
#[must_use]
pub fn canonical_key(api_base: &str, flat_context: &BTreeMap<String, String>) -> String {
    let mut out = String::from(api_base);
    for (k, v) in flat_context {
        out.push('&');
        out.push_str(&percent_encode(k));
        out.push('=');
        out.push_str(&percent_encode(v));
    }
    out
}

/// Minimal percent-encoding covering the characters that would otherwise
/// make the key ambiguous as a `&`/`=`-delimited string or unsafe as a
/// derived filename.
fn percent_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(b as char),
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_sorted_by_field_regardless_of_insertion_order() {
        let mut a = BTreeMap::new();
        a.insert("user.id".to_string(), "u1".to_string());
        a.insert("company.id".to_string(), "c1".to_string());
        let key = canonical_key("https://api.example.com", &a);
        assert_eq!(key, "https://api.example.com&company.id=c1&user.id=u1");
    }

    #[test]
    fn unsafe_characters_are_percent_encoded() {
        let mut a = BTreeMap::new();
        a.insert("user.email".to_string(), "a b&c".to_string());
        let key = canonical_key("https://api.example.com", &a);
        assert_eq!(key, "https://api.example.com&user.email=a%20b%26c");
    }

    #[test]
    fn empty_context_just_returns_the_api_base() {
        let empty = BTreeMap::new();
        assert_eq!(canonical_key("https://api.example.com", &empty), "https://api.example.com");
    }

    #[test]
    fn identical_contexts_in_different_insertion_order_produce_identical_keys() {
        let mut a = BTreeMap::new();
        a.insert("z".to_string(), "1".to_string());
        a.insert("a".to_string(), "2".to_string());
        let mut b = BTreeMap::new();
        b.insert("a".to_string(), "2".to_string());
        b.insert("z".to_string(), "1".to_string());
        assert_eq!(canonical_key("base", &a), canonical_key("base", &b));
    }
}
