//! flagcore-client
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The evaluation facade: wires the pure, synchronous rule engine in
//! [`flagcore`] to local storage in [`flagcore_cache`] and a
//! caller-supplied [`FetchDelegate`], adding the three things evaluation
//! itself cannot: a clock, a network, and concurrency control.
//!
//! - Concurrent evaluations that would fetch the same document are
//!   collapsed into a single in-flight request (single-flight dedup).
//! - A stale cache entry is served immediately while a refresh happens
//!   either in the background or inline, per [`flagcore_cache::config::CacheStrategy`].
//! - Every fetch is bounded by [`flagcore_cache::CacheConfig::timeout_ms`].

pub mod fetch;
/// Client identification sent to the flag backend.
pub mod version;

pub use fetch::FetchDelegate;
pub use version::{user_agent, SDK_VERSION};

use chrono::Utc;
use flagcore::context::flatten;
use flagcore::engine::{evaluate_flag, CompiledEvaluator};
use flagcore::{EvaluationResult, Rule};
use flagcore_cache::{canonical_key, Cache, CacheConfig, Freshness, Storage};
use flagcore_error::{ErrorCode, FlagError};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;

/// The shape of a fetched flag document: flag key to its ordered rule
/// list, exactly the input [`flagcore::engine::evaluate_flag`] expects.
pub type FlagDocument = BTreeMap<String, Vec<Rule>>;

type PendingFetch = Shared<BoxFuture<'static, Result<serde_json::Value, Arc<FlagError>>>>;

/// The evaluation facade.
///
/// Generic over the fetch transport (`D`) and the cache storage backend
/// (`S`) so embedders can plug in their own HTTP client and persistence
/// without this crate depending on either concretely.
pub struct Client<D: FetchDelegate + 'static, S: Storage + 'static> {
    delegate: Arc<D>,
    cache: Arc<Cache<S>>,
    api_base: String,
    in_flight: AsyncMutex<HashMap<String, PendingFetch>>,
}

impl<D: FetchDelegate + 'static, S: Storage + 'static> Client<D, S> {
    /// Build a client for `api_base`, backed by `delegate` for fetches and
    /// `storage`/`config` for local caching.
    pub fn new(api_base: impl Into<String>, delegate: D, storage: S, config: CacheConfig) -> Self {
        Self {
            delegate: Arc::new(delegate),
            cache: Arc::new(Cache::new(storage, config)),
            api_base: api_base.into(),
            in_flight: AsyncMutex::new(HashMap::new()),
        }
    }

    /// Facade entry point 1: evaluate a single flag against `context`,
    /// fetching or refreshing the flag document as needed.
    ///
    /// # Errors
    /// Returns an error only when no document — neither fresh, stale, nor
    /// previously cached — could be obtained at all (a cold cache plus a
    /// failing fetch).
    pub async fn evaluate(&self, flag_key: &str, context: &serde_json::Value) -> Result<EvaluationResult, FlagError> {
        let document = self.resolve_document(context).await?;
        let rules = document.get(flag_key).cloned().unwrap_or_default();
        Ok(evaluate_flag(flag_key, &rules, context))
    }

    /// Facade entry point 2: compile `flag_key`'s current rule list into a
    /// [`CompiledEvaluator`] for repeated evaluation against many contexts
    /// without re-fetching or re-validating per call.
    ///
    /// # Errors
    /// Returns an error if the document cannot be obtained, or if the
    /// flag's rules fail [`CompiledEvaluator::new`]'s structural
    /// validation (e.g. an out-of-range rollout threshold).
    pub async fn compiled_evaluator(&self, flag_key: &str, context: &serde_json::Value) -> Result<CompiledEvaluator, FlagError> {
        let document = self.resolve_document(context).await?;
        let rules = document.get(flag_key).cloned().unwrap_or_default();
        CompiledEvaluator::new(rules)
    }

    /// Facade entry point 3: evaluate every key in `flag_keys` against
    /// `context`, sharing a single document fetch.
    ///
    /// # Errors
    /// Returns an error only when no document could be obtained at all;
    /// individual flags absent from the document simply evaluate to "no
    /// matched rules", not an error.
    pub async fn evaluate_batch(
        &self,
        flag_keys: &[String],
        context: &serde_json::Value,
    ) -> Result<BTreeMap<String, EvaluationResult>, FlagError> {
        let document = self.resolve_document(context).await?;
        Ok(flag_keys
            .iter()
            .map(|key| {
                let rules = document.get(key).cloned().unwrap_or_default();
                (key.clone(), evaluate_flag(key, &rules, context))
            })
            .collect())
    }

    /// Obtain the current flag document for `context`, applying the cache's
    /// freshness policy:
    ///
    /// - Missing entry: fetch synchronously (deduped).
    /// - Fresh entry: serve as cached.
    /// - Stale entry with `stale_while_revalidate`: serve as cached, kick
    ///   off a background refresh.
    /// - Stale entry without `stale_while_revalidate`: refresh inline,
    ///   falling back to the stale value if the refresh fails.
    async fn resolve_document(&self, context: &serde_json::Value) -> Result<FlagDocument, FlagError> {
        let flat = flatten(context);
        let key = canonical_key(&self.api_base, &flat);
        let now = Utc::now();

        match self.cache.get(&key, now).map_err(Arc::new) {
            Ok(Some((entry, Freshness::Fresh))) => return parse_document(entry.flags),
            Ok(Some((entry, Freshness::Stale))) => {
                if self.cache.config().stale_while_revalidate {
                    self.spawn_background_refresh(key, flat);
                    return parse_document(entry.flags);
                }
                match self.fetch_and_cache(key.clone(), flat).await {
                    Ok(flags) => return parse_document(flags),
                    Err(e) => {
                        tracing::warn!(key, error = %e, "inline revalidation failed; serving stale document");
                        return parse_document(entry.flags);
                    }
                }
            }
            Ok(None) => {}
            Err(e) => return Err(arc_to_owned(e)),
        }

        match self.fetch_and_cache(key, flat).await {
            Ok(flags) => parse_document(flags),
            Err(e) => Err(arc_to_owned(e)),
        }
    }

    fn spawn_background_refresh(&self, key: String, flat: flagcore::FlatContext) {
        let client_delegate = Arc::clone(&self.delegate);
        let client_cache = Arc::clone(&self.cache);
        let api_base = self.api_base.clone();
        let timeout_ms = self.cache.config().timeout_ms;
        tokio::spawn(async move {
            let result = tokio::time::timeout(Duration::from_millis(timeout_ms), client_delegate.fetch(&api_base, &flat)).await;
            let now = Utc::now();
            match result {
                Ok(Ok(flags)) => {
                    if let Err(e) = client_cache.set(&key, flags, now) {
                        tracing::warn!(key, error = %e, "failed to persist background refresh");
                    }
                }
                Ok(Err(e)) => {
                    tracing::warn!(key, error = %e, "background refresh fetch failed");
                    let _ = client_cache.set_negative(&key, now);
                }
                Err(_) => {
                    tracing::warn!(key, timeout_ms, "background refresh timed out");
                    let _ = client_cache.set_negative(&key, now);
                }
            }
        });
    }

    async fn fetch_and_cache(&self, key: String, flat: flagcore::FlatContext) -> Result<serde_json::Value, Arc<FlagError>> {
        let flags = self.dedup_fetch(key.clone(), flat).await?;
        let now = Utc::now();
        if let Err(e) = self.cache.set(&key, flags.clone(), now) {
            tracing::warn!(key, error = %e, "failed to persist fetched document");
        }
        Ok(flags)
    }

    /// Collapse concurrent fetches for the same cache key into one
    /// in-flight request: the first caller drives the fetch, later callers
    /// await the same [`Shared`] future.
    async fn dedup_fetch(&self, key: String, flat: flagcore::FlatContext) -> Result<serde_json::Value, Arc<FlagError>> {
        let mut guard = self.in_flight.lock().await;
        if let Some(pending) = guard.get(&key) {
            let pending = pending.clone();
            drop(guard);
            return pending.await;
        }

        let delegate = Arc::clone(&self.delegate);
        let api_base = self.api_base.clone();
        let timeout_ms = self.cache.config().timeout_ms;
        let fetch_future: BoxFuture<'static, Result<serde_json::Value, Arc<FlagError>>> = async move {
            match tokio::time::timeout(Duration::from_millis(timeout_ms), delegate.fetch(&api_base, &flat)).await {
                Ok(Ok(flags)) => Ok(flags),
                Ok(Err(e)) => Err(Arc::new(e)),
                Err(_) => Err(Arc::new(
                    FlagError::new(ErrorCode::CacheFetchTimeout, format!("flag fetch exceeded {timeout_ms}ms")).with_context("timeout_ms", timeout_ms),
                )),
            }
        }
        .boxed();
        let shared = fetch_future.shared();
        guard.insert(key.clone(), shared.clone());
        drop(guard);

        let result = shared.await;
        self.in_flight.lock().await.remove(&key);
        result
    }
}

fn parse_document(value: serde_json::Value) -> Result<FlagDocument, FlagError> {
    if value.is_null() {
        return Ok(FlagDocument::new());
    }
    serde_json::from_value(value).map_err(|e| FlagError::new(ErrorCode::ConfigInvalid, "flag document does not match the expected shape").with_source(e))
}

fn arc_to_owned(e: Arc<FlagError>) -> FlagError {
    Arc::try_unwrap(e).unwrap_or_else(|shared| FlagError::new(shared.code, shared.message.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use flagcore_cache::InMemoryStorage;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingDelegate {
        calls: Arc<AtomicUsize>,
        document: serde_json::Value,
    }

    #[async_trait]
    impl FetchDelegate for CountingDelegate {
        async fn fetch(&self, _api_base: &str, _flat_context: &flagcore::FlatContext) -> Result<serde_json::Value, FlagError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(self.document.clone())
        }
    }

    fn document_with_one_flag() -> serde_json::Value {
        json!({
            "new-onboarding": [
                {"value": true, "filter": {"type": "constant", "value": true}}
            ]
        })
    }

    #[tokio::test]
    async fn evaluate_fetches_and_caches_on_a_cold_cache() {
        let calls = Arc::new(AtomicUsize::new(0));
        let delegate = CountingDelegate { calls: Arc::clone(&calls), document: document_with_one_flag() };
        let client = Client::new("https://api.example.com", delegate, InMemoryStorage::new(), CacheConfig::default());

        let result = client.evaluate("new-onboarding", &json!({})).await.unwrap();
        assert_eq!(result.value, Some(json!(true)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Second call within the stale TTL must not fetch again.
        client.evaluate("new-onboarding", &json!({})).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_evaluations_share_a_single_fetch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let delegate = CountingDelegate { calls: Arc::clone(&calls), document: document_with_one_flag() };
        let client = Arc::new(Client::new("https://api.example.com", delegate, InMemoryStorage::new(), CacheConfig::default()));

        let a = { let c = Arc::clone(&client); tokio::spawn(async move { c.evaluate("new-onboarding", &json!({})).await }) };
        let b = { let c = Arc::clone(&client); tokio::spawn(async move { c.evaluate("new-onboarding", &json!({})).await }) };
        let (ra, rb) = tokio::join!(a, b);
        ra.unwrap().unwrap();
        rb.unwrap().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn evaluate_batch_shares_one_document_fetch_across_flags() {
        let calls = Arc::new(AtomicUsize::new(0));
        let doc = json!({
            "flag-a": [{"value": "a", "filter": {"type": "constant", "value": true}}],
            "flag-b": [{"value": "b", "filter": {"type": "constant", "value": true}}],
        });
        let delegate = CountingDelegate { calls: Arc::clone(&calls), document: doc };
        let client = Client::new("https://api.example.com", delegate, InMemoryStorage::new(), CacheConfig::default());

        let results = client.evaluate_batch(&["flag-a".to_string(), "flag-b".to_string()], &json!({})).await.unwrap();
        assert_eq!(results["flag-a"].value, Some(json!("a")));
        assert_eq!(results["flag-b"].value, Some(json!("b")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn compiled_evaluator_rejects_invalid_rollout_thresholds() {
        let doc = json!({
            "bad-flag": [{"value": true, "filter": {"type": "rollout", "key": "bad-flag", "partial_rollout_attribute": "user.id", "partial_rollout_threshold": 200000}}]
        });
        let delegate = CountingDelegate { calls: Arc::new(AtomicUsize::new(0)), document: doc };
        let client = Client::new("https://api.example.com", delegate, InMemoryStorage::new(), CacheConfig::default());
        let err = client.compiled_evaluator("bad-flag", &json!({})).await.unwrap_err();
        assert_eq!(err.code, flagcore_error::ErrorCode::HashThresholdOutOfRange);
    }

    struct FailingDelegate;

    #[async_trait]
    impl FetchDelegate for FailingDelegate {
        async fn fetch(&self, _api_base: &str, _flat_context: &flagcore::FlatContext) -> Result<serde_json::Value, FlagError> {
            Err(FlagError::new(ErrorCode::CacheFetchFailed, "backend unreachable"))
        }
    }

    #[tokio::test]
    async fn evaluate_surfaces_an_error_on_a_cold_cache_with_a_failing_delegate() {
        let client = Client::new("https://api.example.com", FailingDelegate, InMemoryStorage::new(), CacheConfig::default());
        let err = client.evaluate("any-flag", &json!({})).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::CacheFetchFailed);
    }
}
