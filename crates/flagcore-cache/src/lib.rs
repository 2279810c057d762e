//! flagcore-cache
#![cfg_attr(not(test), deny(unsafe_code))]
#![warn(missing_docs)]
//!
//! Local persistence for a fetched flag document: staleness and expiry
//! timestamps, negative-result backoff, and a pluggable storage backend.
//! This crate does not fetch anything itself — see `flagcore-client` for
//! the network orchestration that decides *when* to call this cache and
//! what to do with a stale or missing entry.

pub mod config;
pub mod key;
pub mod storage;

pub use config::CacheConfig;
pub use key::canonical_key;
pub use storage::{FileStorage, InMemoryStorage, Storage};

use chrono::{DateTime, Utc};
use flagcore_error::{ErrorCode, FlagError};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A cached flag document plus the bookkeeping needed to decide whether it
/// can still be served.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CacheEntry {
    /// Whether this entry resulted from a successful fetch. A `false`
    /// entry is a cached failure, kept so repeated failures can back off
    /// rather than retry-storm the backend.
    pub success: bool,
    /// The flag document payload. For a negative entry, this is whatever
    /// was last successfully fetched (or `Value::Null` if nothing ever
    /// was), so a client backing off can still serve a stale-but-known
    /// value rather than nothing.
    pub flags: serde_json::Value,
    /// Timestamp after which the entry is considered stale (still usable,
    /// but should trigger a background or inline revalidation).
    ///
    /// Schema'd as an RFC 3339 string (its serialized form) rather than
    /// pulling in a chrono-schema integration feature for one field.
    #[schemars(with = "String")]
    pub stale_at: DateTime<Utc>,
    /// Timestamp after which the entry is no longer served at all.
    #[schemars(with = "String")]
    pub expire_at: DateTime<Utc>,
    /// Number of consecutive failed fetches this entry represents. Reset
    /// to zero on a successful fetch.
    pub attempt_count: u32,
}

/// How fresh a looked-up [`CacheEntry`] is, relative to "now".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Within the stale TTL; serve as-is.
    Fresh,
    /// Past the stale TTL but within the expire TTL; serve, but
    /// revalidate (per [`config::CacheConfig::strategy`]).
    Stale,
}

/// The persisted shape: a single mapping from cache-key to entry, matching
/// the "one blob, whole-file overwrite" persistence model every backend
/// implements (see [`Storage`]).
type Blob = BTreeMap<String, CacheEntry>;

/// The flag document cache: one [`Storage`] backend plus [`CacheConfig`]
/// timing policy.
///
/// Every operation round-trips the *entire* blob — load, mutate one key (or
/// none, for a read), garbage-collect expired entries, write back — rather
/// than addressing the backend by key. This keeps every backend's contract
/// down to the three storage-agnostic primitives in [`Storage`] and matches
/// the "whole-blob replacement" concurrency model: a reader never observes
/// a write to a different key mid-flight, only a fully-replaced blob or the
/// previous one.
pub struct Cache<S: Storage> {
    storage: S,
    config: CacheConfig,
}

impl<S: Storage> Cache<S> {
    /// Wrap `storage` with `config`'s timing policy.
    pub fn new(storage: S, config: CacheConfig) -> Self {
        Self { storage, config }
    }

    /// Look up `key`, returning the entry and its freshness if a
    /// non-expired entry exists.
    ///
    /// A malformed stored blob, or a malformed individual entry within an
    /// otherwise valid blob, is treated the same as a miss — logged and
    /// discarded, not surfaced as an error, since a corrupt cache must
    /// never block evaluation.
    ///
    /// # Errors
    /// Returns an error only if the storage backend itself fails (not for
    /// a missing or malformed entry).
    pub fn get(&self, key: &str, now: DateTime<Utc>) -> Result<Option<(CacheEntry, Freshness)>, FlagError> {
        let blob = self.load_blob()?;
        let Some(entry) = blob.get(key) else {
            return Ok(None);
        };
        if now >= entry.expire_at {
            return Ok(None);
        }
        let freshness = if now >= entry.stale_at { Freshness::Stale } else { Freshness::Fresh };
        Ok(Some((entry.clone(), freshness)))
    }

    /// Record a successful fetch, resetting the negative-attempt backoff
    /// for `key`, then garbage-collect every entry (including others)
    /// whose `expire_at` has already passed.
    ///
    /// # Errors
    /// Returns an error if the storage backend fails to load or persist
    /// the blob.
    pub fn set(&self, key: &str, flags: serde_json::Value, now: DateTime<Utc>) -> Result<(), FlagError> {
        let mut blob = self.load_blob()?;
        blob.retain(|_, e| e.expire_at > now);
        blob.insert(
            key.to_string(),
            CacheEntry {
                success: true,
                flags,
                stale_at: now + chrono::Duration::seconds(self.config.stale_ttl_secs as i64),
                expire_at: now + chrono::Duration::seconds(self.config.expire_ttl_secs as i64),
                attempt_count: 0,
            },
        );
        self.store_blob(&blob)
    }

    /// Record a failed fetch for `key`, then garbage-collect expired
    /// entries the same way [`Cache::set`] does.
    ///
    /// The previous entry's `flags` (if any) are preserved so a backed-off
    /// client can still serve the last known-good document. Staleness is
    /// pushed out by `stale_ttl_secs * min(attempt_count, limit)`, capped at
    /// `expire_ttl_secs`, unless `cache_negative_attempts` is
    /// [`config::NegativeAttemptsLimit::disabled`], in which case the entry
    /// is immediately stale and the very next read triggers a fresh fetch
    /// attempt regardless of how many times in a row this key has failed.
    ///
    /// # Errors
    /// Returns an error if the storage backend fails to load or persist
    /// the blob.
    pub fn set_negative(&self, key: &str, now: DateTime<Utc>) -> Result<(), FlagError> {
        let mut blob = self.load_blob()?;
        let previous = blob.get(key).filter(|e| e.expire_at > now).cloned();
        let attempt_count = previous.as_ref().map_or(1, |e| e.attempt_count + 1);
        let flags = previous.map_or(serde_json::Value::Null, |e| e.flags);
        let backoff_secs = match self.config.cache_negative_attempts.as_option() {
            Some(limit) => {
                let backoff_attempts = attempt_count.min(limit);
                self.config.stale_ttl_secs.saturating_mul(u64::from(backoff_attempts)).min(self.config.expire_ttl_secs)
            }
            None => 0,
        };
        blob.retain(|_, e| e.expire_at > now);
        blob.insert(
            key.to_string(),
            CacheEntry {
                success: false,
                flags,
                stale_at: now + chrono::Duration::seconds(backoff_secs as i64),
                expire_at: now + chrono::Duration::seconds(self.config.expire_ttl_secs as i64),
                attempt_count,
            },
        );
        self.store_blob(&blob)
    }

    /// Wipe the entire cache, every key at once. There is no per-key clear
    /// — a backend's storage slot holds a single blob, so clearing it
    /// clears everything this cache instance knows about.
    ///
    /// # Errors
    /// Returns an error if the storage backend fails to clear the blob.
    pub fn clear(&self) -> Result<(), FlagError> {
        self.storage.clear_raw()
    }

    /// The timing policy this cache was constructed with.
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Load the blob, tolerating a malformed whole blob or individual
    /// malformed entries within it by discarding what can't be parsed.
    fn load_blob(&self) -> Result<Blob, FlagError> {
        let Some(raw) = self.storage.load_raw()? else {
            return Ok(Blob::new());
        };
        let Ok(serde_json::Value::Object(entries)) = serde_json::from_str::<serde_json::Value>(&raw) else {
            tracing::warn!("discarding malformed cache blob");
            return Ok(Blob::new());
        };
        let mut blob = Blob::new();
        for (key, value) in entries {
            match serde_json::from_value::<CacheEntry>(value) {
                Ok(entry) => {
                    blob.insert(key, entry);
                }
                Err(e) => tracing::warn!(key, error = %e, "discarding malformed cache entry"),
            }
        }
        Ok(blob)
    }

    fn store_blob(&self, blob: &Blob) -> Result<(), FlagError> {
        let raw = serde_json::to_string(blob)
            .map_err(|e| FlagError::new(ErrorCode::CacheBlobInvalid, "failed to serialize cache blob").with_source(e))?;
        self.storage.store_raw(&raw)
    }
}
