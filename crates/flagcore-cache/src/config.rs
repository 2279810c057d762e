//! Cache configuration: TOML file plus environment overrides.
//!
//! Mirrors the layering every deployment of this stack already uses
//! elsewhere — a checked-in TOML default, overridden at the process
//! boundary by `FLAGCORE_CACHE_*` environment variables.

use flagcore_error::{ErrorCode, FlagError};
use serde::de::{Error as DeError, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::Path;

/// The configurable limit on how many consecutive cached failures are
/// allowed to back off re-fetching, or `disabled` to always allow a fresh
/// fetch regardless of how many times in a row the backend has failed.
///
/// Mirrors the spec's `cacheNegativeAttempts: 3 | false` shape: a plain
/// integer limits backoff to that many attempts, `false` disables the
/// backoff window entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegativeAttemptsLimit(Option<u32>);

impl NegativeAttemptsLimit {
    /// A limit of `n` consecutive failed attempts before backoff stops
    /// growing.
    #[must_use]
    pub fn limited(n: u32) -> Self {
        Self(Some(n))
    }

    /// No backoff window at all: every call is free to re-fetch regardless
    /// of how many consecutive failures preceded it.
    #[must_use]
    pub fn disabled() -> Self {
        Self(None)
    }

    /// `Some(limit)` if bounded, `None` if disabled.
    #[must_use]
    pub fn as_option(self) -> Option<u32> {
        self.0
    }
}

impl Default for NegativeAttemptsLimit {
    fn default() -> Self {
        Self::limited(3)
    }
}

impl Serialize for NegativeAttemptsLimit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            Some(n) => serializer.serialize_u32(n),
            None => serializer.serialize_bool(false),
        }
    }
}

impl<'de> Deserialize<'de> for NegativeAttemptsLimit {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct LimitVisitor;

        impl Visitor<'_> for LimitVisitor {
            type Value = NegativeAttemptsLimit;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a non-negative integer, or `false` to disable")
            }

            fn visit_bool<E: DeError>(self, v: bool) -> Result<Self::Value, E> {
                if v {
                    Err(E::custom("cache_negative_attempts must be a number or `false`, not `true`"))
                } else {
                    Ok(NegativeAttemptsLimit::disabled())
                }
            }

            fn visit_u64<E: DeError>(self, v: u64) -> Result<Self::Value, E> {
                Ok(NegativeAttemptsLimit::limited(u32::try_from(v).unwrap_or(u32::MAX)))
            }

            fn visit_i64<E: DeError>(self, v: i64) -> Result<Self::Value, E> {
                if v < 0 {
                    Err(E::custom("cache_negative_attempts must not be negative"))
                } else {
                    Ok(NegativeAttemptsLimit::limited(u32::try_from(v).unwrap_or(u32::MAX)))
                }
            }
        }

        deserializer.deserialize_any(LimitVisitor)
    }
}

/// When the cache revalidates a stale-but-present entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStrategy {
    /// A background task refreshes entries on a fixed interval.
    Periodic,
    /// Revalidation is triggered inline by the request that finds a stale
    /// entry (stale-while-revalidate).
    InRequest,
}

/// Cache timing and backoff configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Seconds an entry is served without triggering revalidation.
    pub stale_ttl_secs: u64,
    /// Seconds after which an entry is no longer served at all.
    pub expire_ttl_secs: u64,
    /// Consecutive failed fetches before backing off negative results
    /// further (`stale_ttl` is multiplied by the attempt count, capped at
    /// `expire_ttl_secs`), or disabled entirely.
    pub cache_negative_attempts: NegativeAttemptsLimit,
    /// Per-fetch timeout in milliseconds, enforced by `flagcore-client`.
    pub timeout_ms: u64,
    /// Whether a stale entry is served immediately while a refresh runs in
    /// the background, versus blocking the caller on the refresh.
    pub stale_while_revalidate: bool,
    /// Revalidation strategy.
    pub strategy: CacheStrategy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            stale_ttl_secs: 60,
            expire_ttl_secs: 604_800,
            cache_negative_attempts: NegativeAttemptsLimit::default(),
            timeout_ms: 5_000,
            stale_while_revalidate: true,
            strategy: CacheStrategy::Periodic,
        }
    }
}

/// Advisory issues found while validating a [`CacheConfig`] that don't
/// prevent it from being used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheConfigWarning {
    /// `stale_ttl_secs` is larger than `expire_ttl_secs`, so entries would
    /// never be considered merely stale — they'd always already be expired.
    StaleTtlExceedsExpireTtl {
        /// Configured stale TTL.
        stale_ttl_secs: u64,
        /// Configured expire TTL.
        expire_ttl_secs: u64,
    },
    /// `timeout_ms` is unusually large for a flag fetch.
    LargeTimeout {
        /// Configured timeout in milliseconds.
        timeout_ms: u64,
    },
}

impl std::fmt::Display for CacheConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StaleTtlExceedsExpireTtl { stale_ttl_secs, expire_ttl_secs } => write!(
                f,
                "stale_ttl_secs ({stale_ttl_secs}) exceeds expire_ttl_secs ({expire_ttl_secs}); entries will never be merely stale"
            ),
            Self::LargeTimeout { timeout_ms } => {
                write!(f, "timeout_ms ({timeout_ms}) is unusually large for a flag fetch")
            }
        }
    }
}

const LARGE_TIMEOUT_THRESHOLD_MS: u64 = 30_000;

/// Load a [`CacheConfig`] from an optional TOML file, then apply
/// `FLAGCORE_CACHE_*` environment overrides.
///
/// # Errors
/// Returns an error if `path` is given but unreadable, or the file content
/// is not valid TOML for this shape.
pub fn load_config(path: Option<&Path>) -> Result<CacheConfig, FlagError> {
    let mut config = match path {
        Some(p) => {
            let content = std::fs::read_to_string(p).map_err(|e| {
                FlagError::new(ErrorCode::ConfigInvalid, format!("read cache config {}", p.display())).with_source(e)
            })?;
            parse_toml(&content)?
        }
        None => CacheConfig::default(),
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Parse a `CacheConfig` from a TOML document.
///
/// # Errors
/// Returns an error if the document does not parse as valid TOML for this
/// shape.
pub fn parse_toml(content: &str) -> Result<CacheConfig, FlagError> {
    toml::from_str(content)
        .map_err(|e| FlagError::new(ErrorCode::ConfigInvalid, "failed to parse cache config").with_source(e))
}

/// Apply `FLAGCORE_CACHE_*` environment variable overrides in place.
pub fn apply_env_overrides(config: &mut CacheConfig) {
    if let Ok(val) = std::env::var("FLAGCORE_CACHE_STALE_TTL_SECS") {
        if let Ok(parsed) = val.parse() {
            config.stale_ttl_secs = parsed;
        }
    }
    if let Ok(val) = std::env::var("FLAGCORE_CACHE_EXPIRE_TTL_SECS") {
        if let Ok(parsed) = val.parse() {
            config.expire_ttl_secs = parsed;
        }
    }
    if let Ok(val) = std::env::var("FLAGCORE_CACHE_NEGATIVE_ATTEMPTS") {
        if val == "false" {
            config.cache_negative_attempts = NegativeAttemptsLimit::disabled();
        } else if let Ok(parsed) = val.parse() {
            config.cache_negative_attempts = NegativeAttemptsLimit::limited(parsed);
        }
    }
    if let Ok(val) = std::env::var("FLAGCORE_CACHE_TIMEOUT_MS") {
        if let Ok(parsed) = val.parse() {
            config.timeout_ms = parsed;
        }
    }
    if let Ok(val) = std::env::var("FLAGCORE_CACHE_STALE_WHILE_REVALIDATE") {
        config.stale_while_revalidate = val == "true" || val == "1";
    }
    if let Ok(val) = std::env::var("FLAGCORE_CACHE_STRATEGY") {
        match val.as_str() {
            "periodic" => config.strategy = CacheStrategy::Periodic,
            "in_request" => config.strategy = CacheStrategy::InRequest,
            _ => {}
        }
    }
}

/// Validate `config`, returning advisory warnings. Unlike [`load_config`],
/// nothing here is a hard error — an unusual configuration is still a
/// usable one.
#[must_use]
pub fn validate_config(config: &CacheConfig) -> Vec<CacheConfigWarning> {
    let mut warnings = Vec::new();
    if config.stale_ttl_secs > config.expire_ttl_secs {
        warnings.push(CacheConfigWarning::StaleTtlExceedsExpireTtl {
            stale_ttl_secs: config.stale_ttl_secs,
            expire_ttl_secs: config.expire_ttl_secs,
        });
    }
    if config.timeout_ms > LARGE_TIMEOUT_THRESHOLD_MS {
        warnings.push(CacheConfigWarning::LargeTimeout { timeout_ms: config.timeout_ms });
    }
    warnings
}
