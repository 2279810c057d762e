//! Unified error taxonomy with stable error codes for the flag-evaluation core.
//!
//! Every `flagcore` error carries an [`ErrorCode`] (a machine-readable,
//! stable string tag), a human-readable message, an optional cause chain,
//! and arbitrary key-value context. Use the builder returned by
//! [`FlagError::new`] to construct errors fluently.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorCategory
// ---------------------------------------------------------------------------

/// Broad family that an [`ErrorCode`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Filter AST / rule document errors.
    Filter,
    /// Context flattening errors.
    Context,
    /// Rollout hashing errors.
    Hash,
    /// Flag cache errors (storage, staleness, dedup).
    Cache,
    /// Cache and client configuration errors.
    Config,
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Filter => "filter",
            Self::Context => "context",
            Self::Hash => "hash",
            Self::Cache => "cache",
            Self::Config => "config",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Machine-readable, stable error code.
///
/// Each variant serialises to a `SCREAMING_SNAKE_CASE` string that is
/// guaranteed not to change across patch releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // -- Filter --
    /// A rule list failed structural validation at evaluator construction.
    FilterInvalidRuleSet,
    /// A filter node has an unrecognised discriminant.
    FilterUnknownDiscriminant,

    // -- Context --
    /// Context nesting exceeded the recursion depth cap.
    ContextTooDeep,

    // -- Hash --
    /// Rollout hashing received a threshold outside `[0, 100000]`.
    HashThresholdOutOfRange,

    // -- Cache --
    /// The persisted cache blob could not be parsed.
    CacheBlobInvalid,
    /// A fetch exceeded its configured timeout.
    CacheFetchTimeout,
    /// A fetch failed for a reason other than timeout.
    CacheFetchFailed,

    // -- Config --
    /// A configuration file or value is invalid.
    ConfigInvalid,

    // -- Internal --
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl ErrorCode {
    /// Returns the broad [`ErrorCategory`] this code belongs to.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::FilterInvalidRuleSet | Self::FilterUnknownDiscriminant => ErrorCategory::Filter,
            Self::ContextTooDeep => ErrorCategory::Context,
            Self::HashThresholdOutOfRange => ErrorCategory::Hash,
            Self::CacheBlobInvalid | Self::CacheFetchTimeout | Self::CacheFetchFailed => {
                ErrorCategory::Cache
            }
            Self::ConfigInvalid => ErrorCategory::Config,
            Self::Internal => ErrorCategory::Internal,
        }
    }

    /// Stable `&'static str` representation of the code (e.g.
    /// `"FILTER_INVALID_RULE_SET"`).
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FilterInvalidRuleSet => "FILTER_INVALID_RULE_SET",
            Self::FilterUnknownDiscriminant => "FILTER_UNKNOWN_DISCRIMINANT",
            Self::ContextTooDeep => "CONTEXT_TOO_DEEP",
            Self::HashThresholdOutOfRange => "HASH_THRESHOLD_OUT_OF_RANGE",
            Self::CacheBlobInvalid => "CACHE_BLOB_INVALID",
            Self::CacheFetchTimeout => "CACHE_FETCH_TIMEOUT",
            Self::CacheFetchFailed => "CACHE_FETCH_FAILED",
            Self::ConfigInvalid => "CONFIG_INVALID",
            Self::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// FlagError
// ---------------------------------------------------------------------------

/// Unified flagcore error.
///
/// Carries a stable [`ErrorCode`], a human-readable message, an optional
/// source error for cause-chaining, and arbitrary structured context.
///
/// # Builder usage
///
/// ```
/// use flagcore_error::{FlagError, ErrorCode};
///
/// let err = FlagError::new(ErrorCode::CacheFetchTimeout, "timed out after 5000ms")
///     .with_context("timeout_ms", 5000)
///     .with_context("cache_key", "https://api.example.com&company.id=c1");
/// ```
pub struct FlagError {
    /// Machine-readable error code.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Optional underlying cause.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    /// Arbitrary structured context for diagnostics.
    pub context: BTreeMap<String, serde_json::Value>,
}

impl FlagError {
    /// Create a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
            context: BTreeMap::new(),
        }
    }

    /// Attach a key-value pair to the diagnostic context.
    ///
    /// The value is converted via [`serde_json::to_value`]; if serialisation
    /// fails, the entry is silently skipped.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Attach an underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Shorthand for `self.code.category()`.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }
}

impl fmt::Debug for FlagError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("FlagError");
        d.field("code", &self.code);
        d.field("message", &self.message);
        if let Some(ref src) = self.source {
            d.field("source", &src.to_string());
        }
        if !self.context.is_empty() {
            d.field("context", &self.context);
        }
        d.finish()
    }
}

impl fmt::Display for FlagError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)?;
        if !self.context.is_empty() {
            // Deterministic output thanks to BTreeMap.
            if let Ok(ctx) = serde_json::to_string(&self.context) {
                write!(f, " {ctx}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for FlagError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
