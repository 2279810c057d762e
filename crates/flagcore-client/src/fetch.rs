//! The sole network collaborator boundary.
//!
//! `flagcore-client` never makes an HTTP request itself — it asks a
//! caller-supplied [`FetchDelegate`] for the current flag document and
//! treats the result as opaque JSON. Embedders bring their own transport
//! (reqwest, an internal gRPC gateway, a local file watcher for tests).

use async_trait::async_trait;
use flagcore::FlatContext;
use flagcore_error::FlagError;

/// Fetches the current flag document for an evaluation context.
///
/// Implementations are expected to set the `User-Agent` header (or
/// equivalent) to [`crate::version::user_agent`], but this crate does not
/// enforce it.
#[async_trait]
pub trait FetchDelegate: Send + Sync {
    /// Fetch the flag document for `api_base`, given the flattened
    /// context that will be evaluated against it (some backends scope the
    /// document to the requesting entity).
    ///
    /// # Errors
    /// Returns an error for any transport or backend failure. Timeout
    /// enforcement is the caller's responsibility (`flagcore-client`
    /// wraps every call in [`tokio::time::timeout`]), not the delegate's.
    async fn fetch(&self, api_base: &str, flat_context: &FlatContext) -> Result<serde_json::Value, FlagError>;
}
