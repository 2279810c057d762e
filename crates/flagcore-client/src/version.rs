//! Client identification sent to the flag backend.

/// This crate's version, taken from `Cargo.toml` at compile time.
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// The `User-Agent`-style identifier a [`crate::FetchDelegate`]
/// implementation should attach to outgoing requests.
#[must_use]
pub fn user_agent() -> String {
    format!("flagcore-rust/{SDK_VERSION}")
}
