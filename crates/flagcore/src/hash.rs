//! Deterministic percentage-rollout hashing.
//!
//! Maps an arbitrary string to an integer in `[0, 100_000)`. This is the
//! only place `flagcore` touches cryptography, and it is load-bearing:
//! every SDK in every language must reproduce the exact same bucket for
//! the exact same string, forever. Do not change the byte order, the
//! mask, or the scaling arithmetic without a migration plan — it would
//! silently re-bucket every customer's percentage rollouts.

use sha2::{Digest, Sha256};

/// Low 20 bits of the first four hash bytes, scaled into `[0, 100_000)`.
const MASK: u32 = 0xF_FFFF;
/// Width of the rollout bucket space.
const BUCKET_SPACE: f64 = 100_000.0;

/// Map `s` to a deterministic integer in `[0, 100_000)`.
///
/// 1. Compute SHA-256 of the UTF-8 bytes of `s`.
/// 2. Read the first four bytes as a little-endian `u32`.
/// 3. Mask to the low 20 bits.
/// 4. Scale: `floor(masked / 0xFFFFF * 100_000)`.
///
/// The scaling is deliberately done in `f64` to match the floating-point
/// arithmetic every other SDK in this family uses; an integer-only
/// reimplementation (e.g. `masked * 100_000 / 0xFFFFF`) rounds differently
/// at the edges and would desynchronize rollout buckets across languages.
#[must_use]
pub fn hash_int(s: &str) -> u32 {
    let digest = Sha256::digest(s.as_bytes());
    let first_four: [u8; 4] = [digest[0], digest[1], digest[2], digest[3]];
    let raw = u32::from_le_bytes(first_four);
    let masked = raw & MASK;
    ((f64::from(masked) / f64::from(MASK)) * BUCKET_SPACE).floor() as u32
}
