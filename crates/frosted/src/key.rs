//! Derived cache keys for blurred images.
//!
//! Callers identify a request with their own logical key (typically the
//! key of the unblurred source in an image cache). The blurred variant
//! is stored and coalesced under a key derived from it with a fixed-key
//! 128-bit `SipHash-1-3`, so the blurred entry never shadows the source
//! entry in a shared cache and the derivation is stable across runs.

use std::fmt;
use std::hash::Hasher;

use serde::{Deserialize, Serialize};
use siphasher::sip128::{Hasher128, SipHasher13};

/// Key a blurred result is coalesced and cached under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlurKey(String);

impl BlurKey {
    /// Derive the blur key for a caller-supplied cache key.
    #[must_use]
    pub fn derive(cache_key: &str) -> Self {
        let mut hasher = SipHasher13::new();
        hasher.write(cache_key.as_bytes());
        Self(format!("{:032x}", hasher.finish128().as_u128()))
    }

    /// The key as a string, suitable for cache lookups and file names.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlurKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for BlurKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
