use std::time::Duration;

use serde::Deserialize;

/// Tuning knobs applied when constructing a [`Cache`](crate::Cache).
///
/// Both knobs can also be adjusted at runtime through
/// [`Cache::set_expiration`](crate::Cache::set_expiration) and
/// [`Cache::set_max_data`](crate::Cache::set_max_data).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Duration after which a cached copy is considered expired and must
    /// be revalidated or refetched before use.
    ///
    /// `None` (the default) means cached copies never expire.
    #[serde(with = "humantime_serde")]
    pub expiration: Option<Duration>,

    /// Maximum bytes of cached content to keep on disk.
    ///
    /// Enforced best effort after each new download by evicting the least
    /// recently used entries. Zero (the default) means unbounded.
    pub max_data: u64,
}
