//! Persistent on-disk read-through cache for an immutable remote file
//! tree.
//!
//! A [`Cache`] manages a local directory holding cached copies of remote
//! files obtained through a [`Loader`], the pluggable boundary that reads
//! remote content and checks whether a cached copy is still valid.
//!
//! Opening a path first probes the local directory. A copy is considered
//! valid for a configurable duration after it was fetched or revalidated;
//! within that window the cache serves it directly, without consulting
//! the loader. Once the window has passed the copy is kept but treated as
//! expired, and the next open asks the loader to either confirm it
//! (conditional revalidation via an opaque token, typically an entity
//! tag) or replace it. Expiration is checked only at open time, never
//! during reads, and load failures are never cached.
//!
//! A cache may be used by many threads at once, and several caches — even
//! in separate processes — may share one directory as long as they use
//! the same loader. A shared directory should be on local disk: the
//! coordination relies on advisory file locks, which are almost always
//! broken over network file systems.
//!
//! # On-disk format
//!
//! Cooperating implementations must agree on this layout and nothing
//! else. Each cached path is stored under a name derived from the SHA-1
//! digest of its cleaned form. The first three hex digits name a
//! subdirectory of the cache root, the remaining thirty-seven the base of
//! a file group inside it:
//!
//! ```text
//! 123/4567890123456789012345678901234567890.data
//! 123/4567890123456789012345678901234567890.meta
//! 123/4567890123456789012345678901234567890.used
//! 123/4567890123456789012345678901234567890.next
//! ```
//!
//! `.data` is the cached content — when present, always a whole copy.
//! `.meta` holds the JSON metadata record; its modification time is when
//! the content was last fetched or revalidated, and governs expiration.
//! As a special case, a `.meta` modification time of the Unix epoch marks
//! the entry as expired even when no expiration period is configured.
//! `.used` holds a single newline and is rewritten on every open, so its
//! modification time is the entry's last use. `.next` stages a download
//! in progress; completed downloads are renamed onto `.data`, which never
//! overwrites content that other readers may still have open.
//!
//! A refresh — initial download, revalidation, or replacement — requires
//! an exclusive advisory lock on the `.meta` file, making it the
//! per-entry mutex across processes. After installing a new `.data` file
//! the cache re-checks the configured size budget and evicts the least
//! recently used entries (by `.used` time) until the data files fit
//! again, taking each victim's `.meta` lock before removing its files.

mod cache;
mod config;
mod entry;
mod error;
mod evict;
mod loader;
mod meta;

pub use crate::cache::Cache;
pub use crate::config::CacheConfig;
pub use crate::error::{CacheError, LoadError};
pub use crate::loader::{LoadOutcome, Loader};
