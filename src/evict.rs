//! Best-effort enforcement of the aggregate size budget, and the cache
//! directory walk shared with the whole-cache admin operations.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::Path;
use std::time::SystemTime;

use crate::cache::{delete_entry, Cache};
use crate::entry::EntryPaths;
use crate::error::CacheError;

const SUFFIXES: [&str; 4] = [".data", ".meta", ".used", ".next"];

/// An entry that currently holds published content.
struct Candidate {
    entry: EntryPaths,
    size: u64,
    last_used: SystemTime,
}

/// Enforces the size budget after `installed` new bytes were published.
///
/// Best effort by contract: still-open handles, in-flight staging files
/// and metadata files are not accounted for, and per-victim failures are
/// logged and skipped. Victims are removed in order of oldest last use,
/// each under its meta lock, which serializes eviction against concurrent
/// refreshes of the same entry.
pub(crate) fn enforce_max_data(cache: &Cache, installed: u64) {
    let max_data = cache.max_data();
    if max_data == 0 {
        return;
    }

    let mut candidates = match collect(cache.dir()) {
        Ok(candidates) => candidates,
        Err(err) => {
            let error: &dyn std::error::Error = &err;
            tracing::warn!(error, "walking cache directory for eviction failed");
            return;
        }
    };

    let mut total: u64 = candidates.iter().map(|candidate| candidate.size).sum();
    if total <= max_data {
        return;
    }
    tracing::debug!(total, max_data, installed, "cache over size budget, evicting");

    candidates.sort_by_key(|candidate| candidate.last_used);
    for victim in candidates {
        if total <= max_data {
            break;
        }
        match delete_entry(&victim.entry) {
            Ok(()) => {
                tracing::debug!(size = victim.size, "evicted cache entry");
                total -= victim.size;
            }
            Err(err) => {
                let error: &dyn std::error::Error = &err;
                tracing::warn!(error, "failed to evict cache entry");
            }
        }
    }
}

/// Discovers every entry group under the cache root.
pub(crate) fn entries(root: &Path) -> Result<Vec<EntryPaths>, CacheError> {
    walk(root).map_err(CacheError::Walk)
}

fn walk(root: &Path) -> io::Result<Vec<EntryPaths>> {
    let mut prefixes = BTreeSet::new();
    for bucket in fs::read_dir(root)? {
        let bucket = bucket?.path();
        if !is_bucket(&bucket) {
            continue;
        }
        for file in fs::read_dir(&bucket)? {
            let name = file?.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(base) = SUFFIXES.iter().find_map(|suffix| name.strip_suffix(suffix)) {
                prefixes.insert(bucket.join(base));
            }
        }
    }
    Ok(prefixes.into_iter().map(EntryPaths::new).collect())
}

/// Bucket directories are named by the first three hex digits of the path
/// digest; anything else under the root is not ours to touch.
fn is_bucket(path: &Path) -> bool {
    path.is_dir()
        && path
            .file_name()
            .and_then(|name| name.to_str())
            .map_or(false, |name| {
                name.len() == 3 && name.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
            })
}

fn collect(root: &Path) -> io::Result<Vec<Candidate>> {
    let mut candidates = Vec::new();
    for entry in walk(root)? {
        let Ok(data) = fs::metadata(entry.data()) else {
            continue;
        };
        // Entries that were published but never opened fall back to the
        // data file's own mtime for LRU ordering.
        let last_used = fs::metadata(entry.used())
            .and_then(|stat| stat.modified())
            .or_else(|_| data.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        candidates.push(Candidate {
            size: data.len(),
            last_used,
            entry,
        });
    }
    Ok(candidates)
}
