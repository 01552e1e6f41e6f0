//! The cache itself: the per-entry open state machine and admin operations.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read as _};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use filetime::FileTime;

use crate::config::CacheConfig;
use crate::entry::{locate, EntryPaths, MetaLock};
use crate::error::CacheError;
use crate::evict;
use crate::loader::{LoadOutcome, Loader};
use crate::meta::Metadata;

/// Read-only access to a remote file tree, caching opened files on local
/// disk.
///
/// A cache may be used by multiple threads simultaneously. Multiple
/// caches, even in separate processes, may share a single directory,
/// provided they use the same loader. If a directory is shared by
/// concurrently executing programs it should be on local disk, because
/// advisory file locking over network file systems is almost always
/// broken.
pub struct Cache {
    dir: PathBuf,
    loader: Box<dyn Loader>,
    /// Expiration in nanoseconds. Zero means cached copies never expire.
    expiration: AtomicU64,
    /// Size budget in bytes. Zero means unbounded.
    max_data: AtomicU64,
}

impl Cache {
    /// Opens or creates the cache directory `dir`, reading remote files
    /// through `loader`.
    pub fn new(dir: impl Into<PathBuf>, loader: impl Loader + 'static) -> Result<Cache, CacheError> {
        Cache::with_config(dir, loader, CacheConfig::default())
    }

    /// Like [`Cache::new`], with tuning knobs applied up front.
    pub fn with_config(
        dir: impl Into<PathBuf>,
        loader: impl Loader + 'static,
        config: CacheConfig,
    ) -> Result<Cache, CacheError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(CacheError::CreateDir)?;

        let cache = Cache {
            dir,
            loader: Box::new(loader),
            expiration: AtomicU64::new(0),
            max_data: AtomicU64::new(0),
        };
        cache.set_expiration(config.expiration.unwrap_or(Duration::ZERO));
        cache.set_max_data(config.max_data);
        Ok(cache)
    }

    /// Sets the duration after which a cached copy is considered expired.
    ///
    /// A zero duration (the default) means cached copies never expire.
    pub fn set_expiration(&self, expiration: Duration) {
        let nanos = u64::try_from(expiration.as_nanos()).unwrap_or(u64::MAX);
        self.expiration.store(nanos, Ordering::Relaxed);
    }

    /// Sets the maximum bytes of cached content to keep on disk, enforced
    /// best effort: the limit applies neither to old copies that are still
    /// open, nor to downloads in progress, nor to cache metadata.
    ///
    /// Zero (the default) means unbounded.
    pub fn set_max_data(&self, max_data: u64) {
        self.max_data.store(max_data, Ordering::Relaxed);
    }

    fn expiration(&self) -> Option<Duration> {
        match self.expiration.load(Ordering::Relaxed) {
            0 => None,
            nanos => Some(Duration::from_nanos(nanos)),
        }
    }

    pub(crate) fn max_data(&self) -> u64 {
        self.max_data.load(Ordering::Relaxed)
    }

    pub(crate) fn dir(&self) -> &Path {
        &self.dir
    }

    /// Whether a `.meta` modification time still vouches for the entry.
    ///
    /// An mtime of the Unix epoch marks the entry as forced expired, even
    /// when no expiration is configured.
    fn is_fresh(&self, meta_mtime: SystemTime) -> bool {
        if meta_mtime == SystemTime::UNIX_EPOCH {
            return false;
        }
        match self.expiration() {
            None => true,
            Some(expiration) => meta_mtime
                .checked_add(expiration)
                .map_or(true, |deadline| SystemTime::now() < deadline),
        }
    }

    /// Opens the file with the given path, fetching or revalidating it
    /// through the loader if the cached copy is missing or expired.
    ///
    /// The returned handle is a point-in-time snapshot: concurrent
    /// refreshes and evictions never disturb it. The caller owns the
    /// handle and is responsible for closing it.
    ///
    /// The elements of `path` are separated by slash ('/') characters,
    /// regardless of host operating system convention.
    pub fn open(&self, path: &str) -> Result<File, CacheError> {
        let (cleaned, entry) = locate(&self.dir, path);

        // Fast path, no lock: fresh metadata and a data file that opens.
        if let Some(mtime) = meta_mtime(&entry) {
            if self.is_fresh(mtime) {
                if let Ok(data) = File::open(entry.data()) {
                    touch_used(&entry);
                    return Ok(data);
                }
            }
        }

        self.open_slow(cleaned, &entry)
    }

    /// The locked path: revalidate or refetch, then publish.
    fn open_slow(&self, cleaned: String, entry: &EntryPaths) -> Result<File, CacheError> {
        // Lock the metadata file, creating it first if it does not exist
        // yet. Acquire itself never creates.
        let lock = match MetaLock::acquire(entry) {
            Ok(lock) => lock,
            Err(_) => {
                match OpenOptions::new().write(true).create_new(true).open(entry.meta()) {
                    Ok(_) => {}
                    // A racing peer created it just now; lock that one.
                    Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {}
                    Err(err) => return Err(CacheError::CreateMetadata(err)),
                }
                MetaLock::acquire(entry).map_err(CacheError::LockMetadata)?
            }
        };

        // Re-check under the lock: a peer may have refreshed the entry
        // while we waited, and nothing changes underfoot now.
        let mtime = lock
            .file()
            .metadata()
            .and_then(|stat| stat.modified())
            .map_err(CacheError::StatMetadata)?;
        let data_exists = match File::open(entry.data()) {
            Ok(data) => {
                if self.is_fresh(mtime) {
                    touch_used(entry);
                    return Ok(data);
                }
                true
            }
            Err(_) => false,
        };

        let mut meta = Metadata::read(lock.file())?;
        if !data_exists {
            // A token without data cannot be validated; drop both so the
            // loader fetches unconditionally.
            let _ = fs::remove_file(entry.data());
            meta.load_token.clear();
        }

        // Refresh through the loader, staging any download in `.next`.
        let mut next = create_staging(entry)?;
        tracing::trace!(
            path = cleaned.as_str(),
            revalidate = !meta.load_token.is_empty(),
            "refreshing cache entry"
        );
        let outcome = match self.loader.load(&cleaned, &mut next, &meta.load_token) {
            Ok(outcome) => outcome,
            Err(err) => {
                drop(next);
                let _ = fs::remove_file(entry.next());
                return Err(err.into());
            }
        };

        let now = SystemTime::now();
        meta.refresh_time = Some(now);
        let mut installed = 0;
        match outcome {
            LoadOutcome::Valid { token } => {
                drop(next);
                let _ = fs::remove_file(entry.next());
                meta.load_token = token;
            }
            LoadOutcome::Fetched { token } => {
                meta.create_time = Some(now);
                let size = next.metadata().map_err(CacheError::WriteData)?.len();
                drop(next);
                // Same-directory rename publishes the new content
                // atomically; readers never see a torn file.
                fs::rename(entry.next(), entry.data()).map_err(CacheError::InstallData)?;
                installed = size;
                meta.load_token = token;
            }
        }
        meta.path = cleaned;

        // The whole-file write both truncates a shorter record and
        // refreshes the mtime that governs expiration. The cache lives on
        // local disk, so this should not fail; if it does, the entry
        // merely looks stale and the next open refreshes it again.
        let encoded = meta.encode()?;
        if let Err(err) = fs::write(entry.meta(), &encoded) {
            let error: &dyn std::error::Error = &err;
            tracing::warn!(error, "failed to rewrite metadata file");
        }

        let data = File::open(entry.data()).map_err(CacheError::OpenData)?;
        touch_used(entry);

        // Release the lock before enforcing the size budget, so eviction
        // can lock entries, this one included, without deadlocking.
        drop(lock);
        if installed > 0 {
            evict::enforce_max_data(self, installed);
        }

        Ok(data)
    }

    /// Reads the whole content of the file with the given path.
    pub fn read_file(&self, path: &str) -> Result<Vec<u8>, CacheError> {
        let mut file = self.open(path)?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).map_err(CacheError::ReadData)?;
        Ok(buf)
    }

    /// Marks the entry for the given path as expired.
    ///
    /// The cache will revalidate or refetch the local copy, if any, before
    /// using it again, regardless of the expiration setting. Expiring an
    /// absent entry is a no-op.
    pub fn expire(&self, path: &str) -> Result<(), CacheError> {
        let (_, entry) = locate(&self.dir, path);
        expire_entry(&entry)
    }

    /// Deletes the cache entry for the given path.
    ///
    /// Open handles to the old content keep reading; deleting an absent
    /// entry is a no-op.
    pub fn delete(&self, path: &str) -> Result<(), CacheError> {
        let (_, entry) = locate(&self.dir, path);
        delete_entry(&entry)
    }

    /// Marks every cache entry as expired.
    pub fn expire_all(&self) -> Result<(), CacheError> {
        self.for_each_entry(expire_entry)
    }

    /// Deletes every cache entry.
    pub fn delete_all(&self) -> Result<(), CacheError> {
        self.for_each_entry(delete_entry)
    }

    /// Applies `op` to every entry under the cache root, visiting all of
    /// them even when some fail, and reports the first error encountered.
    fn for_each_entry(
        &self,
        op: impl Fn(&EntryPaths) -> Result<(), CacheError>,
    ) -> Result<(), CacheError> {
        let mut first_error = None;
        for entry in evict::entries(&self.dir)? {
            if let Err(err) = op(&entry) {
                let error: &dyn std::error::Error = &err;
                tracing::error!(error, "cache-wide operation failed for an entry");
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Cache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("dir", &self.dir)
            .field("expiration", &self.expiration())
            .field("max_data", &self.max_data())
            .finish_non_exhaustive()
    }
}

fn meta_mtime(entry: &EntryPaths) -> Option<SystemTime> {
    fs::metadata(entry.meta()).and_then(|stat| stat.modified()).ok()
}

/// Records a use of the entry by rewriting the `.used` sentinel; its mtime
/// feeds the eviction LRU. A failed touch never fails the open.
fn touch_used(entry: &EntryPaths) {
    if let Err(err) = fs::write(entry.used(), b"\n") {
        let error: &dyn std::error::Error = &err;
        tracing::trace!(error, "failed to touch usage sentinel");
    }
}

/// Creates the `.next` staging file, exclusively.
///
/// A stale staging file left behind by a crashed predecessor cannot be in
/// use while we hold the meta lock, so it is removed and creation retried
/// once.
fn create_staging(entry: &EntryPaths) -> Result<File, CacheError> {
    let create = || {
        OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(entry.next())
    };
    match create() {
        Ok(next) => Ok(next),
        Err(_) => {
            let _ = fs::remove_file(entry.next());
            create().map_err(CacheError::CreateStaging)
        }
    }
}

/// Forces the entry to expired by setting its `.meta` times to the epoch.
pub(crate) fn expire_entry(entry: &EntryPaths) -> Result<(), CacheError> {
    let epoch = FileTime::zero();
    match filetime::set_file_times(entry.meta(), epoch, epoch) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(CacheError::ExpireEntry(err)),
    }
}

/// Removes the entry's whole file group under its meta lock.
pub(crate) fn delete_entry(entry: &EntryPaths) -> Result<(), CacheError> {
    let lock = match MetaLock::acquire(entry) {
        Ok(lock) => lock,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(CacheError::LockMetadata(err)),
    };
    let _ = fs::remove_file(entry.data());
    let _ = fs::remove_file(entry.next());
    let _ = fs::remove_file(entry.used());
    let result = fs::remove_file(entry.meta());
    drop(lock);
    match result {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(CacheError::DeleteEntry(err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::error::LoadError;

    fn refuse_loader(
        _path: &str,
        _target: &mut File,
        _token: &[u8],
    ) -> Result<LoadOutcome, LoadError> {
        Err(LoadError::NotFound)
    }

    fn test_cache() -> (tempfile::TempDir, Cache) {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path().join("cache"), refuse_loader).unwrap();
        (dir, cache)
    }

    #[test]
    fn epoch_mtime_is_forced_expired() {
        let (_dir, cache) = test_cache();

        assert!(cache.is_fresh(SystemTime::now()));
        // The epoch marks an entry as expired even though no expiration
        // is configured.
        assert!(!cache.is_fresh(SystemTime::UNIX_EPOCH));

        cache.set_expiration(Duration::from_secs(3600));
        assert!(!cache.is_fresh(SystemTime::UNIX_EPOCH));
    }

    #[test]
    fn freshness_follows_the_expiration_window() {
        let (_dir, cache) = test_cache();
        let two_minutes_ago = SystemTime::now() - Duration::from_secs(120);

        // Zero expiration: copies never expire.
        assert!(cache.is_fresh(two_minutes_ago));

        cache.set_expiration(Duration::from_secs(60));
        assert!(!cache.is_fresh(two_minutes_ago));

        cache.set_expiration(Duration::from_secs(300));
        assert!(cache.is_fresh(two_minutes_ago));

        cache.set_expiration(Duration::ZERO);
        assert!(cache.is_fresh(two_minutes_ago));
    }

    // SystemTime's range is platform specific; near its upper end the
    // expiration deadline stops being representable and the entry is
    // treated as never expiring.
    #[cfg(target_os = "linux")]
    #[test]
    fn unrepresentable_deadline_means_never_expires() {
        let (_dir, cache) = test_cache();
        cache.set_expiration(Duration::MAX);

        let far_future = SystemTime::UNIX_EPOCH + Duration::from_secs(i64::MAX as u64 - 1);
        assert!(cache.is_fresh(far_future));
    }

    #[test]
    fn touch_used_rewrites_the_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let (_, entry) = locate(dir.path(), "file");

        touch_used(&entry);
        assert_eq!(fs::read(entry.used()).unwrap(), b"\n");

        // Rewriting bumps the mtime the eviction LRU reads.
        let stale = FileTime::from_unix_time(1_000_000, 0);
        filetime::set_file_mtime(entry.used(), stale).unwrap();
        touch_used(&entry);
        let bumped = FileTime::from_last_modification_time(&fs::metadata(entry.used()).unwrap());
        assert!(bumped > stale);
    }

    #[test]
    fn meta_mtime_reports_only_existing_records() {
        let dir = tempfile::tempdir().unwrap();
        let (_, entry) = locate(dir.path(), "file");

        assert!(meta_mtime(&entry).is_none());
        fs::write(entry.meta(), b"").unwrap();
        assert!(meta_mtime(&entry).is_some());
    }
}
