//! Mapping logical paths to on-disk entry groups, and the per-entry
//! inter-process lock.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt as _;
use sha1::{Digest as _, Sha1};

/// The group of sibling files representing one cached path.
///
/// All four files share a prefix: the cache root, a subdirectory named by
/// the first three hex digits of the path digest, and a base name made of
/// the remaining thirty-seven.
#[derive(Debug, Clone)]
pub(crate) struct EntryPaths {
    prefix: PathBuf,
}

impl EntryPaths {
    pub fn new(prefix: PathBuf) -> Self {
        EntryPaths { prefix }
    }

    /// The published content. When present, always a whole copy.
    pub fn data(&self) -> PathBuf {
        self.suffixed(".data")
    }

    /// The metadata record. Its mtime governs expiration and the open file
    /// doubles as the inter-process lock handle.
    pub fn meta(&self) -> PathBuf {
        self.suffixed(".meta")
    }

    /// The one-byte usage sentinel; its mtime is the entry's last use.
    pub fn used(&self) -> PathBuf {
        self.suffixed(".used")
    }

    /// The staging file for a download in progress, private to the lock
    /// holder.
    pub fn next(&self) -> PathBuf {
        self.suffixed(".next")
    }

    fn suffixed(&self, suffix: &str) -> PathBuf {
        let mut name = OsString::from(self.prefix.as_os_str());
        name.push(suffix);
        PathBuf::from(name)
    }
}

/// Maps a logical path to its cleaned form and its on-disk entry group.
///
/// The path is cleaned against an absolute root, hashed with SHA-1 (used
/// for partitioning, not security) and rendered as forty lowercase hex
/// digits, split three/thirty-seven into bucket directory and base name.
/// The bucket is created on demand; creation errors are ignored since a
/// subsequent file open surfaces any real problem.
pub(crate) fn locate(root: &Path, path: &str) -> (String, EntryPaths) {
    let cleaned = clean(path);
    let digest = Sha1::digest(cleaned.as_bytes());
    let digest = format!("{digest:x}");
    let bucket = root.join(&digest[..3]);
    let _ = fs::create_dir(&bucket);
    (cleaned, EntryPaths::new(bucket.join(&digest[3..])))
}

/// Lexically cleans a slash-separated path against an absolute root.
///
/// Collapses duplicate separators and `.`/`..` elements; the result always
/// begins with `/` and `..` cannot escape the root.
fn clean(path: &str) -> String {
    let mut elems: Vec<&str> = Vec::new();
    for elem in path.split('/') {
        match elem {
            "" | "." => {}
            ".." => {
                elems.pop();
            }
            elem => elems.push(elem),
        }
    }
    if elems.is_empty() {
        return "/".to_owned();
    }
    let mut cleaned = String::with_capacity(path.len() + 1);
    for elem in elems {
        cleaned.push('/');
        cleaned.push_str(elem);
    }
    cleaned
}

/// An exclusive advisory lock on an entry's metadata file.
///
/// Whoever holds the lock is the sole agent mutating the entry group. The
/// lock is advisory and whole-file (BSD `flock` style); byte-range locks
/// over networked filesystems are explicitly unsupported, so a shared
/// cache directory must live on local disk.
///
/// Dropping the handle releases the lock.
#[derive(Debug)]
pub(crate) struct MetaLock {
    file: File,
}

impl MetaLock {
    /// Opens the entry's `.meta` file for read-write and takes the
    /// exclusive lock on it, blocking while another holder is active.
    ///
    /// Does not create the file: binding the lock to the metadata file
    /// ties its existence to the entry's, so the caller creates the file
    /// with open-create-exclusive and retries.
    pub fn acquire(entry: &EntryPaths) -> io::Result<MetaLock> {
        let file = OpenOptions::new().read(true).write(true).open(entry.meta())?;
        file.lock_exclusive()?;
        Ok(MetaLock { file })
    }

    pub fn file(&self) -> &File {
        &self.file
    }
}

impl Drop for MetaLock {
    fn drop(&mut self) {
        // Closing the descriptor would release the lock anyway; the
        // explicit unlock keeps the release at drop time, before the file
        // object itself goes away.
        let _ = self.file.unlock();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn clean_collapses_paths() {
        assert_eq!(clean("file"), "/file");
        assert_eq!(clean("/file"), "/file");
        assert_eq!(clean("./file"), "/file");
        assert_eq!(clean("a//b"), "/a/b");
        assert_eq!(clean("a/./b"), "/a/b");
        assert_eq!(clean("a/../b"), "/b");
        assert_eq!(clean("a/b/.."), "/a");
        assert_eq!(clean("../../a"), "/a");
        assert_eq!(clean(""), "/");
        assert_eq!(clean("/"), "/");
        assert_eq!(clean("."), "/");
    }

    #[test]
    fn locate_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let (cleaned, entry) = locate(dir.path(), "some/file");
        assert_eq!(cleaned, "/some/file");

        for alias in ["/some/file", "some//file", "./some/file", "x/../some/file"] {
            let (aliased, other) = locate(dir.path(), alias);
            assert_eq!(aliased, cleaned);
            assert_eq!(other.data(), entry.data());
        }
    }

    #[test]
    fn locate_shapes_the_entry_group() {
        let dir = tempfile::tempdir().unwrap();
        let (_, entry) = locate(dir.path(), "file");

        let meta = entry.meta();
        let bucket = meta.parent().unwrap();
        assert_eq!(bucket.parent().unwrap(), dir.path());
        assert!(bucket.is_dir());

        let bucket_name = bucket.file_name().unwrap().to_str().unwrap();
        let base_name = meta.file_stem().unwrap().to_str().unwrap();
        assert_eq!(bucket_name.len(), 3);
        assert_eq!(base_name.len(), 37);
        let is_hex = |s: &str| s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        assert!(is_hex(bucket_name));
        assert!(is_hex(base_name));
    }

    #[test]
    fn acquire_does_not_create() {
        let dir = tempfile::tempdir().unwrap();
        let (_, entry) = locate(dir.path(), "missing");
        let err = MetaLock::acquire(&entry).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert!(!entry.meta().exists());
    }

    #[test]
    fn acquire_excludes_a_second_holder() {
        let dir = tempfile::tempdir().unwrap();
        let (_, entry) = locate(dir.path(), "contended");
        File::create(entry.meta()).unwrap();

        let lock = MetaLock::acquire(&entry).unwrap();

        let (tx, rx) = mpsc::channel();
        let contender = {
            let entry = entry.clone();
            thread::spawn(move || {
                let _lock = MetaLock::acquire(&entry).unwrap();
                tx.send(()).unwrap();
            })
        };

        // The second acquire must block while the lock is held.
        assert_eq!(
            rx.recv_timeout(Duration::from_millis(100)),
            Err(mpsc::RecvTimeoutError::Timeout)
        );

        drop(lock);
        rx.recv_timeout(Duration::from_secs(10)).unwrap();
        contender.join().unwrap();
    }
}
