use std::io;
use std::time::Duration;

use thiserror::Error;

/// An error reported by a [`Loader`](crate::Loader) while fetching or
/// revalidating a remote file.
///
/// Load errors are surfaced to the caller verbatim and are never cached;
/// the next open of the same path retries from scratch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    /// The file does not exist at the remote source.
    ///
    /// Kept distinct from transport failures so callers can tell absence
    /// apart from a transient problem.
    #[error("not found")]
    NotFound,
    /// The remote source denied access.
    ///
    /// The attached string contains the remote source's response.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// The fetch did not complete within the transport's deadline.
    #[error("load timed out")]
    Timeout(Duration),
    /// Any other transport problem, like connection loss, DNS resolution,
    /// or a 5xx server response.
    ///
    /// The attached string contains the remote source's response.
    #[error("load failed: {0}")]
    Download(String),
}

/// An error produced by a cache operation.
///
/// Filesystem failures carry a phrase identifying the operation that was
/// underway. `ENOENT` on admin paths is not an error; deleting or expiring
/// an absent entry succeeds silently.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The loader failed. Surfaced verbatim, never cached.
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error("creating cache directory: {0}")]
    CreateDir(#[source] io::Error),
    #[error("creating metadata file: {0}")]
    CreateMetadata(#[source] io::Error),
    #[error("locking metadata file: {0}")]
    LockMetadata(#[source] io::Error),
    #[error("stat'ing metadata file: {0}")]
    StatMetadata(#[source] io::Error),
    #[error("reading metadata file: {0}")]
    ReadMetadata(#[source] io::Error),
    /// The metadata record did not parse. The entry is left in place;
    /// delete or expire it to recover.
    #[error("corrupt metadata file: {0}")]
    CorruptMetadata(#[source] serde_json::Error),
    #[error("encoding metadata: {0}")]
    EncodeMetadata(#[source] serde_json::Error),
    #[error("creating cached file: {0}")]
    CreateStaging(#[source] io::Error),
    #[error("writing cached file: {0}")]
    WriteData(#[source] io::Error),
    #[error("installing cached file: {0}")]
    InstallData(#[source] io::Error),
    #[error("opening cached file: {0}")]
    OpenData(#[source] io::Error),
    #[error("reading cached file: {0}")]
    ReadData(#[source] io::Error),
    #[error("deleting cache entry: {0}")]
    DeleteEntry(#[source] io::Error),
    #[error("expiring cache entry: {0}")]
    ExpireEntry(#[source] io::Error),
    #[error("walking cache directory: {0}")]
    Walk(#[source] io::Error),
}
