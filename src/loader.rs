use std::fs::File;

use crate::error::LoadError;

/// The outcome of a successful [`Loader::load`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The cached copy is still current and nothing was written to the
    /// staging file. Carries the validation token to store, which the
    /// loader may have refreshed.
    Valid { token: Vec<u8> },
    /// The complete new content was written to the staging file. Carries
    /// the validation token for the new content.
    Fetched { token: Vec<u8> },
}

/// The boundary to the remote source.
///
/// `load` fetches `path` from the remote location, writing the content to
/// `target`. If the cache already holds a (possibly expired) copy of the
/// file, `token` is the token returned by the load that produced it;
/// otherwise `token` is empty.
///
/// With a non-empty token the loader may confirm that the cached copy is
/// still current — typically via a conditional request on an entity tag —
/// and return [`LoadOutcome::Valid`] without writing to `target`. With an
/// empty token there is no prior copy to validate, so the loader must fetch
/// and return [`LoadOutcome::Fetched`]. The token is opaque to the cache.
///
/// On error the staging file may be left in any state; the cache discards
/// it and does not cache the failure.
///
/// The elements of `path` are separated by slash ('/') characters,
/// regardless of host operating system convention.
pub trait Loader: Send + Sync {
    fn load(&self, path: &str, target: &mut File, token: &[u8])
        -> Result<LoadOutcome, LoadError>;
}

/// Plain functions and closures with the right shape act as loaders.
impl<F> Loader for F
where
    F: Fn(&str, &mut File, &[u8]) -> Result<LoadOutcome, LoadError> + Send + Sync,
{
    fn load(
        &self,
        path: &str,
        target: &mut File,
        token: &[u8],
    ) -> Result<LoadOutcome, LoadError> {
        self(path, target, token)
    }
}
