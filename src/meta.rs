//! The per-entry metadata record and its on-disk codec.

use std::fs::File;
use std::io::Read as _;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// The metadata record stored in an entry's `.meta` file.
///
/// The record describes the sibling `.data` file. Freshness is *not* part
/// of the record; the `.meta` file's modification time is authoritative
/// for that, so a record rewrite doubles as a revalidation timestamp.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct Metadata {
    /// The cleaned logical path. Stored for debugging only.
    pub path: String,
    /// When the current `.data` contents were first produced.
    pub create_time: Option<SystemTime>,
    /// When `.data` was last confirmed live.
    pub refresh_time: Option<SystemTime>,
    /// The loader's opaque validation token, typically an entity tag.
    /// Empty means there is no prior load to validate against.
    pub load_token: Vec<u8>,
}

impl Metadata {
    /// Reads the record from the open (and locked) metadata file.
    ///
    /// An empty file parses to the zero record: the entry exists but
    /// nothing has been loaded for it yet.
    pub fn read(mut file: &File) -> Result<Metadata, CacheError> {
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).map_err(CacheError::ReadMetadata)?;
        if buf.is_empty() {
            return Ok(Metadata::default());
        }
        serde_json::from_slice(&buf).map_err(CacheError::CorruptMetadata)
    }

    /// Serializes the record for a whole-file write.
    ///
    /// Writes must replace the previous content entirely rather than
    /// append, so that a shorter new record cannot leave stale trailing
    /// bytes behind.
    pub fn encode(&self) -> Result<Vec<u8>, CacheError> {
        serde_json::to_vec(self).map_err(CacheError::EncodeMetadata)
    }
}
