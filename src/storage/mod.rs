//! Content Store Abstraction
//!
//! Raw byte streams stored under server-generated identifiers. The store
//! knows nothing about owners, names or content types; all of that lives
//! in the metadata registries.

pub mod config;
pub mod local_store;
pub mod mock_store;

use std::fmt;
use std::io::{Read, Write};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};

/// Chunk size used when streaming request bodies into a blob
pub const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// Opaque identifier of a stored blob (a random v4 UUID)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentId(String);

impl ContentId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().hyphenated().to_string())
    }

    /// Parse a caller-supplied identifier. Anything that is not a UUID is
    /// rejected, so an id can always be used as a bare file name.
    pub fn parse(raw: &str) -> StoreResult<Self> {
        let uuid = Uuid::parse_str(raw.trim())
            .map_err(|_| StoreError::Validation(format!("malformed content id: {}", raw)))?;
        Ok(Self(uuid.hyphenated().to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of a successful `put`
#[derive(Debug, Clone, PartialEq)]
pub struct StoredBlob {
    pub id: ContentId,
    /// Bytes actually written
    pub size: u64,
    /// Hex md5 of the content
    pub checksum: String,
}

/// A blob as seen by a directory scan
#[derive(Debug, Clone)]
pub struct BlobEntry {
    pub id: ContentId,
    pub size: u64,
    pub modified: SystemTime,
}

/// Readable handle on a stored blob
pub type BlobReader = Box<dyn Read + Send>;

/// Trait defining the content store interface
pub trait ContentStore: Send + Sync {
    /// Stream `data` into a fresh blob. Nothing becomes visible under the
    /// returned id unless the whole stream was written.
    fn put(&self, cancel: &CancellationToken, size_hint: u64, data: &mut dyn Read) -> StoreResult<StoredBlob>;

    /// Open a blob for reading. `NotFound` when absent.
    fn get(&self, id: &ContentId) -> StoreResult<BlobReader>;

    /// Remove a blob. `NotFound` when absent.
    fn delete(&self, id: &ContentId) -> StoreResult<()>;

    /// Enumerate stored blobs
    fn list(&self) -> StoreResult<Vec<BlobEntry>>;

    /// Drop partial writes abandoned for longer than `older_than`.
    /// Returns how many were removed.
    fn cleanup_partial_writes(&self, older_than: std::time::Duration) -> StoreResult<usize>;
}

/// Copy `reader` into `writer` chunk by chunk, checking `cancel` between
/// chunks. Returns the byte count and the md5 of everything copied.
pub(crate) fn stream_into(
    reader: &mut dyn Read,
    writer: &mut dyn Write,
    cancel: &CancellationToken,
) -> StoreResult<(u64, String)> {
    let mut buffer = vec![0u8; STREAM_CHUNK_SIZE];
    let mut digest = md5::Context::new();
    let mut total = 0u64;

    loop {
        if cancel.is_cancelled() {
            return Err(StoreError::Canceled);
        }
        let read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        writer.write_all(&buffer[..read])?;
        digest.consume(&buffer[..read]);
        total += read as u64;
    }

    Ok((total, hex::encode(digest.compute().0)))
}
