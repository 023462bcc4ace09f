//! In-memory implementation of ContentStore for testing

use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use log::debug;
use tokio_util::sync::CancellationToken;

use crate::error::{StoreError, StoreResult};
use crate::storage::{stream_into, BlobEntry, BlobReader, ContentId, ContentStore, StoredBlob};

/// Mock implementation of ContentStore for testing
pub struct MockContentStore {
    // content_id -> (bytes, time written)
    data: Arc<Mutex<HashMap<ContentId, (Arc<Vec<u8>>, SystemTime)>>>,
    fail_writes: AtomicBool,
    log_target: String,
}

impl MockContentStore {
    pub fn new() -> Self {
        Self::with_log_target("warp_vault::storage::mock")
    }

    pub fn with_log_target(log_target: impl Into<String>) -> Self {
        Self {
            data: Arc::new(Mutex::new(HashMap::new())),
            fail_writes: AtomicBool::new(false),
            log_target: log_target.into(),
        }
    }

    /// Make every subsequent `put` fail with an I/O error
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Get the number of stored blobs
    pub fn blob_count(&self) -> usize {
        self.data.lock().map(|data| data.len()).unwrap_or(0)
    }

    /// Check if a blob exists
    pub fn contains(&self, id: &ContentId) -> bool {
        self.data.lock().map(|data| data.contains_key(id)).unwrap_or(false)
    }

    /// Insert a blob with a chosen timestamp, bypassing `put`
    pub fn insert_at(&self, data: &[u8], written: SystemTime) -> ContentId {
        let id = ContentId::generate();
        if let Ok(mut store) = self.data.lock() {
            store.insert(id.clone(), (Arc::new(data.to_vec()), written));
        }
        id
    }
}

impl Default for MockContentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentStore for MockContentStore {
    fn put(&self, cancel: &CancellationToken, size_hint: u64, data: &mut dyn Read) -> StoreResult<StoredBlob> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "mock store configured to fail writes",
            )));
        }

        let mut buffer = Vec::with_capacity(size_hint as usize);
        let (size, checksum) = stream_into(data, &mut buffer, cancel)?;
        let id = ContentId::generate();

        let mut store = self.data.lock().map_err(|_| StoreError::poisoned("mock content store"))?;
        store.insert(id.clone(), (Arc::new(buffer), SystemTime::now()));
        debug!(target: self.log_target.as_str(), "Mock stored blob {} ({} bytes)", id, size);

        Ok(StoredBlob { id, size, checksum })
    }

    fn get(&self, id: &ContentId) -> StoreResult<BlobReader> {
        let store = self.data.lock().map_err(|_| StoreError::poisoned("mock content store"))?;
        match store.get(id) {
            Some((bytes, _)) => {
                let bytes: Vec<u8> = bytes.as_ref().clone();
                Ok(Box::new(Cursor::new(bytes)))
            }
            None => Err(StoreError::NotFound(format!("no blob stored under {}", id))),
        }
    }

    fn delete(&self, id: &ContentId) -> StoreResult<()> {
        let mut store = self.data.lock().map_err(|_| StoreError::poisoned("mock content store"))?;
        match store.remove(id) {
            Some(_) => {
                debug!(target: self.log_target.as_str(), "Mock deleted blob {}", id);
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("no blob stored under {}", id))),
        }
    }

    fn list(&self) -> StoreResult<Vec<BlobEntry>> {
        let store = self.data.lock().map_err(|_| StoreError::poisoned("mock content store"))?;
        Ok(store
            .iter()
            .map(|(id, (bytes, written))| BlobEntry {
                id: id.clone(),
                size: bytes.len() as u64,
                modified: *written,
            })
            .collect())
    }

    fn cleanup_partial_writes(&self, _older_than: Duration) -> StoreResult<usize> {
        // Writes are buffered in memory and inserted whole.
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_store_operations() {
        let store = MockContentStore::new();
        let blob = store.put(&CancellationToken::new(), 5, &mut &b"hello"[..]).unwrap();
        assert!(store.contains(&blob.id));
        assert_eq!(store.blob_count(), 1);

        let mut out = String::new();
        store.get(&blob.id).unwrap().read_to_string(&mut out).unwrap();
        assert_eq!(out, "hello");

        store.delete(&blob.id).unwrap();
        assert!(store.delete(&blob.id).unwrap_err().is_not_found());
        assert!(store.get(&blob.id).err().unwrap().is_not_found());
    }

    #[test]
    fn test_mock_store_with_log_target() {
        let store = MockContentStore::with_log_target("test::mock_store");
        let blob = store.put(&CancellationToken::new(), 0, &mut &b"targeted"[..]).unwrap();
        assert_eq!(store.list().unwrap().len(), 1);
        store.delete(&blob.id).unwrap();
        assert_eq!(store.blob_count(), 0);
    }

    #[test]
    fn test_mock_store_failure_injection() {
        let store = MockContentStore::new();
        store.set_fail_writes(true);
        let err = store.put(&CancellationToken::new(), 0, &mut &b"data"[..]).unwrap_err();
        assert!(matches!(err, StoreError::Io(_)));
        assert_eq!(store.blob_count(), 0);

        store.set_fail_writes(false);
        assert!(store.put(&CancellationToken::new(), 0, &mut &b"data"[..]).is_ok());
    }
}
