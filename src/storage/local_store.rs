//! Local filesystem content store
//!
//! One flat directory, one file per blob, named by its content id. Writes go
//! to a temp file first and are renamed into place once complete, so a
//! reader either opens the whole blob or gets `NotFound`.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use crate::error::{StoreError, StoreResult};
use crate::storage::config::StorageConfig;
use crate::storage::{stream_into, BlobEntry, BlobReader, ContentId, ContentStore, StoredBlob};

const TEMP_SUFFIX: &str = "part";

/// Filesystem-backed content store
pub struct LocalContentStore {
    storage_path: PathBuf,
    temp_path: PathBuf,
    log_target: String,
}

impl LocalContentStore {
    pub fn new(config: &StorageConfig, log_target: impl Into<String>) -> StoreResult<Self> {
        let storage_path = PathBuf::from(&config.base_path);
        let temp_path = PathBuf::from(&config.temp_path);
        fs::create_dir_all(&storage_path)?;
        fs::create_dir_all(&temp_path)?;

        let log_target = log_target.into();
        info!(target: log_target.as_str(), "Using storage directory: {}, temp directory: {}",
              storage_path.display(), temp_path.display());

        let store = Self {
            storage_path,
            temp_path,
            log_target,
        };
        store.check_rename_across()?;
        Ok(store)
    }

    /// Writes are published by renaming out of the temp directory, so both
    /// directories must be on one filesystem. Move a marker file across once
    /// and refuse to start if that fails.
    fn check_rename_across(&self) -> StoreResult<()> {
        let marker = format!(".rename-check-{}", ContentId::generate());
        let from = self.temp_path.join(&marker);
        let to = self.storage_path.join(&marker);
        File::create(&from)?;

        let renamed = fs::rename(&from, &to);
        let leftover = if renamed.is_ok() { &to } else { &from };
        self.remove_quietly(leftover);

        renamed.map_err(|e| {
            StoreError::Validation(format!(
                "temp directory {} cannot publish into {}: {}",
                self.temp_path.display(),
                self.storage_path.display(),
                e
            ))
        })
    }

    /// Best-effort removal; anything but an already-missing file is logged.
    fn remove_quietly(&self, path: &Path) {
        if let Err(e) = fs::remove_file(path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(target: self.log_target.as_str(), "Failed to remove {}: {}", path.display(), e);
            }
        }
    }

    fn blob_path(&self, id: &ContentId) -> PathBuf {
        self.storage_path.join(id.as_str())
    }

    fn temp_file_path(&self, id: &ContentId) -> PathBuf {
        self.temp_path.join(format!("{}.{}", id, TEMP_SUFFIX))
    }

    fn not_found(id: &ContentId) -> StoreError {
        StoreError::NotFound(format!("no blob stored under {}", id))
    }

    /// Write into the temp file; the caller removes it on any failure.
    fn write_temp(&self, path: &Path, cancel: &CancellationToken, data: &mut dyn io::Read) -> StoreResult<(u64, String)> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)?;
        let written = stream_into(data, &mut file, cancel)?;
        file.flush()?;
        file.sync_all()?;
        Ok(written)
    }
}

impl ContentStore for LocalContentStore {
    fn put(&self, cancel: &CancellationToken, size_hint: u64, data: &mut dyn io::Read) -> StoreResult<StoredBlob> {
        let id = ContentId::generate();
        let temp = self.temp_file_path(&id);

        let (size, checksum) = match self.write_temp(&temp, cancel, data) {
            Ok(written) => written,
            Err(e) => {
                self.remove_quietly(&temp);
                return Err(e);
            }
        };

        if let Err(e) = fs::rename(&temp, self.blob_path(&id)) {
            self.remove_quietly(&temp);
            return Err(e.into());
        }

        if size_hint > 0 && size_hint != size {
            debug!(target: self.log_target.as_str(), "Blob {} size hint {} differs from written size {}", id, size_hint, size);
        }
        debug!(target: self.log_target.as_str(), "Stored blob {} ({} bytes)", id, size);

        Ok(StoredBlob { id, size, checksum })
    }

    fn get(&self, id: &ContentId) -> StoreResult<BlobReader> {
        match File::open(self.blob_path(id)) {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(Self::not_found(id)),
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self, id: &ContentId) -> StoreResult<()> {
        match fs::remove_file(self.blob_path(id)) {
            Ok(()) => {
                debug!(target: self.log_target.as_str(), "Deleted blob {}", id);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(Self::not_found(id)),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self) -> StoreResult<Vec<BlobEntry>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(&self.storage_path)? {
            let entry = entry?;
            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            let name = entry.file_name();
            let id = match name.to_str().map(ContentId::parse) {
                Some(Ok(id)) => id,
                _ => {
                    warn!(target: self.log_target.as_str(), "Ignoring foreign file in storage directory: {:?}", name);
                    continue;
                }
            };
            entries.push(BlobEntry {
                id,
                size: metadata.len(),
                modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            });
        }
        Ok(entries)
    }

    fn cleanup_partial_writes(&self, older_than: Duration) -> StoreResult<usize> {
        let now = SystemTime::now();
        let mut cleaned = 0;
        for entry in fs::read_dir(&self.temp_path)? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(TEMP_SUFFIX) {
                continue;
            }
            let modified = fs::metadata(&path)?.modified().unwrap_or(now);
            let age = now.duration_since(modified).unwrap_or_default();
            if age < older_than {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => cleaned += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        if cleaned > 0 {
            info!(target: self.log_target.as_str(), "Removed {} abandoned partial writes", cleaned);
        }
        Ok(cleaned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::config::StorageBackend;
    use std::io::Read;
    use tempfile::TempDir;

    fn temp_store() -> (TempDir, LocalContentStore) {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            backend: StorageBackend::Local,
            base_path: dir.path().join("blobs").to_string_lossy().into_owned(),
            temp_path: dir.path().join("tmp").to_string_lossy().into_owned(),
        };
        let store = LocalContentStore::new(&config, "test::local_store").unwrap();
        (dir, store)
    }

    fn read_all(mut reader: BlobReader) -> Vec<u8> {
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn test_local_store_basic_operations() {
        let (_dir, store) = temp_store();
        let data = b"Hello, local content store!";

        let blob = store.put(&CancellationToken::new(), data.len() as u64, &mut &data[..]).unwrap();
        assert_eq!(blob.size, data.len() as u64);
        assert_eq!(blob.checksum, format!("{:x}", md5::compute(data)));

        assert_eq!(read_all(store.get(&blob.id).unwrap()), data);

        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, blob.id);

        store.delete(&blob.id).unwrap();
        assert!(store.get(&blob.id).err().unwrap().is_not_found());
    }

    #[test]
    fn test_delete_twice_reports_not_found() {
        let (_dir, store) = temp_store();
        let blob = store.put(&CancellationToken::new(), 0, &mut &b"x"[..]).unwrap();
        assert!(store.delete(&blob.id).is_ok());
        assert!(store.delete(&blob.id).unwrap_err().is_not_found());
    }

    #[test]
    fn test_canceled_put_leaves_nothing_behind() {
        let (dir, store) = temp_store();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = store.put(&cancel, 3, &mut &b"abc"[..]);
        assert!(matches!(result, Err(StoreError::Canceled)));
        assert!(store.list().unwrap().is_empty());
        assert_eq!(fs::read_dir(dir.path().join("tmp")).unwrap().count(), 0);
    }

    #[test]
    fn test_reader_survives_concurrent_delete() {
        let (_dir, store) = temp_store();
        let data = vec![42u8; 256 * 1024];
        let blob = store.put(&CancellationToken::new(), 0, &mut data.as_slice()).unwrap();

        let reader = store.get(&blob.id).unwrap();
        store.delete(&blob.id).unwrap();
        assert_eq!(read_all(reader), data);
    }

    #[test]
    fn test_concurrent_puts_get_distinct_ids() {
        use std::sync::Arc;
        use std::thread;

        let (_dir, store) = temp_store();
        let store = Arc::new(store);
        let handles: Vec<_> = (0..8).map(|i| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                let data = format!("blob number {}", i).into_bytes();
                let blob = store.put(&CancellationToken::new(), 0, &mut data.as_slice()).unwrap();
                (blob.id, data)
            })
        }).collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for (id, data) in &results {
            assert_eq!(&read_all(store.get(id).unwrap()), data);
        }
        assert_eq!(store.list().unwrap().len(), 8);
    }

    #[test]
    fn test_new_leaves_no_marker_behind() {
        let (dir, store) = temp_store();
        assert!(store.list().unwrap().is_empty());
        assert_eq!(fs::read_dir(dir.path().join("blobs")).unwrap().count(), 0);
        assert_eq!(fs::read_dir(dir.path().join("tmp")).unwrap().count(), 0);
    }

    #[test]
    fn test_temp_dir_inside_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = StorageConfig::default();
        config.set_directory(&dir.path().join("blobs").to_string_lossy());
        let store = LocalContentStore::new(&config, "test::local_store").unwrap();

        let blob = store.put(&CancellationToken::new(), 0, &mut &b"nested temp"[..]).unwrap();
        assert_eq!(read_all(store.get(&blob.id).unwrap()), b"nested temp");
        // the temp directory is not mistaken for a blob
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn test_cleanup_partial_writes() {
        let (dir, store) = temp_store();
        let stale = dir.path().join("tmp").join(format!("{}.{}", ContentId::generate(), TEMP_SUFFIX));
        fs::write(&stale, b"half a blob").unwrap();

        assert_eq!(store.cleanup_partial_writes(Duration::from_secs(3600)).unwrap(), 0);
        assert_eq!(store.cleanup_partial_writes(Duration::ZERO).unwrap(), 1);
        assert!(!stale.exists());
    }
}
