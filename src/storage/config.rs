//! Configuration for content store backends

use std::path::Path;
use std::sync::Arc;

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::StoreResult;
use crate::storage::{local_store::LocalContentStore, mock_store::MockContentStore, ContentStore};

const STORE_LOG_TARGET: &str = "warp_vault::storage";

/// Available content store backends
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub enum StorageBackend {
    #[default]
    Local,
    Mock,
}

impl std::str::FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" | "localfs" | "fs" => Ok(StorageBackend::Local),
            "mock" | "memory" => Ok(StorageBackend::Mock),
            _ => Err(format!("Unknown storage backend: {}", s)),
        }
    }
}

/// Content store configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// Storage backend type
    pub backend: StorageBackend,
    /// Directory holding one file per blob
    pub base_path: String,
    /// Directory for in-flight writes; must share a filesystem with `base_path`
    pub temp_path: String,
}

/// Temp directory name used when only the blob directory is given
pub const DEFAULT_TEMP_DIR: &str = ".tmp";

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Local,
            base_path: "./data/storage".to_string(),
            temp_path: "./data/temp".to_string(),
        }
    }
}

impl StorageConfig {
    /// Point the store at `dir`, with in-flight writes kept inside it so the
    /// final rename never crosses filesystems.
    pub fn set_directory(&mut self, dir: &str) {
        self.base_path = dir.to_string();
        self.temp_path = Path::new(dir).join(DEFAULT_TEMP_DIR).to_string_lossy().into_owned();
    }

    /// Create a content store instance based on the configuration
    pub fn create_store(&self) -> StoreResult<Arc<dyn ContentStore>> {
        match self.backend {
            StorageBackend::Local => {
                info!(target: STORE_LOG_TARGET, "Creating local content store at {}", self.base_path);
                Ok(Arc::new(LocalContentStore::new(self, "warp_vault::storage::local")?))
            }
            StorageBackend::Mock => {
                info!(target: STORE_LOG_TARGET, "Creating mock content store");
                Ok(Arc::new(MockContentStore::with_log_target("warp_vault::storage::mock")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_backend_from_str() {
        assert_eq!("local".parse::<StorageBackend>().unwrap(), StorageBackend::Local);
        assert_eq!("LocalFS".parse::<StorageBackend>().unwrap(), StorageBackend::Local);
        assert_eq!("fs".parse::<StorageBackend>().unwrap(), StorageBackend::Local);
        assert_eq!("mock".parse::<StorageBackend>().unwrap(), StorageBackend::Mock);
        assert_eq!("MEMORY".parse::<StorageBackend>().unwrap(), StorageBackend::Mock);

        assert!("invalid".parse::<StorageBackend>().is_err());
    }

    #[test]
    fn test_storage_config_default() {
        let config = StorageConfig::default();
        assert_eq!(config.backend, StorageBackend::Local);
    }

    #[test]
    fn test_set_directory_keeps_temp_inside() {
        let mut config = StorageConfig::default();
        config.set_directory("/srv/blobs");
        assert_eq!(config.base_path, "/srv/blobs");
        assert_eq!(Path::new(&config.temp_path), Path::new("/srv/blobs/.tmp"));
    }

    #[test]
    fn test_create_store() {
        let dir = tempfile::tempdir().unwrap();
        let local_config = StorageConfig {
            backend: StorageBackend::Local,
            base_path: dir.path().join("b").to_string_lossy().into_owned(),
            temp_path: dir.path().join("t").to_string_lossy().into_owned(),
        };
        let mock_config = StorageConfig { backend: StorageBackend::Mock, ..StorageConfig::default() };

        assert!(local_config.create_store().unwrap().list().unwrap().is_empty());
        assert!(mock_config.create_store().unwrap().list().unwrap().is_empty());
    }
}
