//! Application Configuration
//!
//! This module provides configuration management for the application,
//! supporting YAML configuration files with sensible defaults.

use std::env;
use std::fs;
use std::path::Path;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::metadata::config::MetadataConfig;
use crate::metadata::predicate::PageBounds;
use crate::service::sweeper::SweeperConfig;
use crate::storage::config::{StorageBackend, StorageConfig};

/// Environment variable naming an alternative config file
pub const CONFIG_PATH_VAR: &str = "WARP_VAULT_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Server configuration
    pub server: ServerConfig,
    /// Content store configuration
    pub storage: StorageConfig,
    /// Metadata database configuration
    pub metadata: MetadataConfig,
    /// Page size bounds for list endpoints
    pub pagination: PaginationConfig,
    /// Orphan sweeper configuration
    pub sweeper: SweeperConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Number of worker threads
    pub workers: usize,
    /// Maximum upload body size in bytes; larger bodies get 413
    pub max_payload_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9710,
            workers: 4,
            max_payload_size: 1024 * 1024 * 1024, // 1GB
        }
    }
}

/// Page size bounds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PaginationConfig {
    /// Uploads, images and pages
    pub general: PageBounds,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            general: PageBounds::GENERAL,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Path to log4rs configuration file
    pub config_file: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            config_file: "server_log.yaml".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from `WARP_VAULT_CONFIG` or `config.yaml`, use
    /// defaults if not found, then apply environment overrides.
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let path = env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut config = Self::load_from(&path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a file, use defaults if it does not exist
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let path = path.as_ref();
        if path.exists() {
            let content = fs::read_to_string(path)?;
            let config: AppConfig = serde_yaml::from_str(&content)?;
            info!("Loaded configuration from {}", path.display());
            Ok(config)
        } else {
            warn!("Config file {} not found, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// `STORAGE_BACKEND`, `STORAGE_DIRECTORY` and `DB_FILE` win over the file.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(backend) = env::var("STORAGE_BACKEND") {
            match backend.parse::<StorageBackend>() {
                Ok(backend) => {
                    info!("Using storage backend from environment: {:?}", backend);
                    self.storage.backend = backend;
                }
                Err(e) => warn!("Invalid storage backend in environment: {}. Keeping {:?}.", e, self.storage.backend),
            }
        }
        if let Ok(dir) = env::var("STORAGE_DIRECTORY") {
            info!("Using storage directory from environment: {}", dir);
            self.storage.set_directory(&dir);
        }
        if let Ok(path) = env::var("DB_FILE") {
            info!("Using database path from environment: {}", path);
            self.metadata.db_path = path;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    fn clear_env() {
        for var in [CONFIG_PATH_VAR, "STORAGE_BACKEND", "STORAGE_DIRECTORY", "DB_FILE"] {
            env::remove_var(var);
        }
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 9710);
        assert_eq!(config.storage.backend, StorageBackend::Local);
        assert_eq!(config.pagination.general, PageBounds::GENERAL);
        assert_eq!(config.logging.config_file, "server_log.yaml");
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_from(dir.path().join("absent.yaml")).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_partial_yaml_keeps_other_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "server:\n  port: 8088\nstorage:\n  backend: Mock\npagination:\n  general:\n    default_size: 3\n    max_size: 6\n"
        )
        .unwrap();

        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.server.port, 8088);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.storage.backend, StorageBackend::Mock);
        assert_eq!(config.pagination.general, PageBounds { default_size: 3, max_size: 6 });
        assert_eq!(config.metadata, MetadataConfig::default());
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        env::set_var(CONFIG_PATH_VAR, dir.path().join("none.yaml"));
        env::set_var("STORAGE_BACKEND", "memory");
        env::set_var("STORAGE_DIRECTORY", "/srv/blobs");
        env::set_var("DB_FILE", "/srv/meta.db");

        let config = AppConfig::load().unwrap();
        assert_eq!(config.storage.backend, StorageBackend::Mock);
        assert_eq!(config.storage.base_path, "/srv/blobs");
        assert_eq!(Path::new(&config.storage.temp_path), Path::new("/srv/blobs/.tmp"));
        assert_eq!(config.metadata.db_path, "/srv/meta.db");
        clear_env();
    }

    #[test]
    #[serial]
    fn test_invalid_backend_in_env_is_ignored() {
        clear_env();
        env::set_var("STORAGE_BACKEND", "tape");
        let mut config = AppConfig::default();
        config.apply_env_overrides();
        assert_eq!(config.storage.backend, StorageBackend::Local);
        clear_env();
    }
}
