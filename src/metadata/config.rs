//! Configuration for the metadata database

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::StoreResult;
use crate::metadata::sqlite_store::Database;

pub const IN_MEMORY: &str = ":memory:";

const DATABASE_LOG_TARGET: &str = "warp_vault::metadata::database";

/// Configuration for the SQLite metadata database
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetadataConfig {
    /// Database file, or `:memory:` for a throwaway database
    pub db_path: String,
    /// Enable write-ahead logging (ignored for in-memory databases)
    pub wal_mode: bool,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            db_path: "./data/metadata.db".to_string(),
            wal_mode: true,
        }
    }
}

impl MetadataConfig {
    pub fn in_memory() -> Self {
        Self {
            db_path: IN_MEMORY.to_string(),
            wal_mode: false,
        }
    }

    pub fn is_in_memory(&self) -> bool {
        self.db_path == IN_MEMORY
    }

    /// Open the database described by this configuration
    pub fn open_database(&self) -> StoreResult<Database> {
        info!(target: DATABASE_LOG_TARGET, "Opening metadata database at {}", self.db_path);
        Database::open(self, DATABASE_LOG_TARGET)
    }
}
