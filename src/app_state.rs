//! Application State Management
//!
//! This module provides the application state that contains all services
//! and their dependencies, following the dependency injection pattern.

use std::sync::Arc;

use log::info;

use crate::config::AppConfig;
use crate::error::StoreResult;
use crate::metadata::sqlite_store::Database;
use crate::metadata::ContentKind;
use crate::service::content_service::ContentService;
use crate::service::page_service::PageService;
use crate::service::sweeper::OrphanSweeper;
use crate::service::user_service::UserService;
use crate::storage::mock_store::MockContentStore;
use crate::storage::ContentStore;

/// Application state containing all services and their dependencies
#[derive(Clone)]
pub struct AppState {
    pub uploads: Arc<ContentService>,
    pub images: Arc<ContentService>,
    pub pages: Arc<PageService>,
    pub users: Arc<UserService>,
    pub store: Arc<dyn ContentStore>,
    pub config: AppConfig,
}

impl AppState {
    /// Create application state from configuration
    pub fn from_config(config: AppConfig) -> StoreResult<Self> {
        info!("Initializing application state with configuration");
        let store = config.storage.create_store()?;
        let db = config.metadata.open_database()?;
        let state = Self::assemble(config, store, db)?;
        info!("Application state initialized successfully");
        Ok(state)
    }

    /// Create application state for testing: mock content store and an
    /// in-memory database.
    pub fn new_for_testing() -> StoreResult<Self> {
        Self::with_store(Arc::new(MockContentStore::new()))
    }

    /// Testing state around a caller-held store
    pub fn with_store(store: Arc<dyn ContentStore>) -> StoreResult<Self> {
        Self::assemble(AppConfig::default(), store, Database::open_in_memory()?)
    }

    fn assemble(config: AppConfig, store: Arc<dyn ContentStore>, db: Database) -> StoreResult<Self> {
        let general = config.pagination.general;

        let uploads = Arc::new(ContentService::new(
            ContentKind::Upload,
            db.clone(),
            store.clone(),
            general,
            "warp_vault::service::uploads",
        )?);
        let images = Arc::new(ContentService::new(
            ContentKind::Image,
            db.clone(),
            store.clone(),
            general,
            "warp_vault::service::images",
        )?);
        let pages = Arc::new(PageService::new(db.clone(), general, "warp_vault::service::pages")?);
        let users = Arc::new(UserService::new(db, "warp_vault::service::users")?);

        Ok(Self {
            uploads,
            images,
            pages,
            users,
            store,
            config,
        })
    }

    pub fn content(&self, kind: ContentKind) -> &Arc<ContentService> {
        match kind {
            ContentKind::Upload => &self.uploads,
            ContentKind::Image => &self.images,
        }
    }

    /// Sweeper over every blob-backed registry
    pub fn sweeper(&self) -> OrphanSweeper {
        OrphanSweeper::new(
            self.store.clone(),
            vec![self.uploads.clone(), self.images.clone()],
            &self.config.sweeper,
            "warp_vault::service::sweeper",
        )
    }
}
