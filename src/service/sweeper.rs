//! Background orphan sweeper
//!
//! Periodically removes blobs that no upload or image row points at, and
//! temp files left behind by interrupted writes. Blobs younger than
//! `min_age` are skipped so an in-flight registration is never raced.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::error::StoreResult;
use crate::service::content_service::ContentService;
use crate::storage::ContentStore;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SweeperConfig {
    pub enabled: bool,
    /// Seconds between sweeps
    pub interval_secs: u64,
    /// Blobs and temp files younger than this are left alone
    pub min_age_secs: u64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 300,
            min_age_secs: 3600,
        }
    }
}

/// Outcome of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub removed: usize,
    pub partial_writes: usize,
}

pub struct OrphanSweeper {
    store: Arc<dyn ContentStore>,
    services: Vec<Arc<ContentService>>,
    interval: Duration,
    min_age: Duration,
    log_target: String,
}

impl OrphanSweeper {
    pub fn new(
        store: Arc<dyn ContentStore>,
        services: Vec<Arc<ContentService>>,
        config: &SweeperConfig,
        log_target: impl Into<String>,
    ) -> Self {
        Self {
            store,
            services,
            interval: Duration::from_secs(config.interval_secs.max(1)),
            min_age: Duration::from_secs(config.min_age_secs),
            log_target: log_target.into(),
        }
    }

    fn is_referenced(&self, id: &crate::storage::ContentId) -> StoreResult<bool> {
        for service in &self.services {
            if service.references(id)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Run one pass over the store.
    pub fn sweep_once(&self) -> StoreResult<SweepReport> {
        let mut report = SweepReport {
            partial_writes: self.store.cleanup_partial_writes(self.min_age)?,
            ..SweepReport::default()
        };

        let now = SystemTime::now();
        for entry in self.store.list()? {
            report.scanned += 1;
            let age = now.duration_since(entry.modified).unwrap_or_default();
            if age < self.min_age || self.is_referenced(&entry.id)? {
                continue;
            }
            match self.store.delete(&entry.id) {
                Ok(()) => {
                    debug!(target: self.log_target.as_str(), "Removed orphaned blob {} ({} bytes)", entry.id, entry.size);
                    report.removed += 1;
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => warn!(target: self.log_target.as_str(), "Failed to remove orphaned blob {}: {}", entry.id, e),
            }
        }

        if report.removed > 0 || report.partial_writes > 0 {
            info!(target: self.log_target.as_str(), "Sweep removed {} orphaned blobs and {} partial writes ({} scanned)",
                  report.removed, report.partial_writes, report.scanned);
        }
        Ok(report)
    }

    /// Start the sweeper as a background task (non-blocking)
    pub fn start_background(self: Arc<Self>, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        info!(target: self.log_target.as_str(), "Starting orphan sweeper with {}s interval", self.interval.as_secs());

        tokio::spawn(async move {
            let mut interval = time::interval(self.interval);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!(target: self.log_target.as_str(), "Orphan sweeper stopped");
                        break;
                    }
                    _ = interval.tick() => {}
                }

                let sweeper = Arc::clone(&self);
                match tokio::task::spawn_blocking(move || sweeper.sweep_once()).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => error!(target: self.log_target.as_str(), "Sweep failed: {}", e),
                    Err(e) => error!(target: self.log_target.as_str(), "Sweep task panicked: {}", e),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::predicate::PageBounds;
    use crate::metadata::sqlite_store::Database;
    use crate::metadata::ContentKind;
    use crate::service::content_service::NewContent;
    use crate::service::user_context::UserContext;
    use crate::storage::mock_store::MockContentStore;

    fn setup(min_age_secs: u64) -> (Arc<MockContentStore>, Arc<ContentService>, OrphanSweeper) {
        let store = Arc::new(MockContentStore::new());
        let db = Database::open_in_memory().unwrap();
        let uploads = Arc::new(
            ContentService::new(ContentKind::Upload, db.clone(), store.clone(), PageBounds::GENERAL, "test::uploads").unwrap(),
        );
        let images = Arc::new(
            ContentService::new(ContentKind::Image, db, store.clone(), PageBounds::GENERAL, "test::images").unwrap(),
        );
        let config = SweeperConfig { enabled: true, interval_secs: 1, min_age_secs };
        let sweeper = OrphanSweeper::new(store.clone(), vec![uploads.clone(), images], &config, "test::sweeper");
        (store, uploads, sweeper)
    }

    #[test]
    fn test_sweep_removes_only_old_orphans() {
        let (store, uploads, sweeper) = setup(60);
        let ctx = UserContext::new(1);
        let kept = uploads
            .register(&ctx, NewContent { name: "kept".into(), ..NewContent::default() }, &mut &b"keep"[..])
            .unwrap();

        let old = SystemTime::now() - Duration::from_secs(3600);
        let orphan = store.insert_at(b"lost", old);
        let fresh = store.insert_at(b"in flight", SystemTime::now());

        let report = sweeper.sweep_once().unwrap();
        assert_eq!(report.scanned, 3);
        assert_eq!(report.removed, 1);
        assert!(!store.contains(&orphan));
        assert!(store.contains(&fresh));
        assert!(store.contains(&kept.content_ref));
    }

    #[test]
    fn test_soft_deleted_rows_still_protect_blobs() {
        let (store, uploads, sweeper) = setup(0);
        let ctx = UserContext::new(1);
        let record = uploads
            .register(&ctx, NewContent { name: "draft".into(), ..NewContent::default() }, &mut &b"v"[..])
            .unwrap();
        uploads.delete(&ctx, &record.content_ref).unwrap();

        assert_eq!(sweeper.sweep_once().unwrap().removed, 0);
        assert!(store.contains(&record.content_ref));

        uploads.force_delete(&ctx, &record.content_ref).unwrap();
        assert_eq!(sweeper.sweep_once().unwrap().removed, 1);
        assert_eq!(store.blob_count(), 0);
    }

    #[tokio::test]
    async fn test_background_sweeper_stops_on_shutdown() {
        let (_store, _uploads, sweeper) = setup(0);
        let shutdown = CancellationToken::new();
        let handle = Arc::new(sweeper).start_background(shutdown.clone());
        shutdown.cancel();
        assert!(handle.await.is_ok());
    }
}
