//! Content service: coordinates the content store with one content registry.
//!
//! Uploads and images are the same service with a different `ContentKind`.

use std::io::Read;
use std::sync::Arc;

use log::{debug, error, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::metadata::predicate::{Filters, PageBounds, PageRequest, Pagination};
use crate::metadata::sqlite_store::{Database, Registry};
use crate::metadata::{now_seconds, ContentKind, ContentRecord};
use crate::service::name_locks::NameLocks;
use crate::service::user_context::UserContext;
use crate::service::{require_name, since_filter, text_filter, ListParams};
use crate::storage::{BlobReader, ContentId, ContentStore};

/// Caller-supplied description of new content
#[derive(Debug, Clone, Default)]
pub struct NewContent {
    pub name: String,
    pub category: String,
    pub content_type: String,
    pub description: String,
    /// Declared length, 0 when unknown
    pub size_hint: u64,
}

pub struct ContentService {
    kind: ContentKind,
    registry: Registry<ContentRecord>,
    store: Arc<dyn ContentStore>,
    locks: NameLocks,
    bounds: PageBounds,
    log_target: String,
}

impl ContentService {
    pub fn new(
        kind: ContentKind,
        db: Database,
        store: Arc<dyn ContentStore>,
        bounds: PageBounds,
        log_target: impl Into<String>,
    ) -> StoreResult<Self> {
        let log_target = log_target.into();
        let registry = Registry::new(db, kind.table(), format!("{}::registry", log_target))?;
        Ok(Self {
            kind,
            registry,
            store,
            locks: NameLocks::default(),
            bounds,
            log_target,
        })
    }

    pub fn kind(&self) -> ContentKind {
        self.kind
    }

    /// Store `data` under a fresh content id and record it for the caller.
    ///
    /// A live record with the same name is replaced: its row and blob are
    /// removed first. If the new row cannot be written the new blob is
    /// deleted again, so a failure never leaves an orphan behind.
    pub fn register(&self, ctx: &UserContext, new: NewContent, data: &mut dyn Read) -> StoreResult<ContentRecord> {
        let name = require_name(&new.name)?;
        let content_type = new.content_type.trim().to_string();
        if !self.kind.accepts(&content_type) {
            return Err(StoreError::Validation(format!(
                "content type '{}' is not allowed for {}s",
                content_type,
                self.kind.label()
            )));
        }
        ctx.check_cancelled()?;

        let owner = ctx.owner_id;
        let _guard = self.locks.lock(self.kind.table(), owner, &name)?;

        match self.registry.find_by_name(owner, &name) {
            Ok(previous) => {
                info!(target: self.log_target.as_str(), "Replacing {} '{}' ({}) for owner {}",
                      self.kind.label(), name, previous.content_ref, owner);
                ignore_not_found(self.registry.force_delete(owner, &previous.content_ref))?;
                ignore_not_found(self.store.delete(&previous.content_ref))?;
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        let blob = self.store.put(ctx.cancellation(), new.size_hint, data)?;
        if let Err(e) = ctx.check_cancelled() {
            self.compensate(&blob.id);
            return Err(e);
        }

        let mut record = ContentRecord {
            id: 0,
            owner_id: owner,
            content_ref: blob.id.clone(),
            name,
            category: new.category.trim().to_string(),
            content_type,
            description: new.description,
            size: blob.size,
            checksum: blob.checksum,
            created_at: now_seconds(),
        };
        if let Err(e) = self.registry.create(&mut record) {
            error!(target: self.log_target.as_str(), "Failed to record {} {} for owner {}: {}",
                   self.kind.label(), blob.id, owner, e);
            self.compensate(&blob.id);
            return Err(e);
        }

        info!(target: self.log_target.as_str(), "Registered {} '{}' as {} ({} bytes) for owner {}",
              self.kind.label(), record.name, record.content_ref, record.size, owner);
        Ok(record)
    }

    fn compensate(&self, id: &ContentId) {
        if let Err(e) = ignore_not_found(self.store.delete(id)) {
            warn!(target: self.log_target.as_str(), "Could not remove unreferenced blob {}: {}", id, e);
        }
    }

    pub fn find_by_content_ref(&self, ctx: &UserContext, content_ref: &ContentId) -> StoreResult<ContentRecord> {
        self.registry.find_by_content_ref(ctx.owner_id, content_ref)
    }

    pub fn find_by_name(&self, ctx: &UserContext, name: &str) -> StoreResult<ContentRecord> {
        self.registry.find_by_name(ctx.owner_id, name.trim())
    }

    /// Open the blob behind a record the caller has already looked up
    pub fn open_content(&self, ctx: &UserContext, record: &ContentRecord) -> StoreResult<BlobReader> {
        ctx.check_cancelled()?;
        self.store.get(&record.content_ref)
    }

    /// Owner's live records; honours `category`, `content_type` and `since`.
    pub fn list(&self, ctx: &UserContext, params: &ListParams) -> StoreResult<(Vec<ContentRecord>, Pagination)> {
        let request = PageRequest::from_query(params.page.as_deref(), params.size.as_deref(), self.bounds);
        let filters = Filters::new()
            .with("category", text_filter(&params.category))
            .with("content_type", text_filter(&params.content_type))
            .with("created_at >=", since_filter(&params.since)?);

        debug!(target: self.log_target.as_str(), "Listing {}s for owner {} (offset {}, limit {})",
               self.kind.label(), ctx.owner_id, request.offset, request.limit);
        self.registry.list_by_owner(ctx.owner_id, request, &filters)
    }

    /// Soft delete. The blob stays until `discard_content` is called.
    pub fn delete(&self, ctx: &UserContext, content_ref: &ContentId) -> StoreResult<()> {
        ctx.check_cancelled()?;
        self.registry.soft_delete(ctx.owner_id, content_ref)
    }

    /// Remove the record permanently, soft-deleted or not.
    pub fn force_delete(&self, ctx: &UserContext, content_ref: &ContentId) -> StoreResult<()> {
        ctx.check_cancelled()?;
        self.registry.force_delete(ctx.owner_id, content_ref)
    }

    /// Remove a blob; an already-missing blob counts as removed.
    pub fn discard_content(&self, content_ref: &ContentId) -> StoreResult<()> {
        ignore_not_found(self.store.delete(content_ref))
    }

    /// Whether any row of this kind, live or soft-deleted, points at `content_ref`
    pub fn references(&self, content_ref: &ContentId) -> StoreResult<bool> {
        self.registry.references(content_ref)
    }
}

fn ignore_not_found(result: StoreResult<()>) -> StoreResult<()> {
    match result {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::mock_store::MockContentStore;
    use std::io::Read;

    fn service(kind: ContentKind) -> (Arc<MockContentStore>, ContentService) {
        let store = Arc::new(MockContentStore::new());
        let db = Database::open_in_memory().unwrap();
        let service = ContentService::new(kind, db, store.clone(), PageBounds::GENERAL, "test::content").unwrap();
        (store, service)
    }

    fn upload(name: &str) -> NewContent {
        NewContent {
            name: name.to_string(),
            content_type: "text/plain".to_string(),
            ..NewContent::default()
        }
    }

    fn read_all(mut reader: BlobReader) -> Vec<u8> {
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn test_register_and_lookup() {
        let (store, service) = service(ContentKind::Upload);
        let ctx = UserContext::new(1);

        let record = service.register(&ctx, upload("notes.txt"), &mut &b"hello"[..]).unwrap();
        assert!(record.id > 0);
        assert_eq!(record.size, 5);
        assert_eq!(record.checksum, format!("{:x}", md5::compute(b"hello")));
        assert!(store.contains(&record.content_ref));

        let by_ref = service.find_by_content_ref(&ctx, &record.content_ref).unwrap();
        let by_name = service.find_by_name(&ctx, "notes.txt").unwrap();
        assert_eq!(by_ref, record);
        assert_eq!(by_name, record);
        assert_eq!(read_all(service.open_content(&ctx, &record).unwrap()), b"hello");
    }

    #[test]
    fn test_replace_on_name_conflict() {
        let (store, service) = service(ContentKind::Upload);
        let ctx = UserContext::new(1);

        let first = service.register(&ctx, upload("report.pdf"), &mut &b"v1"[..]).unwrap();
        let second = service.register(&ctx, upload("report.pdf"), &mut &b"version two"[..]).unwrap();

        assert_ne!(first.content_ref, second.content_ref);
        assert!(!store.contains(&first.content_ref));
        assert!(store.contains(&second.content_ref));
        assert_eq!(store.blob_count(), 1);

        let current = service.find_by_name(&ctx, "report.pdf").unwrap();
        assert_eq!(current.content_ref, second.content_ref);
        assert!(service.find_by_content_ref(&ctx, &first.content_ref).unwrap_err().is_not_found());
    }

    #[test]
    fn test_blob_failure_leaves_no_metadata() {
        let (store, service) = service(ContentKind::Upload);
        let ctx = UserContext::new(1);
        store.set_fail_writes(true);

        let err = service.register(&ctx, upload("broken.bin"), &mut &b"data"[..]).unwrap_err();
        assert!(matches!(err, StoreError::Io(_)));
        assert!(service.find_by_name(&ctx, "broken.bin").unwrap_err().is_not_found());
        let (rows, pagination) = service.list(&ctx, &ListParams::default()).unwrap();
        assert!(rows.is_empty());
        assert_eq!(pagination.total, 0);
    }

    #[test]
    fn test_failed_insert_removes_new_blob() {
        let store = Arc::new(MockContentStore::new());
        let db = Database::open_in_memory().unwrap();
        let service = ContentService::new(ContentKind::Upload, db.clone(), store.clone(), PageBounds::GENERAL, "test::content").unwrap();
        let ctx = UserContext::new(1);
        let kept = service.register(&ctx, upload("kept.txt"), &mut &b"kept"[..]).unwrap();

        // lookups still work, only the insert is refused; RAISE(ABORT) is a constraint failure
        db.lock()
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER refuse_uploads BEFORE INSERT ON uploads
                 BEGIN SELECT RAISE(ABORT, 'insert refused'); END;",
            )
            .unwrap();

        let err = service.register(&ctx, upload("lost.txt"), &mut &b"never recorded"[..]).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(store.blob_count(), 1);
        assert!(store.contains(&kept.content_ref));
        assert!(service.find_by_name(&ctx, "lost.txt").unwrap_err().is_not_found());
    }

    #[test]
    fn test_canceled_register_writes_nothing() {
        let (store, service) = service(ContentKind::Upload);
        let ctx = UserContext::new(1);
        ctx.cancellation().cancel();

        let err = service.register(&ctx, upload("late.txt"), &mut &b"data"[..]).unwrap_err();
        assert!(matches!(err, StoreError::Canceled));
        assert_eq!(store.blob_count(), 0);
        assert!(service.find_by_name(&UserContext::new(1), "late.txt").unwrap_err().is_not_found());
    }

    #[test]
    fn test_soft_delete_then_force_delete() {
        let (store, service) = service(ContentKind::Upload);
        let ctx = UserContext::new(1);
        let record = service.register(&ctx, upload("a.txt"), &mut &b"abc"[..]).unwrap();

        service.delete(&ctx, &record.content_ref).unwrap();
        assert!(service.find_by_content_ref(&ctx, &record.content_ref).unwrap_err().is_not_found());
        assert!(service.list(&ctx, &ListParams::default()).unwrap().0.is_empty());
        assert!(service.references(&record.content_ref).unwrap());

        service.discard_content(&record.content_ref).unwrap();
        service.discard_content(&record.content_ref).unwrap();
        assert!(store.delete(&record.content_ref).unwrap_err().is_not_found());

        service.force_delete(&ctx, &record.content_ref).unwrap();
        assert!(!service.references(&record.content_ref).unwrap());
        assert!(service.force_delete(&ctx, &record.content_ref).unwrap_err().is_not_found());
    }

    #[test]
    fn test_owner_isolation() {
        let (_store, service) = service(ContentKind::Upload);
        let alice = UserContext::new(1);
        let bob = UserContext::new(2);

        let record = service.register(&alice, upload("shared-name"), &mut &b"alice"[..]).unwrap();
        assert!(service.find_by_content_ref(&bob, &record.content_ref).unwrap_err().is_not_found());
        assert!(service.find_by_name(&bob, "shared-name").unwrap_err().is_not_found());
        assert!(service.delete(&bob, &record.content_ref).unwrap_err().is_not_found());

        // same name for another owner is not a replacement
        service.register(&bob, upload("shared-name"), &mut &b"bob"[..]).unwrap();
        assert_eq!(service.find_by_name(&alice, "shared-name").unwrap().content_ref, record.content_ref);
    }

    #[test]
    fn test_image_kind_rejects_other_types() {
        let (store, service) = service(ContentKind::Image);
        let ctx = UserContext::new(1);

        let err = service.register(&ctx, upload("doc.txt"), &mut &b"text"[..]).unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
        assert_eq!(store.blob_count(), 0);

        let png = NewContent { content_type: "image/png".to_string(), ..upload("logo.png") };
        assert!(service.register(&ctx, png, &mut &b"\x89PNG"[..]).is_ok());
    }

    #[test]
    fn test_empty_name_rejected() {
        let (_store, service) = service(ContentKind::Upload);
        let err = service.register(&UserContext::new(1), upload("  "), &mut &b"x"[..]).unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[test]
    fn test_list_filters_and_pagination() {
        let (_store, service) = service(ContentKind::Upload);
        let ctx = UserContext::new(4);
        for i in 0..25 {
            let category = if i % 5 == 0 { "reports" } else { "misc" };
            let new = NewContent { category: category.to_string(), ..upload(&format!("f{}", i)) };
            service.register(&ctx, new, &mut &b"x"[..]).unwrap();
        }

        let params = ListParams { page: Some("3".into()), size: Some("10".into()), ..ListParams::default() };
        let (rows, pagination) = service.list(&ctx, &params).unwrap();
        assert_eq!(rows.len(), 5);
        assert_eq!(pagination, Pagination { total: 25, page: 3, size: 10 });

        let params = ListParams { category: Some("reports".into()), ..ListParams::default() };
        let (rows, pagination) = service.list(&ctx, &params).unwrap();
        assert_eq!(pagination.total, 5);
        assert!(rows.iter().all(|r| r.category == "reports"));

        let params = ListParams { since: Some("2999-01-01".into()), ..ListParams::default() };
        assert!(service.list(&ctx, &params).unwrap().0.is_empty());

        let params = ListParams { since: Some("yesterday".into()), ..ListParams::default() };
        assert!(matches!(service.list(&ctx, &params), Err(StoreError::Validation(_))));
    }

    #[test]
    fn test_concurrent_registers_keep_one_live_record() {
        use std::thread;

        let (store, service) = service(ContentKind::Upload);
        let service = Arc::new(service);
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let service = Arc::clone(&service);
                thread::spawn(move || {
                    let data = format!("writer {}", i).into_bytes();
                    service.register(&UserContext::new(9), upload("race.txt"), &mut data.as_slice()).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let (rows, _) = service.list(&UserContext::new(9), &ListParams::default()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(store.blob_count(), 1);
        assert!(store.contains(&rows[0].content_ref));
    }
}
