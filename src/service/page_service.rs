//! Page service: structured text records without a blob.

use log::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::metadata::predicate::{Filters, PageBounds, PageRequest, Pagination};
use crate::metadata::sqlite_store::{Database, Registry};
use crate::metadata::{now_seconds, PageDraft, PageRecord, PAGES_TABLE};
use crate::service::name_locks::NameLocks;
use crate::service::user_context::UserContext;
use crate::service::{require_name, since_filter, text_filter, ListParams};

pub struct PageService {
    registry: Registry<PageRecord>,
    locks: NameLocks,
    bounds: PageBounds,
    log_target: String,
}

impl PageService {
    pub fn new(db: Database, bounds: PageBounds, log_target: impl Into<String>) -> StoreResult<Self> {
        let log_target = log_target.into();
        let registry = Registry::new(db, PAGES_TABLE, format!("{}::registry", log_target))?;
        Ok(Self {
            registry,
            locks: NameLocks::default(),
            bounds,
            log_target,
        })
    }

    /// Create a page. Unlike uploads, an existing live page with the same
    /// name is never replaced.
    pub fn create(&self, ctx: &UserContext, mut draft: PageDraft) -> StoreResult<PageRecord> {
        draft.name = require_name(&draft.name)?;
        ctx.check_cancelled()?;

        let owner = ctx.owner_id;
        let _guard = self.locks.lock(PAGES_TABLE, owner, &draft.name)?;
        match self.registry.find_by_name(owner, &draft.name) {
            Ok(_) => return Err(name_taken(&draft.name)),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        let mut page = PageRecord::from_draft(owner, draft, now_seconds());
        self.registry.create(&mut page)?;
        info!(target: self.log_target.as_str(), "Created page {} '{}' for owner {}", page.id, page.name, owner);
        Ok(page)
    }

    /// Replace every editable field of a live page.
    pub fn update(&self, ctx: &UserContext, id: i64, mut draft: PageDraft) -> StoreResult<PageRecord> {
        draft.name = require_name(&draft.name)?;
        ctx.check_cancelled()?;

        let owner = ctx.owner_id;
        let _guard = self.locks.lock(PAGES_TABLE, owner, &draft.name)?;
        let mut page = self.registry.find_by_id(owner, id)?;

        if page.name != draft.name {
            match self.registry.find_by_name(owner, &draft.name) {
                Ok(other) if other.id != id => return Err(name_taken(&draft.name)),
                Ok(_) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }

        page.apply(draft, now_seconds());
        self.registry.update(&page)?;
        debug!(target: self.log_target.as_str(), "Updated page {} for owner {}", id, owner);
        Ok(page)
    }

    pub fn get_by_id(&self, ctx: &UserContext, id: i64) -> StoreResult<PageRecord> {
        self.registry.find_by_id(ctx.owner_id, id)
    }

    pub fn get_by_name(&self, ctx: &UserContext, name: &str) -> StoreResult<PageRecord> {
        self.registry.find_by_name(ctx.owner_id, name.trim())
    }

    /// Owner's live pages; honours `category`, `template` and `since` (on `updated_at`).
    pub fn list(&self, ctx: &UserContext, params: &ListParams) -> StoreResult<(Vec<PageRecord>, Pagination)> {
        let request = PageRequest::from_query(params.page.as_deref(), params.size.as_deref(), self.bounds);
        let filters = Filters::new()
            .with("category", text_filter(&params.category))
            .with("template", text_filter(&params.template))
            .with("updated_at >=", since_filter(&params.since)?);
        self.registry.list_by_owner(ctx.owner_id, request, &filters)
    }

    pub fn delete(&self, ctx: &UserContext, id: i64) -> StoreResult<()> {
        ctx.check_cancelled()?;
        self.registry.soft_delete(ctx.owner_id, id)
    }

    pub fn force_delete(&self, ctx: &UserContext, id: i64) -> StoreResult<()> {
        ctx.check_cancelled()?;
        self.registry.force_delete(ctx.owner_id, id)
    }
}

fn name_taken(name: &str) -> StoreError {
    StoreError::Conflict(format!("a page named '{}' already exists", name))
}
