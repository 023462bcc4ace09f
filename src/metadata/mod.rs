//! Metadata Registry Layer
//!
//! One relational table per resource kind. Upload and image rows share the
//! `ContentRecord` shape; pages carry their own `PageRecord`. Both go
//! through the same generic `Registry`, parameterized by `MetadataRecord`.

pub mod config;
pub mod predicate;
pub mod sqlite_store;
pub mod users;

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::Row;
use serde::{Deserialize, Serialize};

use crate::service::user_context::OwnerId;
use crate::storage::ContentId;

/// Shape of a row the generic registry can store.
///
/// Every table has `id`, `owner_id` and `deleted` managed by the registry.
/// `COLUMNS` lists the remaining columns in the order `values()` yields
/// them and `from_row` reads them (after `id` and `owner_id`).
pub trait MetadataRecord: Sized + Send {
    const COLUMNS: &'static [&'static str];

    /// Column definitions for `COLUMNS`, spliced into CREATE TABLE
    const COLUMN_DEFS: &'static str;

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;

    fn values(&self) -> Vec<Value>;

    fn id(&self) -> i64;

    fn set_id(&mut self, id: i64);

    fn owner_id(&self) -> OwnerId;

    /// Extra statements run after the table exists; `{table}` is replaced
    /// with the table name.
    fn extra_schema() -> &'static [&'static str] {
        &[]
    }
}

/// The two blob-backed resource kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContentKind {
    Upload,
    Image,
}

impl ContentKind {
    pub fn table(&self) -> &'static str {
        match self {
            ContentKind::Upload => "uploads",
            ContentKind::Image => "images",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ContentKind::Upload => "upload",
            ContentKind::Image => "image",
        }
    }

    /// Whether a declared content type is acceptable for this kind
    pub fn accepts(&self, content_type: &str) -> bool {
        match self {
            ContentKind::Upload => true,
            ContentKind::Image => content_type.trim().to_ascii_lowercase().starts_with("image/"),
        }
    }
}

pub const PAGES_TABLE: &str = "pages";

pub(crate) fn to_timestamp(at: &DateTime<Utc>) -> i64 {
    at.timestamp()
}

pub(crate) fn from_timestamp(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

/// Current time at the precision rows are stored with
pub(crate) fn now_seconds() -> DateTime<Utc> {
    from_timestamp(Utc::now().timestamp())
}

/// Metadata describing one stored blob (an upload or an image)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContentRecord {
    pub id: i64,
    pub owner_id: OwnerId,
    #[serde(rename = "uuid")]
    pub content_ref: ContentId,
    pub name: String,
    pub category: String,
    pub content_type: String,
    pub description: String,
    pub size: u64,
    pub checksum: String,
    pub created_at: DateTime<Utc>,
}

impl MetadataRecord for ContentRecord {
    const COLUMNS: &'static [&'static str] = &[
        "content_ref",
        "name",
        "category",
        "content_type",
        "description",
        "size",
        "checksum",
        "created_at",
    ];

    const COLUMN_DEFS: &'static str = "content_ref TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            category TEXT NOT NULL DEFAULT '',
            content_type TEXT NOT NULL DEFAULT '',
            description TEXT NOT NULL DEFAULT '',
            size INTEGER NOT NULL,
            checksum TEXT NOT NULL DEFAULT '',
            created_at INTEGER NOT NULL";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let content_ref: String = row.get(2)?;
        let content_ref = ContentId::parse(&content_ref).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
        })?;
        let size: i64 = row.get(7)?;
        Ok(Self {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            content_ref,
            name: row.get(3)?,
            category: row.get(4)?,
            content_type: row.get(5)?,
            description: row.get(6)?,
            size: size.max(0) as u64,
            checksum: row.get(8)?,
            created_at: from_timestamp(row.get(9)?),
        })
    }

    fn values(&self) -> Vec<Value> {
        vec![
            Value::Text(self.content_ref.to_string()),
            Value::Text(self.name.clone()),
            Value::Text(self.category.clone()),
            Value::Text(self.content_type.clone()),
            Value::Text(self.description.clone()),
            Value::Integer(self.size as i64),
            Value::Text(self.checksum.clone()),
            Value::Integer(to_timestamp(&self.created_at)),
        ]
    }

    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn owner_id(&self) -> OwnerId {
        self.owner_id
    }
}

/// A structured text page
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageRecord {
    pub id: i64,
    pub owner_id: OwnerId,
    pub name: String,
    pub meta: String,
    pub title: String,
    pub category: String,
    pub template: String,
    pub h1: String,
    pub content: String,
    pub content_short: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Caller-editable page fields, used for both create and update
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageDraft {
    pub name: String,
    pub meta: String,
    pub title: String,
    pub category: String,
    pub template: String,
    pub h1: String,
    pub content: String,
    pub content_short: String,
}

impl PageRecord {
    pub fn from_draft(owner_id: OwnerId, draft: PageDraft, now: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            owner_id,
            name: draft.name,
            meta: draft.meta,
            title: draft.title,
            category: draft.category,
            template: draft.template,
            h1: draft.h1,
            content: draft.content,
            content_short: draft.content_short,
            created_at: now,
            updated_at: now,
        }
    }

    /// Overwrite every editable field; identity and `created_at` stay.
    pub fn apply(&mut self, draft: PageDraft, now: DateTime<Utc>) {
        self.name = draft.name;
        self.meta = draft.meta;
        self.title = draft.title;
        self.category = draft.category;
        self.template = draft.template;
        self.h1 = draft.h1;
        self.content = draft.content;
        self.content_short = draft.content_short;
        self.updated_at = now;
    }
}

impl MetadataRecord for PageRecord {
    const COLUMNS: &'static [&'static str] = &[
        "name",
        "meta",
        "title",
        "category",
        "template",
        "h1",
        "content",
        "content_short",
        "created_at",
        "updated_at",
    ];

    const COLUMN_DEFS: &'static str = "name TEXT NOT NULL,
            meta TEXT NOT NULL DEFAULT '',
            title TEXT NOT NULL DEFAULT '',
            category TEXT NOT NULL DEFAULT '',
            template TEXT NOT NULL DEFAULT '',
            h1 TEXT NOT NULL DEFAULT '',
            content TEXT NOT NULL DEFAULT '',
            content_short TEXT NOT NULL DEFAULT '',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            name: row.get(2)?,
            meta: row.get(3)?,
            title: row.get(4)?,
            category: row.get(5)?,
            template: row.get(6)?,
            h1: row.get(7)?,
            content: row.get(8)?,
            content_short: row.get(9)?,
            created_at: from_timestamp(row.get(10)?),
            updated_at: from_timestamp(row.get(11)?),
        })
    }

    fn values(&self) -> Vec<Value> {
        vec![
            Value::Text(self.name.clone()),
            Value::Text(self.meta.clone()),
            Value::Text(self.title.clone()),
            Value::Text(self.category.clone()),
            Value::Text(self.template.clone()),
            Value::Text(self.h1.clone()),
            Value::Text(self.content.clone()),
            Value::Text(self.content_short.clone()),
            Value::Integer(to_timestamp(&self.created_at)),
            Value::Integer(to_timestamp(&self.updated_at)),
        ]
    }

    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn owner_id(&self) -> OwnerId {
        self.owner_id
    }

    fn extra_schema() -> &'static [&'static str] {
        &["CREATE INDEX IF NOT EXISTS idx_{table}_updated ON {table} (owner_id, updated_at)"]
    }
}
