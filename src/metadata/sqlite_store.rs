//! SQLite implementation of the metadata registry

use std::fs;
use std::marker::PhantomData;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, info};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};

use crate::error::{StoreError, StoreResult};
use crate::metadata::config::MetadataConfig;
use crate::metadata::predicate::{build_where, Filters, PageRequest, Pagination};
use crate::metadata::{ContentRecord, MetadataRecord, PageRecord};
use crate::service::user_context::OwnerId;
use crate::storage::ContentId;

/// Shared connection to the metadata database
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(config: &MetadataConfig, log_target: &str) -> StoreResult<Self> {
        if config.is_in_memory() {
            return Self::open_in_memory();
        }

        if let Some(parent) = Path::new(&config.db_path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&config.db_path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        if config.wal_mode {
            let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
            info!(target: log_target, "Metadata database journal mode: {}", mode);
        }
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    pub(crate) fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::poisoned("metadata database"))
    }
}

/// Owner-scoped CRUD over one table of `R` rows.
///
/// Reads only ever see live rows (`deleted = 0`). A partial unique index
/// keeps live names unique per owner.
pub struct Registry<R> {
    db: Database,
    table: &'static str,
    log_target: String,
    select_columns: String,
    _record: PhantomData<fn() -> R>,
}

impl<R: MetadataRecord> Registry<R> {
    pub fn new(db: Database, table: &'static str, log_target: impl Into<String>) -> StoreResult<Self> {
        let registry = Self {
            db,
            table,
            log_target: log_target.into(),
            select_columns: format!("id, owner_id, {}", R::COLUMNS.join(", ")),
            _record: PhantomData,
        };
        registry.create_schema()?;
        Ok(registry)
    }

    fn create_schema(&self) -> StoreResult<()> {
        let conn = self.db.lock()?;
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner_id INTEGER NOT NULL,
                deleted INTEGER NOT NULL DEFAULT 0,
                {columns}
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_{table}_live_name
                ON {table} (owner_id, name) WHERE deleted = 0;
            CREATE INDEX IF NOT EXISTS idx_{table}_owner ON {table} (owner_id, deleted);",
            table = self.table,
            columns = R::COLUMN_DEFS,
        ))?;
        for statement in R::extra_schema() {
            conn.execute_batch(&statement.replace("{table}", self.table))?;
        }
        debug!(target: self.log_target.as_str(), "Schema ready for table {}", self.table);
        Ok(())
    }

    pub fn table(&self) -> &'static str {
        self.table
    }

    /// Insert a live row and write the assigned id back into `record`.
    pub fn create(&self, record: &mut R) -> StoreResult<()> {
        let placeholders: Vec<String> = (1..=R::COLUMNS.len() + 1).map(|n| format!("?{}", n)).collect();
        let sql = format!(
            "INSERT INTO {} (owner_id, {}) VALUES ({})",
            self.table,
            R::COLUMNS.join(", "),
            placeholders.join(", ")
        );

        let mut values = Vec::with_capacity(R::COLUMNS.len() + 1);
        values.push(Value::Integer(record.owner_id()));
        values.extend(record.values());

        let conn = self.db.lock()?;
        conn.execute(&sql, params_from_iter(values)).map_err(|e| {
            match StoreError::from(e) {
                StoreError::Conflict(_) => {
                    StoreError::Conflict(format!("a live {} row with this name already exists", self.table))
                }
                other => other,
            }
        })?;
        record.set_id(conn.last_insert_rowid());

        debug!(target: self.log_target.as_str(), "Created {} row {} for owner {}", self.table, record.id(), record.owner_id());
        Ok(())
    }

    /// Live row of `owner` whose `column` equals `value`
    pub(crate) fn find_by(&self, owner: OwnerId, column: &str, value: Value) -> StoreResult<R> {
        let sql = format!(
            "SELECT {} FROM {} WHERE owner_id = ?1 AND deleted = 0 AND {} = ?2 LIMIT 1",
            self.select_columns, self.table, column
        );
        let conn = self.db.lock()?;
        let found = conn
            .query_row(&sql, params_from_iter([Value::Integer(owner), value]), |row| R::from_row(row))
            .optional()?;
        found.ok_or_else(|| StoreError::NotFound(format!("no live {} row matches {}", self.table, column)))
    }

    /// One page of the owner's live rows, narrowed by `filters`
    pub fn list_by_owner(&self, owner: OwnerId, request: PageRequest, filters: &Filters) -> StoreResult<(Vec<R>, Pagination)> {
        let mut scoped = Filters::new()
            .with("owner_id", Value::Integer(owner))
            .with("deleted", Value::Integer(0));
        scoped.extend(filters);

        // LIMIT and OFFSET take ?1 and ?2
        let rows_clause = build_where(&scoped, 3);
        let rows_sql = format!(
            "SELECT {} FROM {} WHERE {} ORDER BY id LIMIT ?1 OFFSET ?2",
            self.select_columns, self.table, rows_clause.sql
        );
        let mut row_params = vec![
            Value::Integer(request.limit.min(i64::MAX as u64) as i64),
            Value::Integer(request.offset.min(i64::MAX as u64) as i64),
        ];
        row_params.extend(rows_clause.params);

        let count_clause = build_where(&scoped, 1);
        let count_sql = format!("SELECT COUNT(*) FROM {} WHERE {}", self.table, count_clause.sql);

        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(&rows_sql)?;
        let rows = stmt
            .query_map(params_from_iter(row_params), |row| R::from_row(row))?
            .collect::<Result<Vec<_>, _>>()?;
        let total: i64 = conn.query_row(&count_sql, params_from_iter(count_clause.params), |row| row.get(0))?;

        Ok((rows, Pagination::new(total.max(0) as u64, request.offset, request.limit)))
    }

    /// Flip `deleted` on the owner's live row; `NotFound` if there is none.
    pub(crate) fn soft_delete_by(&self, owner: OwnerId, column: &str, value: Value) -> StoreResult<()> {
        let sql = format!(
            "UPDATE {} SET deleted = 1 WHERE owner_id = ?1 AND deleted = 0 AND {} = ?2",
            self.table, column
        );
        let conn = self.db.lock()?;
        let changed = conn.execute(&sql, params_from_iter([Value::Integer(owner), value]))?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("no live {} row to delete", self.table)));
        }
        info!(target: self.log_target.as_str(), "Soft-deleted {} row(s) in {} for owner {}", changed, self.table, owner);
        Ok(())
    }

    /// Remove the owner's row whether or not it is soft-deleted.
    pub(crate) fn force_delete_by(&self, owner: OwnerId, column: &str, value: Value) -> StoreResult<()> {
        let sql = format!("DELETE FROM {} WHERE owner_id = ?1 AND {} = ?2", self.table, column);
        let conn = self.db.lock()?;
        let changed = conn.execute(&sql, params_from_iter([Value::Integer(owner), value]))?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("no {} row to delete", self.table)));
        }
        info!(target: self.log_target.as_str(), "Force-deleted {} row(s) from {} for owner {}", changed, self.table, owner);
        Ok(())
    }

    /// Overwrite every column of the owner's live row with the same id.
    pub fn update(&self, record: &R) -> StoreResult<()> {
        let assignments: Vec<String> = R::COLUMNS
            .iter()
            .enumerate()
            .map(|(i, column)| format!("{} = ?{}", column, i + 3))
            .collect();
        let sql = format!(
            "UPDATE {} SET {} WHERE id = ?1 AND owner_id = ?2 AND deleted = 0",
            self.table,
            assignments.join(", ")
        );

        let mut values = vec![Value::Integer(record.id()), Value::Integer(record.owner_id())];
        values.extend(record.values());

        let conn = self.db.lock()?;
        let changed = conn.execute(&sql, params_from_iter(values)).map_err(|e| match StoreError::from(e) {
            StoreError::Conflict(_) => {
                StoreError::Conflict(format!("another live {} row already holds this name", self.table))
            }
            other => other,
        })?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("no live {} row with id {}", self.table, record.id())));
        }
        debug!(target: self.log_target.as_str(), "Updated {} row {}", self.table, record.id());
        Ok(())
    }

    /// Whether any row, live or soft-deleted, of any owner has `column = value`
    pub fn is_referenced(&self, column: &str, value: Value) -> StoreResult<bool> {
        let sql = format!("SELECT EXISTS(SELECT 1 FROM {} WHERE {} = ?1)", self.table, column);
        let conn = self.db.lock()?;
        let exists: i64 = conn.query_row(&sql, [value], |row| row.get(0))?;
        Ok(exists != 0)
    }
}

fn text(value: &str) -> Value {
    Value::Text(value.to_string())
}

impl Registry<ContentRecord> {
    pub fn find_by_content_ref(&self, owner: OwnerId, content_ref: &ContentId) -> StoreResult<ContentRecord> {
        self.find_by(owner, "content_ref", text(content_ref.as_str()))
    }

    pub fn find_by_name(&self, owner: OwnerId, name: &str) -> StoreResult<ContentRecord> {
        self.find_by(owner, "name", text(name))
    }

    pub fn soft_delete(&self, owner: OwnerId, content_ref: &ContentId) -> StoreResult<()> {
        self.soft_delete_by(owner, "content_ref", text(content_ref.as_str()))
    }

    pub fn force_delete(&self, owner: OwnerId, content_ref: &ContentId) -> StoreResult<()> {
        self.force_delete_by(owner, "content_ref", text(content_ref.as_str()))
    }

    pub fn references(&self, content_ref: &ContentId) -> StoreResult<bool> {
        self.is_referenced("content_ref", text(content_ref.as_str()))
    }
}

impl Registry<PageRecord> {
    pub fn find_by_id(&self, owner: OwnerId, id: i64) -> StoreResult<PageRecord> {
        self.find_by(owner, "id", Value::Integer(id))
    }

    pub fn find_by_name(&self, owner: OwnerId, name: &str) -> StoreResult<PageRecord> {
        self.find_by(owner, "name", text(name))
    }

    pub fn soft_delete(&self, owner: OwnerId, id: i64) -> StoreResult<()> {
        self.soft_delete_by(owner, "id", Value::Integer(id))
    }

    pub fn force_delete(&self, owner: OwnerId, id: i64) -> StoreResult<()> {
        self.force_delete_by(owner, "id", Value::Integer(id))
    }
}
