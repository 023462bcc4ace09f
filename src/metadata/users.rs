//! Account registry
//!
//! One row per registered user in the shared metadata database. The row id
//! is the owner id every other table is scoped by.

use chrono::{DateTime, Utc};
use log::{debug, info};
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;

use crate::error::{StoreError, StoreResult};
use crate::metadata::sqlite_store::Database;
use crate::metadata::{from_timestamp, to_timestamp};
use crate::service::user_context::OwnerId;

pub const USERS_TABLE: &str = "users";

const SELECT_COLUMNS: &str = "id, username, email, password_hash, created_at";

/// A stored account, password hash included
#[derive(Debug, Clone, PartialEq)]
pub struct UserRecord {
    pub id: OwnerId,
    pub username: String,
    pub email: String,
    /// PHC-format argon2 hash
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

impl UserRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            username: row.get(1)?,
            email: row.get(2)?,
            password_hash: row.get(3)?,
            created_at: from_timestamp(row.get(4)?),
        })
    }
}

/// The public face of an account
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserProfile {
    pub id: OwnerId,
    pub username: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

impl From<&UserRecord> for UserProfile {
    fn from(record: &UserRecord) -> Self {
        Self {
            id: record.id,
            username: record.username.clone(),
            email: record.email.clone(),
            created_at: record.created_at,
        }
    }
}

pub struct UserRegistry {
    db: Database,
    log_target: String,
}

impl UserRegistry {
    pub fn new(db: Database, log_target: impl Into<String>) -> StoreResult<Self> {
        let registry = Self {
            db,
            log_target: log_target.into(),
        };
        registry.db.lock()?.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL UNIQUE COLLATE NOCASE,
                email TEXT NOT NULL,
                password_hash TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );",
            USERS_TABLE
        ))?;
        debug!(target: registry.log_target.as_str(), "Schema ready for table {}", USERS_TABLE);
        Ok(registry)
    }

    /// Insert the account and write the assigned id back into `record`.
    /// `Conflict` when the username is taken, compared case-insensitively.
    pub fn create(&self, record: &mut UserRecord) -> StoreResult<()> {
        let conn = self.db.lock()?;
        conn.execute(
            &format!(
                "INSERT INTO {} (username, email, password_hash, created_at) VALUES (?1, ?2, ?3, ?4)",
                USERS_TABLE
            ),
            params![
                record.username,
                record.email,
                record.password_hash,
                to_timestamp(&record.created_at)
            ],
        )
        .map_err(|e| match StoreError::from(e) {
            StoreError::Conflict(_) => StoreError::Conflict(format!("username '{}' is taken", record.username)),
            other => other,
        })?;
        record.id = conn.last_insert_rowid();

        info!(target: self.log_target.as_str(), "Created user {} ('{}')", record.id, record.username);
        Ok(())
    }

    pub fn find_by_username(&self, username: &str) -> StoreResult<UserRecord> {
        self.find_one("username", &username)
            .and_then(|found| found.ok_or_else(|| StoreError::NotFound(format!("no user named '{}'", username))))
    }

    pub fn find_by_id(&self, id: OwnerId) -> StoreResult<UserRecord> {
        self.find_one("id", &id)
            .and_then(|found| found.ok_or_else(|| StoreError::NotFound(format!("no user with id {}", id))))
    }

    fn find_one(&self, column: &str, value: &dyn rusqlite::ToSql) -> StoreResult<Option<UserRecord>> {
        let sql = format!("SELECT {} FROM {} WHERE {} = ?1", SELECT_COLUMNS, USERS_TABLE, column);
        let conn = self.db.lock()?;
        Ok(conn.query_row(&sql, [value], UserRecord::from_row).optional()?)
    }

    /// Remove the account. Content the user owns is left to its own tables.
    pub fn delete(&self, id: OwnerId) -> StoreResult<()> {
        let conn = self.db.lock()?;
        let changed = conn.execute(&format!("DELETE FROM {} WHERE id = ?1", USERS_TABLE), [id])?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("no user with id {}", id)));
        }
        info!(target: self.log_target.as_str(), "Deleted user {}", id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::now_seconds;

    fn registry() -> UserRegistry {
        UserRegistry::new(Database::open_in_memory().unwrap(), "test::users").unwrap()
    }

    fn account(username: &str) -> UserRecord {
        UserRecord {
            id: 0,
            username: username.to_string(),
            email: format!("{}@example.com", username),
            password_hash: "$argon2id$placeholder".to_string(),
            created_at: now_seconds(),
        }
    }

    #[test]
    fn test_create_and_find() {
        let users = registry();
        let mut alice = account("alice");
        users.create(&mut alice).unwrap();
        assert!(alice.id > 0);

        assert_eq!(users.find_by_id(alice.id).unwrap(), alice);
        assert_eq!(users.find_by_username("alice").unwrap(), alice);
        assert_eq!(users.find_by_username("ALICE").unwrap().id, alice.id);
        assert!(users.find_by_username("bob").unwrap_err().is_not_found());
    }

    #[test]
    fn test_username_taken() {
        let users = registry();
        users.create(&mut account("carol")).unwrap();
        let err = users.create(&mut account("Carol")).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn test_delete() {
        let users = registry();
        let mut dave = account("dave");
        users.create(&mut dave).unwrap();

        users.delete(dave.id).unwrap();
        assert!(users.find_by_id(dave.id).unwrap_err().is_not_found());
        assert!(users.delete(dave.id).unwrap_err().is_not_found());

        // ids are never reused
        let mut again = account("dave");
        users.create(&mut again).unwrap();
        assert!(again.id > dave.id);
    }

    #[test]
    fn test_profile_hides_hash() {
        let record = account("erin");
        let json = serde_json::to_value(UserProfile::from(&record)).unwrap();
        assert_eq!(json["username"], "erin");
        assert!(json.get("password_hash").is_none());
    }
}
