//! Account service: registration, credential checks and profile access.
//!
//! Issuing and verifying bearer tokens is the proxy's job. It calls `login`
//! and forwards the returned id in the `User` header on later requests.

use log::{debug, info};
use serde::Deserialize;

use crate::error::{StoreError, StoreResult};
use crate::metadata::now_seconds;
use crate::metadata::sqlite_store::Database;
use crate::metadata::users::{UserProfile, UserRecord, UserRegistry};
use crate::service::password::{hash_password, verify_password};
use crate::service::user_context::UserContext;

const USERNAME_LEN: std::ops::RangeInclusive<usize> = 3..=50;
const EMAIL_LEN: std::ops::RangeInclusive<usize> = 3..=254;
const MIN_PASSWORD_LEN: usize = 8;

#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct Registration {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

pub struct UserService {
    registry: UserRegistry,
    log_target: String,
}

impl UserService {
    pub fn new(db: Database, log_target: impl Into<String>) -> StoreResult<Self> {
        let log_target = log_target.into();
        let registry = UserRegistry::new(db, format!("{}::registry", log_target))?;
        Ok(Self { registry, log_target })
    }

    pub fn register(&self, registration: Registration) -> StoreResult<UserProfile> {
        let username = registration.username.trim().to_string();
        if !USERNAME_LEN.contains(&username.chars().count()) {
            return Err(StoreError::Validation("username must be 3 to 50 characters".to_string()));
        }
        let email = normalize_email(&registration.email)?;
        if registration.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(StoreError::Validation(format!(
                "password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }

        let mut record = UserRecord {
            id: 0,
            username,
            email,
            password_hash: hash_password(&registration.password)?,
            created_at: now_seconds(),
        };
        self.registry.create(&mut record)?;
        info!(target: self.log_target.as_str(), "Registered user {} ('{}')", record.id, record.username);
        Ok(UserProfile::from(&record))
    }

    /// Check credentials. Unknown users and wrong passwords are
    /// indistinguishable to the caller.
    pub fn login(&self, credentials: Credentials) -> StoreResult<UserProfile> {
        let username = credentials.username.trim();
        let record = match self.registry.find_by_username(username) {
            Ok(record) => record,
            Err(e) if e.is_not_found() => return Err(invalid_credentials()),
            Err(e) => return Err(e),
        };
        if !verify_password(&credentials.password, &record.password_hash)? {
            debug!(target: self.log_target.as_str(), "Password mismatch for user {}", record.id);
            return Err(invalid_credentials());
        }
        Ok(UserProfile::from(&record))
    }

    pub fn profile(&self, ctx: &UserContext) -> StoreResult<UserProfile> {
        self.registry.find_by_id(ctx.owner_id).map(|record| UserProfile::from(&record))
    }

    pub fn delete(&self, ctx: &UserContext) -> StoreResult<()> {
        ctx.check_cancelled()?;
        self.registry.delete(ctx.owner_id)
    }
}

fn invalid_credentials() -> StoreError {
    StoreError::Unauthorized("invalid credentials".to_string())
}

fn normalize_email(raw: &str) -> StoreResult<String> {
    let email = raw.trim().to_lowercase();
    let well_formed = EMAIL_LEN.contains(&email.len())
        && !email.chars().any(char::is_whitespace)
        && matches!(email.split_once('@'), Some((local, domain)) if !local.is_empty() && !domain.is_empty() && !domain.contains('@'));
    if !well_formed {
        return Err(StoreError::Validation(format!("invalid email address: {}", raw)));
    }
    Ok(email)
}
