//! Striped mutexes keyed by (scope, owner, name).
//!
//! Held across lookup-delete-insert so two writers racing on the same name
//! serialize. Unrelated names may share a stripe; that only costs a wait.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, MutexGuard};

use crate::error::{StoreError, StoreResult};
use crate::service::user_context::OwnerId;

pub const DEFAULT_STRIPES: usize = 64;

pub struct NameLocks {
    stripes: Vec<Mutex<()>>,
}

impl NameLocks {
    pub fn new(stripes: usize) -> Self {
        Self {
            stripes: (0..stripes.max(1)).map(|_| Mutex::new(())).collect(),
        }
    }

    fn stripe(&self, scope: &str, owner: OwnerId, name: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        scope.hash(&mut hasher);
        owner.hash(&mut hasher);
        name.hash(&mut hasher);
        (hasher.finish() % self.stripes.len() as u64) as usize
    }

    pub fn lock(&self, scope: &str, owner: OwnerId, name: &str) -> StoreResult<MutexGuard<'_, ()>> {
        self.stripes[self.stripe(scope, owner, name)]
            .lock()
            .map_err(|_| StoreError::poisoned("name lock"))
    }
}

impl Default for NameLocks {
    fn default() -> Self {
        Self::new(DEFAULT_STRIPES)
    }
}
