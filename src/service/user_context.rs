//! Per-request caller context: who is asking, and whether they still care.

use tokio_util::sync::CancellationToken;

use crate::error::{StoreError, StoreResult};

/// Owner identifier type
pub type OwnerId = i64;

/// Caller context passed into every service call.
///
/// The owner id is resolved upstream (the edge layer trusts whatever the
/// authenticating proxy placed on the request). The cancellation token is
/// checked between blocking steps so an abandoned request stops touching
/// the stores instead of running to completion.
#[derive(Debug, Clone)]
pub struct UserContext {
    pub owner_id: OwnerId,
    cancel: CancellationToken,
}

impl UserContext {
    /// Create a context that is never canceled unless asked to
    pub fn new(owner_id: OwnerId) -> Self {
        Self::with_cancellation(owner_id, CancellationToken::new())
    }

    pub fn with_cancellation(owner_id: OwnerId, cancel: CancellationToken) -> Self {
        Self { owner_id, cancel }
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Fail with `Canceled` once the caller has gone away.
    pub fn check_cancelled(&self) -> StoreResult<()> {
        if self.cancel.is_cancelled() {
            return Err(StoreError::Canceled);
        }
        Ok(())
    }
}
