//! Request owner resolution.
//!
//! The authenticating proxy in front of the server places the caller's
//! numeric user id in the `User` header. Nothing here verifies it.

use actix_web::HttpRequest;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::error::{StoreError, StoreResult};
use crate::service::user_context::{OwnerId, UserContext};

pub const OWNER_HEADER: &str = "User";

/// Caller context for one request.
///
/// Dropping it (the handler future was dropped because the client went
/// away, or the handler finished) cancels the context's token, so blocking
/// work still holding a clone stops at its next checkpoint.
pub struct RequestOwner {
    pub ctx: UserContext,
    _guard: DropGuard,
}

impl RequestOwner {
    pub fn owner_id(&self) -> OwnerId {
        self.ctx.owner_id
    }

    /// Context to move into a blocking task
    pub fn context(&self) -> UserContext {
        self.ctx.clone()
    }
}

pub fn resolve_owner(req: &HttpRequest) -> StoreResult<RequestOwner> {
    let raw = req
        .headers()
        .get(OWNER_HEADER)
        .ok_or_else(|| StoreError::Validation("Missing User header".to_string()))?
        .to_str()
        .map_err(|_| StoreError::Validation("Invalid User header value".to_string()))?;
    let owner_id: OwnerId = raw
        .trim()
        .parse()
        .map_err(|_| StoreError::Validation(format!("User header is not a numeric id: {}", raw)))?;

    log_mdc::insert("owner", owner_id.to_string());

    let token = CancellationToken::new();
    let ctx = UserContext::with_cancellation(owner_id, token.clone());
    Ok(RequestOwner {
        ctx,
        _guard: token.drop_guard(),
    })
}
