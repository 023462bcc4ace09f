//! HTTP handlers for uploads, images, pages and accounts.
//!
//! Handlers resolve the owner, translate query and body fields into
//! service calls, and run those calls on the blocking pool.

use std::io::Read;

use actix_web::http::header;
use actix_web::{delete, get, post, put, web, HttpRequest, HttpResponse};
use bytes::{Bytes, BytesMut};
use futures::{stream, Stream, StreamExt};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::api::owner::resolve_owner;
use crate::app_state::AppState;
use crate::error::{StoreError, StoreResult};
use crate::metadata::predicate::Pagination;
use crate::metadata::{ContentKind, PageDraft};
use crate::service::content_service::NewContent;
use crate::service::user_service::{Credentials, Registration};
use crate::service::ListParams;
use crate::storage::{BlobReader, ContentId, STREAM_CHUNK_SIZE};

const LOG_TARGET: &str = "warp_vault::api";
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Deserialize)]
pub struct RegisterQuery {
    pub name: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ContentLookup {
    pub uuid: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ContentDelete {
    pub uuid: Option<String>,
    pub force: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct PageLookup {
    pub id: Option<i64>,
    pub name: Option<String>,
    pub force: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct Listing<T> {
    pub rows: Vec<T>,
    pub pagination: Pagination,
}

/// Run a service call on the blocking pool
async fn blocking<T, F>(f: F) -> StoreResult<T>
where
    F: FnOnce() -> StoreResult<T> + Send + 'static,
    T: Send + 'static,
{
    web::block(f).await?
}

fn required<'a>(value: &'a Option<String>, field: &str) -> StoreResult<&'a str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| StoreError::Validation(format!("missing query parameter: {}", field)))
}

fn content_ref(value: &Option<String>) -> StoreResult<ContentId> {
    ContentId::parse(required(value, "uuid")?)
}

fn declared_length(req: &HttpRequest) -> Option<u64> {
    req.headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Response body that reads the blob one chunk at a time on the blocking pool
fn blob_body(reader: BlobReader) -> impl Stream<Item = Result<Bytes, StoreError>> + 'static {
    stream::unfold(Some(reader), |state| async move {
        let Some(mut reader) = state else {
            return None;
        };
        let read = web::block(move || -> std::io::Result<(BlobReader, Vec<u8>)> {
            let mut buffer = vec![0u8; STREAM_CHUNK_SIZE];
            let n = reader.read(&mut buffer)?;
            buffer.truncate(n);
            Ok((reader, buffer))
        })
        .await;

        match read {
            Ok(Ok((_, buffer))) if buffer.is_empty() => None,
            Ok(Ok((reader, buffer))) => Some((Ok(Bytes::from(buffer)), Some(reader))),
            Ok(Err(e)) => {
                warn!(target: LOG_TARGET, "Blob read failed mid-response: {}", e);
                Some((Err(StoreError::from(e)), None))
            }
            Err(e) => Some((Err(StoreError::from(e)), None)),
        }
    })
}

// --- blob-backed resources ---

async fn register_content(
    kind: ContentKind,
    query: RegisterQuery,
    mut payload: web::Payload,
    req: HttpRequest,
    app_state: web::Data<AppState>,
) -> StoreResult<HttpResponse> {
    let owner = resolve_owner(&req)?;
    let name = required(&query.name, "name")?.to_string();
    let content_type = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(DEFAULT_CONTENT_TYPE)
        .to_string();
    debug!(target: LOG_TARGET, "{} upload '{}' ({}) for owner {}", kind.label(), name, content_type, owner.owner_id());

    let limit = app_state.config.server.max_payload_size;
    if declared_length(&req).is_some_and(|len| len > limit as u64) {
        return Err(StoreError::PayloadTooLarge(limit));
    }

    let mut bytes = BytesMut::new();
    while let Some(chunk) = payload.next().await {
        let chunk = chunk.map_err(|e| {
            warn!(target: LOG_TARGET, "Error reading payload chunk: {}", e);
            StoreError::Validation(format!("error reading request body: {}", e))
        })?;
        if bytes.len() + chunk.len() > limit {
            warn!(target: LOG_TARGET, "Rejecting {} '{}' for owner {}: body exceeds {} bytes",
                  kind.label(), name, owner.owner_id(), limit);
            return Err(StoreError::PayloadTooLarge(limit));
        }
        bytes.extend_from_slice(&chunk);
    }
    if bytes.is_empty() {
        return Err(StoreError::Validation("no data was uploaded".to_string()));
    }
    info!(target: LOG_TARGET, "Total received data size: {} bytes", bytes.len());

    let new = NewContent {
        name,
        category: query.category.unwrap_or_default(),
        content_type,
        description: query.description.unwrap_or_default(),
        size_hint: bytes.len() as u64,
    };
    let service = app_state.content(kind).clone();
    let ctx = owner.context();
    let body = bytes.freeze();
    let record = blocking(move || service.register(&ctx, new, &mut &body[..])).await?;

    Ok(HttpResponse::Created().json(record))
}

async fn fetch_content(
    kind: ContentKind,
    query: ContentLookup,
    req: HttpRequest,
    app_state: web::Data<AppState>,
) -> StoreResult<HttpResponse> {
    let owner = resolve_owner(&req)?;
    let by_ref = match query.uuid.as_deref() {
        Some(_) => Some(content_ref(&query.uuid)?),
        None => None,
    };
    let name = query.name.clone();
    if by_ref.is_none() && name.is_none() {
        return Err(StoreError::Validation("either uuid or name is required".to_string()));
    }

    let service = app_state.content(kind).clone();
    let ctx = owner.context();
    let (record, reader) = blocking(move || {
        let record = match by_ref {
            Some(id) => service.find_by_content_ref(&ctx, &id)?,
            None => service.find_by_name(&ctx, name.as_deref().unwrap_or_default())?,
        };
        let reader = service.open_content(&ctx, &record)?;
        Ok((record, reader))
    })
    .await?;

    let content_type = if record.content_type.is_empty() {
        DEFAULT_CONTENT_TYPE
    } else {
        record.content_type.as_str()
    };
    Ok(HttpResponse::Ok()
        .content_type(content_type)
        .insert_header((
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", record.name.replace(['"', '\\'], "_")),
        ))
        .insert_header((header::ETAG, format!("\"{}\"", record.checksum)))
        .no_chunking(record.size)
        .streaming(blob_body(reader)))
}

async fn remove_content(
    kind: ContentKind,
    query: ContentDelete,
    req: HttpRequest,
    app_state: web::Data<AppState>,
) -> StoreResult<HttpResponse> {
    let owner = resolve_owner(&req)?;
    let id = content_ref(&query.uuid)?;
    let force = query.force.unwrap_or(false);

    let service = app_state.content(kind).clone();
    let ctx = owner.context();
    blocking(move || {
        if force {
            service.force_delete(&ctx, &id)?;
        } else {
            service.delete(&ctx, &id)?;
        }
        service.discard_content(&id)
    })
    .await?;

    info!(target: LOG_TARGET, "Deleted {} for owner {} (force: {})", kind.label(), owner.owner_id(), force);
    Ok(HttpResponse::NoContent().finish())
}

async fn list_content(
    kind: ContentKind,
    params: ListParams,
    req: HttpRequest,
    app_state: web::Data<AppState>,
) -> StoreResult<HttpResponse> {
    let owner = resolve_owner(&req)?;
    let service = app_state.content(kind).clone();
    let ctx = owner.context();
    let (rows, pagination) = blocking(move || service.list(&ctx, &params)).await?;
    Ok(HttpResponse::Ok().json(Listing { rows, pagination }))
}

#[post("/upload")]
pub async fn post_upload(query: web::Query<RegisterQuery>, payload: web::Payload, req: HttpRequest, app_state: web::Data<AppState>) -> StoreResult<HttpResponse> {
    register_content(ContentKind::Upload, query.into_inner(), payload, req, app_state).await
}

#[get("/upload")]
pub async fn get_upload(query: web::Query<ContentLookup>, req: HttpRequest, app_state: web::Data<AppState>) -> StoreResult<HttpResponse> {
    fetch_content(ContentKind::Upload, query.into_inner(), req, app_state).await
}

#[delete("/upload")]
pub async fn delete_upload(query: web::Query<ContentDelete>, req: HttpRequest, app_state: web::Data<AppState>) -> StoreResult<HttpResponse> {
    remove_content(ContentKind::Upload, query.into_inner(), req, app_state).await
}

#[get("/uploads")]
pub async fn list_uploads(query: web::Query<ListParams>, req: HttpRequest, app_state: web::Data<AppState>) -> StoreResult<HttpResponse> {
    list_content(ContentKind::Upload, query.into_inner(), req, app_state).await
}

#[post("/image")]
pub async fn post_image(query: web::Query<RegisterQuery>, payload: web::Payload, req: HttpRequest, app_state: web::Data<AppState>) -> StoreResult<HttpResponse> {
    register_content(ContentKind::Image, query.into_inner(), payload, req, app_state).await
}

#[get("/image")]
pub async fn get_image(query: web::Query<ContentLookup>, req: HttpRequest, app_state: web::Data<AppState>) -> StoreResult<HttpResponse> {
    fetch_content(ContentKind::Image, query.into_inner(), req, app_state).await
}

#[delete("/image")]
pub async fn delete_image(query: web::Query<ContentDelete>, req: HttpRequest, app_state: web::Data<AppState>) -> StoreResult<HttpResponse> {
    remove_content(ContentKind::Image, query.into_inner(), req, app_state).await
}

#[get("/images")]
pub async fn list_images(query: web::Query<ListParams>, req: HttpRequest, app_state: web::Data<AppState>) -> StoreResult<HttpResponse> {
    list_content(ContentKind::Image, query.into_inner(), req, app_state).await
}

// --- pages ---

#[post("/page")]
pub async fn post_page(draft: web::Json<PageDraft>, req: HttpRequest, app_state: web::Data<AppState>) -> StoreResult<HttpResponse> {
    let owner = resolve_owner(&req)?;
    let pages = app_state.pages.clone();
    let ctx = owner.context();
    let draft = draft.into_inner();
    let page = blocking(move || pages.create(&ctx, draft)).await?;
    Ok(HttpResponse::Created().json(page))
}

#[put("/page")]
pub async fn put_page(query: web::Query<PageLookup>, draft: web::Json<PageDraft>, req: HttpRequest, app_state: web::Data<AppState>) -> StoreResult<HttpResponse> {
    let owner = resolve_owner(&req)?;
    let id = query
        .id
        .ok_or_else(|| StoreError::Validation("missing query parameter: id".to_string()))?;
    let pages = app_state.pages.clone();
    let ctx = owner.context();
    let draft = draft.into_inner();
    let page = blocking(move || pages.update(&ctx, id, draft)).await?;
    Ok(HttpResponse::Ok().json(page))
}

#[get("/page")]
pub async fn get_page(query: web::Query<PageLookup>, req: HttpRequest, app_state: web::Data<AppState>) -> StoreResult<HttpResponse> {
    let owner = resolve_owner(&req)?;
    let query = query.into_inner();
    if query.id.is_none() && query.name.is_none() {
        return Err(StoreError::Validation("either id or name is required".to_string()));
    }
    let pages = app_state.pages.clone();
    let ctx = owner.context();
    let page = blocking(move || match query.id {
        Some(id) => pages.get_by_id(&ctx, id),
        None => pages.get_by_name(&ctx, query.name.as_deref().unwrap_or_default()),
    })
    .await?;
    Ok(HttpResponse::Ok().json(page))
}

#[delete("/page")]
pub async fn delete_page(query: web::Query<PageLookup>, req: HttpRequest, app_state: web::Data<AppState>) -> StoreResult<HttpResponse> {
    let owner = resolve_owner(&req)?;
    let id = query
        .id
        .ok_or_else(|| StoreError::Validation("missing query parameter: id".to_string()))?;
    let force = query.force.unwrap_or(false);
    let pages = app_state.pages.clone();
    let ctx = owner.context();
    blocking(move || {
        if force {
            pages.force_delete(&ctx, id)
        } else {
            pages.delete(&ctx, id)
        }
    })
    .await?;
    Ok(HttpResponse::NoContent().finish())
}

#[get("/pages")]
pub async fn list_pages(query: web::Query<ListParams>, req: HttpRequest, app_state: web::Data<AppState>) -> StoreResult<HttpResponse> {
    let owner = resolve_owner(&req)?;
    let pages = app_state.pages.clone();
    let ctx = owner.context();
    let params = query.into_inner();
    let (rows, pagination) = blocking(move || pages.list(&ctx, &params)).await?;
    Ok(HttpResponse::Ok().json(Listing { rows, pagination }))
}

// --- accounts ---

#[post("/register")]
pub async fn post_register(registration: web::Json<Registration>, app_state: web::Data<AppState>) -> StoreResult<HttpResponse> {
    let users = app_state.users.clone();
    let registration = registration.into_inner();
    let profile = blocking(move || users.register(registration)).await?;
    Ok(HttpResponse::Created().json(profile))
}

#[post("/login")]
pub async fn post_login(credentials: web::Json<Credentials>, app_state: web::Data<AppState>) -> StoreResult<HttpResponse> {
    let users = app_state.users.clone();
    let credentials = credentials.into_inner();
    let profile = blocking(move || users.login(credentials)).await?;
    Ok(HttpResponse::Ok().json(profile))
}

#[get("/profile")]
pub async fn get_profile(req: HttpRequest, app_state: web::Data<AppState>) -> StoreResult<HttpResponse> {
    let owner = resolve_owner(&req)?;
    let users = app_state.users.clone();
    let ctx = owner.context();
    let profile = blocking(move || users.profile(&ctx)).await?;
    Ok(HttpResponse::Ok().json(profile))
}

#[delete("/profile")]
pub async fn delete_profile(req: HttpRequest, app_state: web::Data<AppState>) -> StoreResult<HttpResponse> {
    let owner = resolve_owner(&req)?;
    let users = app_state.users.clone();
    let ctx = owner.context();
    blocking(move || users.delete(&ctx)).await?;
    info!(target: LOG_TARGET, "Deleted account {}", owner.owner_id());
    Ok(HttpResponse::NoContent().finish())
}
