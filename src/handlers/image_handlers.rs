//! HTTP handlers for the image index: listing, upload, delete, on-demand
//! thumbnails and manual sync.

use axum::{
    Json,
    extract::{Multipart, Path, Query, State},
};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    errors::AppError,
    models::image::{ImageListResponse, ImageObject},
    naming,
    state::AppState,
    sync::SyncStats,
};

const MAX_PAGE_SIZE: u32 = 50;

/// Query params accepted by `GET /api/images/list`.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ThumbnailResponse {
    pub key: String,
    pub thumbnail_key: String,
    pub url: String,
}

/// GET `/api/images/list`: one page of the index, newest first.
pub async fn list_images(
    State(state): State<AppState>,
    Query(q): Query<ListQuery>,
) -> Result<Json<ImageListResponse>, AppError> {
    let page = q.page.unwrap_or(1);
    let page_size = q.page_size.unwrap_or(state.default_page_size);
    if page < 1 {
        return Err(AppError::bad_request("page must be >= 1"));
    }
    if !(1..=MAX_PAGE_SIZE).contains(&page_size) {
        return Err(AppError::bad_request(format!(
            "page_size must be between 1 and {MAX_PAGE_SIZE}"
        )));
    }

    let offset = i64::from(page - 1) * i64::from(page_size);
    let (records, total) = state.index.paginate(offset, i64::from(page_size)).await?;
    let has_more = offset + (records.len() as i64) < total;

    let items = records
        .into_iter()
        .map(|record| ImageObject::from_record(record, &state.endpoint))
        .collect();

    Ok(Json(ImageListResponse {
        items,
        has_more,
        total,
        current_page: page,
    }))
}

/// POST `/api/images/upload`: multipart form with a single `file` field.
pub async fn upload_image(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ImageObject>, AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(err.body_text()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let raw = field
            .bytes()
            .await
            .map_err(|err| AppError::bad_request(err.body_text()))?;

        let record = state.ingestor.ingest(raw, &content_type, &filename).await?;
        return Ok(Json(ImageObject::from_record(record, &state.endpoint)));
    }

    Err(AppError::bad_request("missing multipart field `file`"))
}

/// DELETE `/api/images/{key}`: remove the object, its thumbnail and its
/// index row. Deleting an absent key is not an error.
pub async fn delete_image(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<MessageResponse>, AppError> {
    let existed = state.ingestor.remove(&key).await?;
    if !existed {
        warn!(key = %key, "delete requested for key absent from bucket");
    }
    Ok(Json(MessageResponse {
        message: "Image deleted successfully".into(),
    }))
}

/// GET `/api/images/{key}/thumbnail`: generate-if-missing, then report
/// where the thumbnail lives.
pub async fn get_thumbnail(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<ThumbnailResponse>, AppError> {
    if naming::is_thumbnail_key(&key) {
        return Err(AppError::not_found(format!("`{key}` is not an image")));
    }
    let meta = state
        .store
        .head(&state.bucket, &key)
        .await?
        .ok_or_else(|| AppError::not_found(format!("`{key}` not found")))?;
    if !naming::is_image(&key, meta.content_type.as_deref()) {
        return Err(AppError::not_found(format!("`{key}` is not an image")));
    }
    let thumbnail_key = state
        .thumbnails
        .generate_if_missing(&key)
        .await
        .ok_or_else(|| AppError::not_found(format!("thumbnail for `{key}` is unavailable")))?;
    // The object may not be indexed yet; the next sync links it.
    state.index.set_thumbnail_ref(&key, &thumbnail_key).await?;

    Ok(Json(ThumbnailResponse {
        url: naming::object_url(&state.endpoint, &thumbnail_key),
        key,
        thumbnail_key,
    }))
}

/// POST `/api/images/sync`: run one reconciliation now.
pub async fn trigger_sync(State(state): State<AppState>) -> Result<Json<SyncStats>, AppError> {
    let stats = state.runner.trigger().await?;
    Ok(Json(stats))
}
