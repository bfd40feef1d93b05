//! Blob download: `GET /uploads/{key}`.
//!
//! Only blobs referenced by an attachment row are served. Orphans 404.

use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};

use marginalia_core::defaults::FALLBACK_MIME_TYPE;
use marginalia_core::{is_valid_blob_key, is_valid_mime_type};

use crate::error::ApiError;
use crate::state::AppState;

#[utoipa::path(
    get,
    path = "/uploads/{key}",
    tag = "attachments",
    params(("key" = String, Path, description = "Blob key (the attachment filename)")),
    responses(
        (status = 200, description = "File bytes with the stored MIME type"),
        (status = 404, description = "No such attachment"),
    )
)]
pub async fn serve_upload(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Response, ApiError> {
    let missing = || ApiError::NotFound("File not found".to_string());
    if !is_valid_blob_key(&key) {
        return Err(missing());
    }

    let attachment = state
        .notes
        .attachment_by_blob_key(&key)
        .await?
        .ok_or_else(missing)?;

    let data = match state.blobs.get(&key).await {
        Ok(data) => data,
        Err(e) if e.is_not_found() => return Err(missing()),
        Err(e) => return Err(e.into()),
    };

    let content_type = if is_valid_mime_type(&attachment.mime_type) {
        attachment.mime_type
    } else {
        FALLBACK_MIME_TYPE.to_string()
    };

    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::X_CONTENT_TYPE_OPTIONS, "nosniff".to_string()),
        ],
        data,
    )
        .into_response())
}
