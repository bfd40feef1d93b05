//! Attachment endpoints: multipart upload and removal.

use axum::extract::multipart::MultipartError;
use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use utoipa::ToSchema;

use marginalia_core::{AttachmentView, UploadRequest};

use super::{parse_id, MessageResponse};
use crate::auth::RequireUser;
use crate::error::ApiError;
use crate::state::AppState;

/// Name of the multipart field carrying the file.
pub const FILE_FIELD: &str = "file";

/// Multipart upload form.
#[derive(Debug, Deserialize, ToSchema)]
#[allow(dead_code)]
pub struct UploadForm {
    #[schema(value_type = String, format = Binary)]
    pub file: Vec<u8>,
}

fn multipart_error(e: MultipartError, limit: u64) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(format!("File exceeds the upload limit of {} bytes", limit))
    } else {
        ApiError::BadRequest(e.body_text())
    }
}

#[utoipa::path(
    post,
    path = "/api/notes/{id}/attachments",
    tag = "attachments",
    params(("id" = Uuid, Path, description = "Note id")),
    request_body(content = UploadForm, content_type = "multipart/form-data"),
    responses(
        (status = 201, description = "File stored and attached", body = AttachmentView),
        (status = 400, description = "No file in the request"),
        (status = 404, description = "No such note for this user"),
        (status = 413, description = "File over the upload limit"),
    )
)]
pub async fn upload_attachment(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
    Path(id): Path<String>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<AttachmentView>), ApiError> {
    let note_id = parse_id(&id, "note")?;
    let limit = state.lifecycle.max_upload_bytes();

    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, limit))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let original_name = field.file_name().unwrap_or_default().to_string();
        let mime_type = field.content_type().map(str::to_string);
        let data = field.bytes().await.map_err(|e| multipart_error(e, limit))?;
        upload = Some(UploadRequest {
            note_id,
            user_id: user.user_id,
            original_name,
            mime_type,
            data: data.to_vec(),
        });
        break;
    }

    let request = upload.ok_or_else(|| ApiError::BadRequest("No file provided".to_string()))?;
    let attachment = state.lifecycle.upload(request).await?;
    Ok((
        StatusCode::CREATED,
        Json(AttachmentView::new(attachment, state.listing.base_url())),
    ))
}

#[utoipa::path(
    delete,
    path = "/api/notes/{id}/attachments/{attachment_id}",
    tag = "attachments",
    params(
        ("id" = Uuid, Path, description = "Note id"),
        ("attachment_id" = Uuid, Path, description = "Attachment id"),
    ),
    responses(
        (status = 200, description = "Attachment removed", body = MessageResponse),
        (status = 404, description = "No such attachment on this user's note"),
    )
)]
pub async fn delete_attachment(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
    Path((id, attachment_id)): Path<(String, String)>,
) -> Result<Json<MessageResponse>, ApiError> {
    let note_id = parse_id(&id, "note")?;
    let attachment_id = parse_id(&attachment_id, "attachment")?;
    state
        .lifecycle
        .remove(attachment_id, note_id, user.user_id)
        .await?;
    Ok(Json(MessageResponse::new("Attachment deleted")))
}
