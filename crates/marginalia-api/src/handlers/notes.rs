//! Note endpoints: create, list, update, reorder, delete.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use marginalia_core::{NoteDraft, NoteKind, NoteListing, NoteView, PageRequest};

use super::{parse_id, MessageResponse};
use crate::auth::RequireUser;
use crate::error::ApiError;
use crate::state::AppState;

/// Body of note create and update.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct NoteInput {
    #[serde(default)]
    pub content: String,
    /// `text` (default) or `code`.
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub hashtags: Vec<String>,
}

impl NoteInput {
    fn into_draft(self) -> Result<NoteDraft, ApiError> {
        let kind = match self.kind.as_deref().map(str::trim) {
            None | Some("") => NoteKind::default(),
            Some(raw) => raw.parse::<NoteKind>().map_err(ApiError::BadRequest)?,
        };
        Ok(NoteDraft::new(self.content, kind, self.hashtags)?)
    }
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListQuery {
    /// Notes to skip (default 0).
    pub offset: Option<i64>,
    /// Page size, 1..=100.
    pub limit: Option<i64>,
}

/// Body of the reorder request: note ids in display order.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ReorderInput {
    #[serde(rename = "noteIds")]
    pub note_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReorderResponse {
    pub message: String,
    pub updated: u64,
    pub skipped: u64,
}

#[utoipa::path(
    post,
    path = "/api/notes",
    tag = "notes",
    request_body = NoteInput,
    responses(
        (status = 201, description = "Note created", body = NoteView),
        (status = 400, description = "Empty content, unknown type or bad hashtag"),
        (status = 401, description = "Authentication required"),
    )
)]
pub async fn create_note(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
    Json(body): Json<NoteInput>,
) -> Result<(StatusCode, Json<NoteView>), ApiError> {
    let draft = body.into_draft()?;
    let note = state.notes.create_note(user.user_id, draft).await?;
    info!(note_id = %note.id, user_id = %user.user_id, "Note created");
    Ok((StatusCode::CREATED, Json(NoteView::new(note, Vec::new()))))
}

#[utoipa::path(
    get,
    path = "/api/notes",
    tag = "notes",
    params(ListQuery),
    responses(
        (status = 200, description = "One page of notes in display order", body = NoteListing),
        (status = 400, description = "Offset or limit out of range"),
        (status = 401, description = "Authentication required"),
    )
)]
pub async fn list_notes(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<NoteListing>, ApiError> {
    let page = PageRequest::new(query.offset, query.limit, state.config.page_limit)?;
    let listing = state.listing.assemble(user.user_id, page).await?;
    debug!(result_count = listing.notes.len(), has_more = listing.has_more, "Notes listed");
    Ok(Json(listing))
}

#[utoipa::path(
    put,
    path = "/api/notes/{id}",
    tag = "notes",
    params(("id" = Uuid, Path, description = "Note id")),
    request_body = NoteInput,
    responses(
        (status = 200, description = "Note updated", body = MessageResponse),
        (status = 400, description = "Invalid input"),
        (status = 404, description = "No such note for this user"),
    )
)]
pub async fn update_note(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
    Path(id): Path<String>,
    Json(body): Json<NoteInput>,
) -> Result<Json<MessageResponse>, ApiError> {
    let note_id = parse_id(&id, "note")?;
    let draft = body.into_draft()?;
    state.notes.update_note(note_id, user.user_id, draft).await?;
    info!(note_id = %note_id, "Note updated");
    Ok(Json(MessageResponse::new("Note updated")))
}

#[utoipa::path(
    put,
    path = "/api/notes/reorder",
    tag = "notes",
    request_body = ReorderInput,
    responses(
        (status = 200, description = "Positions assigned by index", body = ReorderResponse),
        (status = 401, description = "Authentication required"),
    )
)]
pub async fn reorder_notes(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
    Json(body): Json<ReorderInput>,
) -> Result<Json<ReorderResponse>, ApiError> {
    // Ids that do not parse cannot be owned, so they count as skipped.
    let ids: Vec<Uuid> = body
        .note_ids
        .iter()
        .filter_map(|raw| Uuid::parse_str(raw).ok())
        .collect();
    let unparsed = (body.note_ids.len() - ids.len()) as u64;

    let outcome = state.notes.reorder_notes(user.user_id, &ids).await?;
    Ok(Json(ReorderResponse {
        message: "Order updated".to_string(),
        updated: outcome.updated,
        skipped: outcome.skipped + unparsed,
    }))
}

#[utoipa::path(
    delete,
    path = "/api/notes/{id}",
    tag = "notes",
    params(("id" = Uuid, Path, description = "Note id")),
    responses(
        (status = 200, description = "Note deleted; attachment blobs are purged afterwards", body = MessageResponse),
        (status = 404, description = "No such note for this user"),
    )
)]
pub async fn delete_note(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    let note_id = parse_id(&id, "note")?;
    state.lifecycle.delete_note(note_id, user.user_id).await?;
    Ok(Json(MessageResponse::new("Note deleted")))
}
