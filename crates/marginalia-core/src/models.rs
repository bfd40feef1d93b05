//! Core data models for marginalia.
//!
//! These types are shared across all marginalia crates: the stored entities
//! (users, notes, attachments) and the read-optimized views handed to clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// USERS
// =============================================================================

/// A registered user. The password credential never leaves the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    #[serde(skip)]
    pub created_at: DateTime<Utc>,
}

/// A user together with the stored password hash, for credential checks.
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub user: User,
    pub password_hash: String,
}

/// Identity established from a verified bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub username: String,
}

/// Result of a successful registration or login.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct AuthSession {
    pub token: String,
    pub user: User,
}

// =============================================================================
// NOTES
// =============================================================================

/// Kind of note content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum NoteKind {
    /// Plain text
    #[default]
    Text,
    /// Source code snippet
    Code,
}

impl NoteKind {
    /// Value stored in the `notes.type` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Code => "code",
        }
    }
}

impl std::fmt::Display for NoteKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for NoteKind {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "code" => Ok(Self::Code),
            _ => Err(format!("Invalid note type: {}", s)),
        }
    }
}

/// A note row with its current hashtag set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct Note {
    pub id: Uuid,
    #[serde(skip)]
    pub user_id: Uuid,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: NoteKind,
    /// Manual ordering slot, ascending.
    pub position: i32,
    /// Creation time; breaks position ties, newest first.
    pub timestamp: DateTime<Utc>,
    /// Tags in insertion order.
    pub hashtags: Vec<String>,
}

/// One page of a user's notes in display order.
#[derive(Debug, Clone, Default)]
pub struct NotePage {
    pub notes: Vec<Note>,
    pub has_more: bool,
}

// =============================================================================
// ATTACHMENTS
// =============================================================================

/// Attachment metadata row. The bytes live in the blob store under `blob_key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct Attachment {
    pub id: Uuid,
    pub note_id: Uuid,
    pub blob_key: String,
    pub original_name: String,
    pub mime_type: String,
    pub size: i64,
    pub created_at: DateTime<Utc>,
}

/// Stage an upload reached. A failure at `BlobWritten` leaves an orphan blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStage {
    Requested,
    BlobWritten,
    RowInserted,
}

impl UploadStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::BlobWritten => "blob_written",
            Self::RowInserted => "row_inserted",
        }
    }
}

impl std::fmt::Display for UploadStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// MUTATION OUTCOMES
// =============================================================================

/// Result of deleting a note: the blob keys its attachments referenced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeletedNote {
    pub note_id: Uuid,
    pub removed_blob_keys: Vec<String>,
}

/// Result of a reorder batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ReorderOutcome {
    /// Distinct ids whose position was written.
    pub updated: u64,
    /// Distinct ids absent or owned by someone else.
    pub skipped: u64,
}

// =============================================================================
// VIEWS
// =============================================================================

/// Attachment as presented to clients, with a computed download URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentView {
    pub id: Uuid,
    pub note_id: Uuid,
    /// Blob key under which the file is served.
    pub filename: String,
    pub original_name: String,
    pub mime_type: String,
    pub size: i64,
    pub url: String,
}

impl AttachmentView {
    pub fn new(attachment: Attachment, base_url: &str) -> Self {
        let url = attachment_url(base_url, &attachment.blob_key);
        Self {
            id: attachment.id,
            note_id: attachment.note_id,
            filename: attachment.blob_key,
            original_name: attachment.original_name,
            mime_type: attachment.mime_type,
            size: attachment.size,
            url,
        }
    }
}

/// Note aggregate as listed: hashtags and attachments are never null.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct NoteView {
    pub id: Uuid,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: NoteKind,
    pub position: i32,
    pub timestamp: DateTime<Utc>,
    pub hashtags: Vec<String>,
    pub attachments: Vec<AttachmentView>,
}

impl NoteView {
    pub fn new(note: Note, attachments: Vec<AttachmentView>) -> Self {
        Self {
            id: note.id,
            content: note.content,
            kind: note.kind,
            position: note.position,
            timestamp: note.timestamp,
            hashtags: note.hashtags,
            attachments,
        }
    }
}

/// Response body of the note listing.
#[derive(Debug, Clone, Default, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NoteListing {
    pub notes: Vec<NoteView>,
    pub has_more: bool,
}

/// Public URL of a blob. Computed on every read, never stored.
pub fn attachment_url(base_url: &str, blob_key: &str) -> String {
    format!(
        "{}{}/{}",
        base_url.trim_end_matches('/'),
        crate::defaults::UPLOADS_ROUTE_PREFIX,
        blob_key
    )
}
