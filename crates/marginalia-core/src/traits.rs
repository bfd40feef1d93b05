//! Core traits for marginalia storage and authentication.
//!
//! The relational store, the blob store and the auth gateway sit behind
//! these traits so that the coordinators and the HTTP layer can run against
//! PostgreSQL and the filesystem in production and in-memory doubles in tests.

use async_trait::async_trait;
use uuid::Uuid;

use crate::defaults;
use crate::error::{Error, Result};
use crate::models::*;

// =============================================================================
// REQUEST TYPES
// =============================================================================

/// Validated content of a create or update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteDraft {
    pub content: String,
    pub kind: NoteKind,
    pub hashtags: Vec<String>,
}

impl NoteDraft {
    /// Validate content and normalize the hashtag set.
    pub fn new(content: impl Into<String>, kind: NoteKind, hashtags: Vec<String>) -> Result<Self> {
        let content = content.into();
        if content.trim().is_empty() {
            return Err(Error::InvalidInput("Note content is required".to_string()));
        }
        Ok(Self {
            content,
            kind,
            hashtags: normalize_hashtags(hashtags)?,
        })
    }
}

/// Trim tags, drop blanks and collapse duplicates keeping first occurrence order.
pub fn normalize_hashtags(tags: Vec<String>) -> Result<Vec<String>> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim();
        if tag.is_empty() {
            continue;
        }
        if tag.chars().count() > defaults::HASHTAG_MAX_LEN {
            return Err(Error::InvalidInput(format!(
                "Hashtag exceeds {} characters",
                defaults::HASHTAG_MAX_LEN
            )));
        }
        if !out.iter().any(|t| t == tag) {
            out.push(tag.to_string());
        }
    }
    Ok(out)
}

/// Offset pagination over a user's notes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub offset: i64,
    pub limit: i64,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            offset: defaults::PAGE_OFFSET,
            limit: defaults::PAGE_LIMIT,
        }
    }
}

impl PageRequest {
    /// Build from optional query values. `limit` must be within `1..=PAGE_LIMIT_MAX`.
    pub fn new(offset: Option<i64>, limit: Option<i64>, default_limit: i64) -> Result<Self> {
        let offset = offset.unwrap_or(defaults::PAGE_OFFSET);
        if offset < 0 {
            return Err(Error::InvalidInput("offset must not be negative".to_string()));
        }
        let limit = limit.unwrap_or(default_limit);
        if !(1..=defaults::PAGE_LIMIT_MAX).contains(&limit) {
            return Err(Error::InvalidInput(format!(
                "limit must be between 1 and {}",
                defaults::PAGE_LIMIT_MAX
            )));
        }
        Ok(Self { offset, limit })
    }
}

/// Metadata row to insert once the blob is durable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAttachment {
    pub note_id: Uuid,
    pub blob_key: String,
    pub original_name: String,
    pub mime_type: String,
    pub size: i64,
}

/// User row to insert at registration. The password is already hashed.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
}

// =============================================================================
// NOTE AGGREGATE STORE
// =============================================================================

/// Relational store for the note aggregate: note row, hashtag set and
/// attachment metadata rows. Every mutation is one transaction, and every
/// lookup is scoped to the owning user. A note owned by someone else is
/// reported as not found.
#[async_trait]
pub trait NoteStore: Send + Sync {
    /// Insert a note and its hashtags, placed ahead of the user's existing notes.
    async fn create_note(&self, user_id: Uuid, draft: NoteDraft) -> Result<Note>;

    /// Page of notes ordered by position ascending, then timestamp descending.
    async fn list_notes(&self, user_id: Uuid, page: PageRequest) -> Result<NotePage>;

    /// Replace content, kind and the whole hashtag set.
    async fn update_note(&self, note_id: Uuid, user_id: Uuid, draft: NoteDraft) -> Result<()>;

    /// Delete a note with its hashtags and attachment rows, returning the blob
    /// keys those rows referenced.
    async fn delete_note(&self, note_id: Uuid, user_id: Uuid) -> Result<DeletedNote>;

    /// Set `position = index` for each owned id. Unknown or foreign ids are skipped.
    async fn reorder_notes(&self, user_id: Uuid, ordered_ids: &[Uuid]) -> Result<ReorderOutcome>;

    /// Whether the note exists and belongs to the user.
    async fn note_owned_by(&self, note_id: Uuid, user_id: Uuid) -> Result<bool>;

    /// Insert an attachment row if the note still belongs to the user.
    async fn insert_attachment(&self, user_id: Uuid, attachment: NewAttachment)
        -> Result<Attachment>;

    /// Delete an attachment row scoped through note ownership, returning it.
    async fn remove_attachment(
        &self,
        attachment_id: Uuid,
        note_id: Uuid,
        user_id: Uuid,
    ) -> Result<Attachment>;

    /// Attachment rows for exactly the given notes, oldest first.
    async fn attachments_for_notes(&self, user_id: Uuid, note_ids: &[Uuid])
        -> Result<Vec<Attachment>>;

    /// Attachment row referencing a blob key, if any.
    async fn attachment_by_blob_key(&self, blob_key: &str) -> Result<Option<Attachment>>;

    /// Every blob key referenced by an attachment row.
    async fn all_blob_keys(&self) -> Result<Vec<String>>;
}

// =============================================================================
// BLOB STORE
// =============================================================================

/// Key to bytes storage for attachment content. No locking: distinct keys are
/// independent, and a read racing a delete of the same key may see not found.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store bytes under `key`. Fails with `PayloadTooLarge` before writing
    /// anything when the data exceeds `max_blob_size`.
    async fn put(&self, key: &str, data: &[u8]) -> Result<()>;

    /// Read bytes. Missing keys fail with `NotFound`.
    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Remove bytes. Missing keys are not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// All stored keys, for reconciliation scans.
    async fn list_keys(&self) -> Result<Vec<String>>;

    /// Size ceiling in bytes.
    fn max_blob_size(&self) -> u64;
}

// =============================================================================
// USERS AND AUTH
// =============================================================================

/// Persistence for user accounts.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a user. Duplicate username or email fails with `Conflict`.
    async fn create_user(&self, user: NewUser) -> Result<User>;

    /// Look up by username or email.
    async fn find_credentials(&self, login: &str) -> Result<Option<UserCredentials>>;
}

/// Issues and verifies session tokens.
#[async_trait]
pub trait AuthGateway: Send + Sync {
    async fn register(&self, username: &str, email: &str, password: &str) -> Result<AuthSession>;

    /// `login` is a username or an email. Bad credentials fail with `Unauthorized`.
    async fn login(&self, login: &str, password: &str) -> Result<AuthSession>;

    fn verify(&self, token: &str) -> Result<AuthenticatedUser>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn tags(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_normalize_hashtags_trims_and_dedupes() {
        let out = normalize_hashtags(tags(&[" #todo", "#home ", "#todo", "", "   "])).unwrap();
        assert_eq!(out, tags(&["#todo", "#home"]));
    }

    #[test]
    fn test_normalize_hashtags_rejects_overlong_tag() {
        let long = "x".repeat(defaults::HASHTAG_MAX_LEN + 1);
        let err = normalize_hashtags(vec![long]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_normalize_hashtags_accepts_tag_at_limit() {
        let tag = "y".repeat(defaults::HASHTAG_MAX_LEN);
        assert_eq!(normalize_hashtags(vec![tag.clone()]).unwrap(), vec![tag]);
    }

    #[test]
    fn test_note_draft_rejects_blank_content() {
        let err = NoteDraft::new("   \n", NoteKind::Text, vec![]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_note_draft_keeps_content_verbatim() {
        let draft = NoteDraft::new("  fn main() {}\n", NoteKind::Code, tags(&["#rust"])).unwrap();
        assert_eq!(draft.content, "  fn main() {}\n");
        assert_eq!(draft.kind, NoteKind::Code);
        assert_eq!(draft.hashtags, tags(&["#rust"]));
    }

    #[test]
    fn test_page_request_defaults() {
        let page = PageRequest::new(None, None, 50).unwrap();
        assert_eq!(page, PageRequest { offset: 0, limit: 50 });
        assert_eq!(PageRequest::default(), page);
    }

    #[test]
    fn test_page_request_rejects_bad_limits() {
        assert!(PageRequest::new(None, Some(0), 50).is_err());
        assert!(PageRequest::new(None, Some(-3), 50).is_err());
        assert!(PageRequest::new(None, Some(defaults::PAGE_LIMIT_MAX + 1), 50).is_err());
        assert!(PageRequest::new(Some(-1), Some(10), 50).is_err());
        assert!(PageRequest::new(Some(20), Some(defaults::PAGE_LIMIT_MAX), 50).is_ok());
    }
}
