//! Read-optimized note listing.
//!
//! Two fetches per page: the notes with their hashtags, then the attachment
//! rows for exactly those note ids. The results are joined in memory by note
//! id. Attachment URLs are computed here and never stored.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, instrument};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{AttachmentView, NoteListing, NoteView};
use crate::traits::{NoteStore, PageRequest};

/// Joins note pages with their attachment metadata.
#[derive(Clone)]
pub struct ListingAssembler {
    notes: Arc<dyn NoteStore>,
    base_url: String,
}

impl ListingAssembler {
    /// `base_url` prefixes every computed attachment URL.
    pub fn new(notes: Arc<dyn NoteStore>, base_url: impl Into<String>) -> Self {
        Self {
            notes,
            base_url: base_url.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[instrument(
        skip(self),
        fields(subsystem = "core", component = "listing", op = "assemble")
    )]
    pub async fn assemble(&self, user_id: Uuid, page: PageRequest) -> Result<NoteListing> {
        let start = Instant::now();
        let page_rows = self.notes.list_notes(user_id, page).await?;
        if page_rows.notes.is_empty() {
            return Ok(NoteListing {
                notes: Vec::new(),
                has_more: page_rows.has_more,
            });
        }

        let ids: Vec<Uuid> = page_rows.notes.iter().map(|n| n.id).collect();
        let attachments = self.notes.attachments_for_notes(user_id, &ids).await?;

        let mut by_note: HashMap<Uuid, Vec<AttachmentView>> = HashMap::with_capacity(ids.len());
        for attachment in attachments {
            by_note
                .entry(attachment.note_id)
                .or_default()
                .push(AttachmentView::new(attachment, &self.base_url));
        }

        let notes: Vec<NoteView> = page_rows
            .notes
            .into_iter()
            .map(|note| {
                let attachments = by_note.remove(&note.id).unwrap_or_default();
                NoteView::new(note, attachments)
            })
            .collect();

        debug!(
            result_count = notes.len(),
            has_more = page_rows.has_more,
            duration_ms = start.elapsed().as_millis() as u64,
            "Listing assembled"
        );
        Ok(NoteListing {
            notes,
            has_more: page_rows.has_more,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::{AttachmentLifecycle, UploadRequest};
    use crate::memory::{MemoryBlobStore, MemoryNoteStore};
    use crate::models::NoteKind;
    use crate::traits::NoteDraft;

    fn draft(content: &str, tags: &[&str]) -> NoteDraft {
        NoteDraft::new(
            content,
            NoteKind::Text,
            tags.iter().map(|t| t.to_string()).collect(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_assemble_empty_listing() {
        let store = Arc::new(MemoryNoteStore::new());
        let assembler = ListingAssembler::new(store, "http://localhost:3001");

        let listing = assembler
            .assemble(Uuid::now_v7(), PageRequest::default())
            .await
            .unwrap();
        assert!(listing.notes.is_empty());
        assert!(!listing.has_more);
    }

    #[tokio::test]
    async fn test_assemble_joins_attachments_by_note() {
        let store = Arc::new(MemoryNoteStore::new());
        let blobs = Arc::new(MemoryBlobStore::new(1024));
        let lifecycle = AttachmentLifecycle::new(store.clone(), blobs);
        let assembler = ListingAssembler::new(store.clone(), "http://localhost:3001/");
        let user = Uuid::now_v7();

        let plain = store.create_note(user, draft("plain", &[])).await.unwrap();
        let with_file = store
            .create_note(user, draft("with file", &["#docs"]))
            .await
            .unwrap();
        let uploaded = lifecycle
            .upload(UploadRequest {
                note_id: with_file.id,
                user_id: user,
                original_name: "spec sheet.pdf".to_string(),
                mime_type: Some("application/pdf".to_string()),
                data: b"%PDF-1.4".to_vec(),
            })
            .await
            .unwrap();

        let listing = assembler.assemble(user, PageRequest::default()).await.unwrap();
        assert_eq!(listing.notes.len(), 2);

        // Newest note is placed first.
        let first = &listing.notes[0];
        assert_eq!(first.id, with_file.id);
        assert_eq!(first.hashtags, vec!["#docs".to_string()]);
        assert_eq!(first.attachments.len(), 1);
        let view = &first.attachments[0];
        assert_eq!(view.id, uploaded.id);
        assert_eq!(view.filename, uploaded.blob_key);
        assert_eq!(
            view.url,
            format!("http://localhost:3001/uploads/{}", uploaded.blob_key)
        );

        let second = &listing.notes[1];
        assert_eq!(second.id, plain.id);
        assert!(second.hashtags.is_empty());
        assert!(second.attachments.is_empty());
    }

    #[tokio::test]
    async fn test_assemble_pages_with_has_more() {
        let store = Arc::new(MemoryNoteStore::new());
        let assembler = ListingAssembler::new(store.clone(), "http://h");
        let user = Uuid::now_v7();
        for i in 0..3 {
            store
                .create_note(user, draft(&format!("note {}", i), &[]))
                .await
                .unwrap();
        }

        let first = assembler
            .assemble(user, PageRequest { offset: 0, limit: 2 })
            .await
            .unwrap();
        assert_eq!(first.notes.len(), 2);
        assert!(first.has_more);

        let rest = assembler
            .assemble(user, PageRequest { offset: 2, limit: 2 })
            .await
            .unwrap();
        assert_eq!(rest.notes.len(), 1);
        assert!(!rest.has_more);
    }

    #[tokio::test]
    async fn test_assemble_never_leaks_other_users_notes() {
        let store = Arc::new(MemoryNoteStore::new());
        let assembler = ListingAssembler::new(store.clone(), "http://h");
        let alice = Uuid::now_v7();
        let bob = Uuid::now_v7();
        store.create_note(alice, draft("alice", &[])).await.unwrap();

        let listing = assembler.assemble(bob, PageRequest::default()).await.unwrap();
        assert!(listing.notes.is_empty());
    }
}
