//! In-memory stores for deterministic testing.
//!
//! [`MemoryNoteStore`] implements [`NoteStore`] and [`UserStore`] with the
//! same ordering, scoping and not-found rules as the PostgreSQL store.
//! [`MemoryBlobStore`] implements [`BlobStore`]. Both support one-shot
//! failure injection for exercising partial-failure paths.
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use marginalia_core::memory::{MemoryBlobStore, MemoryNoteStore};
//! use marginalia_core::AttachmentLifecycle;
//!
//! let notes = Arc::new(MemoryNoteStore::new());
//! let blobs = Arc::new(MemoryBlobStore::new(1024));
//! let lifecycle = AttachmentLifecycle::new(notes, blobs);
//! assert_eq!(lifecycle.max_upload_bytes(), 1024);
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::*;
use crate::traits::*;

#[derive(Default)]
struct NoteState {
    notes: Vec<Note>,
    attachments: Vec<Attachment>,
    users: Vec<UserCredentials>,
}

/// In-memory note aggregate and user store.
#[derive(Default)]
pub struct MemoryNoteStore {
    state: Mutex<NoteState>,
    fail_attachment_insert: AtomicBool,
}

impl MemoryNoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `insert_attachment` fail with a storage error.
    pub fn fail_next_attachment_insert(&self) {
        self.fail_attachment_insert.store(true, Ordering::SeqCst);
    }

    /// Number of hashtag values currently stored for a note.
    pub fn hashtag_count(&self, note_id: Uuid) -> usize {
        self.lock()
            .notes
            .iter()
            .find(|n| n.id == note_id)
            .map(|n| n.hashtags.len())
            .unwrap_or(0)
    }

    fn lock(&self) -> MutexGuard<'_, NoteState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn injected_failure(what: &str) -> Error {
    Error::Database(sqlx::Error::Protocol(format!("injected failure: {}", what)))
}

/// Display order: position ascending, then newest first.
fn display_order(a: &Note, b: &Note) -> std::cmp::Ordering {
    a.position
        .cmp(&b.position)
        .then_with(|| b.timestamp.cmp(&a.timestamp))
        .then_with(|| b.id.cmp(&a.id))
}

#[async_trait]
impl NoteStore for MemoryNoteStore {
    async fn create_note(&self, user_id: Uuid, draft: NoteDraft) -> Result<Note> {
        let mut state = self.lock();
        let position = state
            .notes
            .iter()
            .filter(|n| n.user_id == user_id)
            .map(|n| n.position)
            .min()
            .unwrap_or(0)
            - 1;
        let note = Note {
            id: Uuid::now_v7(),
            user_id,
            content: draft.content,
            kind: draft.kind,
            position,
            timestamp: Utc::now(),
            hashtags: draft.hashtags,
        };
        state.notes.push(note.clone());
        Ok(note)
    }

    async fn list_notes(&self, user_id: Uuid, page: PageRequest) -> Result<NotePage> {
        let state = self.lock();
        let mut owned: Vec<&Note> = state.notes.iter().filter(|n| n.user_id == user_id).collect();
        owned.sort_by(|a, b| display_order(a, b));

        let offset = page.offset.max(0) as usize;
        let limit = page.limit.max(0) as usize;
        let notes: Vec<Note> = owned.iter().skip(offset).take(limit).map(|n| (*n).clone()).collect();
        let has_more = owned.len() > offset + notes.len();
        Ok(NotePage { notes, has_more })
    }

    async fn update_note(&self, note_id: Uuid, user_id: Uuid, draft: NoteDraft) -> Result<()> {
        let mut state = self.lock();
        let note = state
            .notes
            .iter_mut()
            .find(|n| n.id == note_id && n.user_id == user_id)
            .ok_or(Error::NoteNotFound(note_id))?;
        note.content = draft.content;
        note.kind = draft.kind;
        note.hashtags = draft.hashtags;
        Ok(())
    }

    async fn delete_note(&self, note_id: Uuid, user_id: Uuid) -> Result<DeletedNote> {
        let mut state = self.lock();
        let idx = state
            .notes
            .iter()
            .position(|n| n.id == note_id && n.user_id == user_id)
            .ok_or(Error::NoteNotFound(note_id))?;
        state.notes.remove(idx);

        let mut removed_blob_keys = Vec::new();
        state.attachments.retain(|a| {
            if a.note_id == note_id {
                removed_blob_keys.push(a.blob_key.clone());
                false
            } else {
                true
            }
        });
        Ok(DeletedNote {
            note_id,
            removed_blob_keys,
        })
    }

    async fn reorder_notes(&self, user_id: Uuid, ordered_ids: &[Uuid]) -> Result<ReorderOutcome> {
        let mut state = self.lock();
        let mut updated = HashSet::new();
        let mut skipped = HashSet::new();
        for (index, id) in ordered_ids.iter().enumerate() {
            let position = i32::try_from(index)
                .map_err(|_| Error::InvalidInput("Too many notes to reorder".to_string()))?;
            match state
                .notes
                .iter_mut()
                .find(|n| n.id == *id && n.user_id == user_id)
            {
                Some(note) => {
                    note.position = position;
                    updated.insert(*id);
                }
                None => {
                    skipped.insert(*id);
                }
            }
        }
        Ok(ReorderOutcome {
            updated: updated.len() as u64,
            skipped: skipped.len() as u64,
        })
    }

    async fn note_owned_by(&self, note_id: Uuid, user_id: Uuid) -> Result<bool> {
        Ok(self
            .lock()
            .notes
            .iter()
            .any(|n| n.id == note_id && n.user_id == user_id))
    }

    async fn insert_attachment(
        &self,
        user_id: Uuid,
        attachment: NewAttachment,
    ) -> Result<Attachment> {
        if self.fail_attachment_insert.swap(false, Ordering::SeqCst) {
            return Err(injected_failure("insert_attachment"));
        }
        let mut state = self.lock();
        let owned = state
            .notes
            .iter()
            .any(|n| n.id == attachment.note_id && n.user_id == user_id);
        if !owned {
            return Err(Error::NoteNotFound(attachment.note_id));
        }
        let row = Attachment {
            id: Uuid::now_v7(),
            note_id: attachment.note_id,
            blob_key: attachment.blob_key,
            original_name: attachment.original_name,
            mime_type: attachment.mime_type,
            size: attachment.size,
            created_at: Utc::now(),
        };
        state.attachments.push(row.clone());
        Ok(row)
    }

    async fn remove_attachment(
        &self,
        attachment_id: Uuid,
        note_id: Uuid,
        user_id: Uuid,
    ) -> Result<Attachment> {
        let mut state = self.lock();
        let owned = state
            .notes
            .iter()
            .any(|n| n.id == note_id && n.user_id == user_id);
        let idx = state
            .attachments
            .iter()
            .position(|a| a.id == attachment_id && a.note_id == note_id)
            .filter(|_| owned)
            .ok_or_else(|| Error::NotFound(format!("Attachment {}", attachment_id)))?;
        Ok(state.attachments.remove(idx))
    }

    async fn attachments_for_notes(
        &self,
        user_id: Uuid,
        note_ids: &[Uuid],
    ) -> Result<Vec<Attachment>> {
        let state = self.lock();
        let owned: Vec<Uuid> = state
            .notes
            .iter()
            .filter(|n| n.user_id == user_id && note_ids.contains(&n.id))
            .map(|n| n.id)
            .collect();
        let mut rows: Vec<Attachment> = state
            .attachments
            .iter()
            .filter(|a| owned.contains(&a.note_id))
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(rows)
    }

    async fn attachment_by_blob_key(&self, blob_key: &str) -> Result<Option<Attachment>> {
        Ok(self
            .lock()
            .attachments
            .iter()
            .find(|a| a.blob_key == blob_key)
            .cloned())
    }

    async fn all_blob_keys(&self) -> Result<Vec<String>> {
        Ok(self
            .lock()
            .attachments
            .iter()
            .map(|a| a.blob_key.clone())
            .collect())
    }
}

#[async_trait]
impl UserStore for MemoryNoteStore {
    async fn create_user(&self, user: NewUser) -> Result<User> {
        let mut state = self.lock();
        if state.users.iter().any(|c| c.user.username == user.username) {
            return Err(Error::Conflict("Username already taken".to_string()));
        }
        if state.users.iter().any(|c| c.user.email == user.email) {
            return Err(Error::Conflict("Email already registered".to_string()));
        }
        let created = User {
            id: Uuid::now_v7(),
            username: user.username,
            email: user.email,
            created_at: Utc::now(),
        };
        state.users.push(UserCredentials {
            user: created.clone(),
            password_hash: user.password_hash,
        });
        Ok(created)
    }

    async fn find_credentials(&self, login: &str) -> Result<Option<UserCredentials>> {
        Ok(self
            .lock()
            .users
            .iter()
            .find(|c| c.user.username == login || c.user.email == login)
            .cloned())
    }
}

/// In-memory blob store with a size ceiling.
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    max_blob_size: u64,
    fail_put: AtomicBool,
    fail_delete: AtomicBool,
}

impl MemoryBlobStore {
    pub fn new(max_blob_size: u64) -> Self {
        Self {
            blobs: Mutex::new(HashMap::new()),
            max_blob_size,
            fail_put: AtomicBool::new(false),
            fail_delete: AtomicBool::new(false),
        }
    }

    /// Make the next `put` fail with an I/O error.
    pub fn fail_next_put(&self) {
        self.fail_put.store(true, Ordering::SeqCst);
    }

    /// Make the next `delete` fail with an I/O error.
    pub fn fail_next_delete(&self) {
        self.fail_delete.store(true, Ordering::SeqCst);
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<u8>>> {
        self.blobs.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn injected_io(what: &str) -> Error {
    Error::Io(std::io::Error::other(format!("injected failure: {}", what)))
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        let size = data.len() as u64;
        if size > self.max_blob_size {
            return Err(Error::PayloadTooLarge {
                size,
                limit: self.max_blob_size,
            });
        }
        if self.fail_put.swap(false, Ordering::SeqCst) {
            return Err(injected_io("put"));
        }
        self.lock().insert(key.to_string(), data.to_vec());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.lock()
            .get(key)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Blob {}", key)))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        if self.fail_delete.swap(false, Ordering::SeqCst) {
            return Err(injected_io("delete"));
        }
        self.lock().remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.lock().contains_key(key))
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self.lock().keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    fn max_blob_size(&self) -> u64 {
        self.max_blob_size
    }
}
