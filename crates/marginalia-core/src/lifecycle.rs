//! Attachment lifecycle across the blob store and the relational store.
//!
//! The two stores share no transaction. Uploads write the blob first and the
//! metadata row second; removals delete the row first and the blob second.
//! A failure between the two steps can leave a blob with no row (an orphan),
//! never a row with no blob. Orphans are logged with `orphan = "blob"` and can
//! be listed with [`AttachmentLifecycle::find_orphan_blobs`].

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::defaults;
use crate::error::{Error, Result};
use crate::file_safety::{generate_blob_key, resolve_mime_type};
use crate::models::{Attachment, DeletedNote, UploadStage};
use crate::traits::{BlobStore, NewAttachment, NoteStore};

/// An uploaded file as received from the client.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub note_id: Uuid,
    pub user_id: Uuid,
    pub original_name: String,
    /// MIME type declared by the client, if any.
    pub mime_type: Option<String>,
    pub data: Vec<u8>,
}

/// Sequences blob and row operations for attachments and note deletion.
#[derive(Clone)]
pub struct AttachmentLifecycle {
    notes: Arc<dyn NoteStore>,
    blobs: Arc<dyn BlobStore>,
}

impl AttachmentLifecycle {
    pub fn new(notes: Arc<dyn NoteStore>, blobs: Arc<dyn BlobStore>) -> Self {
        Self { notes, blobs }
    }

    /// Size ceiling enforced on uploads.
    pub fn max_upload_bytes(&self) -> u64 {
        self.blobs.max_blob_size()
    }

    /// Store a file and attach it to a note.
    ///
    /// Order: size check, ownership check, blob write, row insert. Nothing is
    /// written for an oversized file or a note the user does not own. If the
    /// row insert fails the blob stays behind as an orphan and the error is
    /// returned.
    #[instrument(
        skip(self, req),
        fields(
            subsystem = "core",
            component = "lifecycle",
            op = "upload",
            note_id = %req.note_id,
            user_id = %req.user_id,
            size_bytes = req.data.len(),
        )
    )]
    pub async fn upload(&self, req: UploadRequest) -> Result<Attachment> {
        let start = Instant::now();
        let limit = self.max_upload_bytes();
        let size = req.data.len() as u64;
        if size > limit {
            debug!(limit, "Upload rejected before any write");
            return Err(Error::PayloadTooLarge { size, limit });
        }

        if !self.notes.note_owned_by(req.note_id, req.user_id).await? {
            return Err(Error::NoteNotFound(req.note_id));
        }

        let blob_key = generate_blob_key(&req.original_name);
        let mime_type = resolve_mime_type(&req.original_name, &req.data, req.mime_type.as_deref());
        let original_name = display_name(&req.original_name);

        let mut stage = UploadStage::Requested;
        if let Err(e) = self.blobs.put(&blob_key, &req.data).await {
            error!(
                blob_key = %blob_key,
                stage = %stage,
                error = %e,
                "Blob write failed"
            );
            return Err(e);
        }
        stage = UploadStage::BlobWritten;

        let row = NewAttachment {
            note_id: req.note_id,
            blob_key: blob_key.clone(),
            original_name,
            mime_type,
            size: req.data.len() as i64,
        };
        match self.notes.insert_attachment(req.user_id, row).await {
            Ok(attachment) => {
                stage = UploadStage::RowInserted;
                info!(
                    attachment_id = %attachment.id,
                    blob_key = %blob_key,
                    stage = %stage,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Attachment stored"
                );
                Ok(attachment)
            }
            Err(e) => {
                warn!(
                    orphan = "blob",
                    blob_key = %blob_key,
                    stage = %stage,
                    error = %e,
                    "Attachment row insert failed after blob write; blob is orphaned"
                );
                Err(e)
            }
        }
    }

    /// Detach and delete an attachment.
    ///
    /// The row delete is authoritative. A failed blob delete is logged as an
    /// orphan and the removal still succeeds.
    #[instrument(
        skip(self),
        fields(subsystem = "core", component = "lifecycle", op = "remove")
    )]
    pub async fn remove(
        &self,
        attachment_id: Uuid,
        note_id: Uuid,
        user_id: Uuid,
    ) -> Result<Attachment> {
        let attachment = self
            .notes
            .remove_attachment(attachment_id, note_id, user_id)
            .await?;

        if let Err(e) = self.blobs.delete(&attachment.blob_key).await {
            warn!(
                orphan = "blob",
                blob_key = %attachment.blob_key,
                error = %e,
                "Blob delete failed after attachment row removal"
            );
        } else {
            info!(blob_key = %attachment.blob_key, "Attachment removed");
        }
        Ok(attachment)
    }

    /// Delete a note, then purge its blobs in the background once the
    /// row deletion has committed.
    #[instrument(
        skip(self),
        fields(subsystem = "core", component = "lifecycle", op = "delete_note")
    )]
    pub async fn delete_note(&self, note_id: Uuid, user_id: Uuid) -> Result<DeletedNote> {
        let deleted = self.notes.delete_note(note_id, user_id).await?;
        info!(
            result_count = deleted.removed_blob_keys.len(),
            "Note deleted"
        );

        if !deleted.removed_blob_keys.is_empty() {
            let blobs = Arc::clone(&self.blobs);
            let keys = deleted.removed_blob_keys.clone();
            tokio::spawn(async move {
                purge_blobs(blobs.as_ref(), &keys).await;
            });
        }
        Ok(deleted)
    }

    /// Blob keys with no attachment row referencing them. Report only.
    #[instrument(
        skip(self),
        fields(subsystem = "core", component = "lifecycle", op = "find_orphan_blobs")
    )]
    pub async fn find_orphan_blobs(&self) -> Result<Vec<String>> {
        let stored = self.blobs.list_keys().await?;
        let referenced: HashSet<String> = self.notes.all_blob_keys().await?.into_iter().collect();

        let mut orphans: Vec<String> = stored
            .into_iter()
            .filter(|key| !referenced.contains(key))
            .collect();
        orphans.sort();

        for key in &orphans {
            warn!(orphan = "blob", blob_key = %key, "Unreferenced blob");
        }
        info!(result_count = orphans.len(), "Orphan scan complete");
        Ok(orphans)
    }
}

/// Best-effort delete of blobs whose rows are already gone.
/// Returns the number of blobs that could not be deleted.
pub async fn purge_blobs(blobs: &dyn BlobStore, keys: &[String]) -> usize {
    let mut failed = 0;
    for key in keys {
        if let Err(e) = blobs.delete(key).await {
            failed += 1;
            warn!(
                subsystem = "core",
                component = "lifecycle",
                op = "purge_blobs",
                orphan = "blob",
                blob_key = %key,
                error = %e,
                "Blob cleanup failed after note deletion"
            );
        }
    }
    debug!(
        subsystem = "core",
        component = "lifecycle",
        op = "purge_blobs",
        result_count = keys.len() - failed,
        "Blob cleanup finished"
    );
    failed
}

/// Original file name as recorded in metadata: path stripped, control
/// characters dropped, capped in length.
fn display_name(original: &str) -> String {
    let base = original.rsplit(['/', '\\']).next().unwrap_or(original);
    let cleaned: String = base
        .chars()
        .filter(|c| !c.is_control())
        .take(defaults::ORIGINAL_NAME_MAX_LEN)
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        "unnamed_file".to_string()
    } else {
        cleaned.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::memory::{MemoryBlobStore, MemoryNoteStore};
    use crate::models::NoteKind;
    use crate::traits::NoteDraft;
    use std::time::Duration;

    struct Fixture {
        notes: Arc<MemoryNoteStore>,
        blobs: Arc<MemoryBlobStore>,
        lifecycle: AttachmentLifecycle,
        user: Uuid,
        note: Uuid,
    }

    async fn fixture(max_bytes: u64) -> Fixture {
        let notes = Arc::new(MemoryNoteStore::new());
        let blobs = Arc::new(MemoryBlobStore::new(max_bytes));
        let lifecycle = AttachmentLifecycle::new(notes.clone(), blobs.clone());
        let user = Uuid::now_v7();
        let note = notes
            .create_note(
                user,
                NoteDraft::new("with files", NoteKind::Text, vec![]).unwrap(),
            )
            .await
            .unwrap()
            .id;
        Fixture {
            notes,
            blobs,
            lifecycle,
            user,
            note,
        }
    }

    fn upload_req(f: &Fixture, data: &[u8]) -> UploadRequest {
        UploadRequest {
            note_id: f.note,
            user_id: f.user,
            original_name: "my notes.txt".to_string(),
            mime_type: Some("text/plain".to_string()),
            data: data.to_vec(),
        }
    }

    #[tokio::test]
    async fn test_upload_writes_blob_then_row() {
        let f = fixture(1024).await;
        let attachment = f.lifecycle.upload(upload_req(&f, b"hello")).await.unwrap();

        assert_eq!(attachment.note_id, f.note);
        assert_eq!(attachment.original_name, "my notes.txt");
        assert_eq!(attachment.mime_type, "text/plain");
        assert_eq!(attachment.size, 5);
        assert!(attachment.blob_key.ends_with("_my_notes.txt"));
        assert_eq!(f.blobs.get(&attachment.blob_key).await.unwrap(), b"hello");
        assert_eq!(f.notes.all_blob_keys().await.unwrap(), vec![attachment.blob_key]);
    }

    #[tokio::test]
    async fn test_upload_over_ceiling_writes_nothing() {
        let f = fixture(4).await;
        let err = f.lifecycle.upload(upload_req(&f, b"hello")).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Capacity);
        assert!(matches!(err, Error::PayloadTooLarge { size: 5, limit: 4 }));
        assert!(f.blobs.list_keys().await.unwrap().is_empty());
        assert!(f.notes.all_blob_keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upload_at_ceiling_is_accepted() {
        let f = fixture(5).await;
        assert!(f.lifecycle.upload(upload_req(&f, b"hello")).await.is_ok());
    }

    #[tokio::test]
    async fn test_upload_to_foreign_note_is_not_found_and_writes_nothing() {
        let f = fixture(1024).await;
        let mut req = upload_req(&f, b"hello");
        req.user_id = Uuid::now_v7();

        let err = f.lifecycle.upload(req).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(f.blobs.list_keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upload_row_failure_surfaces_error_and_leaves_orphan() {
        let f = fixture(1024).await;
        f.notes.fail_next_attachment_insert();

        let err = f.lifecycle.upload(upload_req(&f, b"hello")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Storage);

        let orphans = f.lifecycle.find_orphan_blobs().await.unwrap();
        assert_eq!(orphans.len(), 1);
        assert_eq!(f.blobs.list_keys().await.unwrap(), orphans);
    }

    #[tokio::test]
    async fn test_upload_blob_failure_inserts_no_row() {
        let f = fixture(1024).await;
        f.blobs.fail_next_put();

        assert!(f.lifecycle.upload(upload_req(&f, b"hello")).await.is_err());
        assert!(f.notes.all_blob_keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_deletes_row_and_blob() {
        let f = fixture(1024).await;
        let a = f.lifecycle.upload(upload_req(&f, b"bytes")).await.unwrap();

        let removed = f.lifecycle.remove(a.id, f.note, f.user).await.unwrap();
        assert_eq!(removed.id, a.id);
        assert!(!f.blobs.exists(&a.blob_key).await.unwrap());
        assert!(f.notes.all_blob_keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_succeeds_when_blob_delete_fails() {
        let f = fixture(1024).await;
        let a = f.lifecycle.upload(upload_req(&f, b"bytes")).await.unwrap();
        f.blobs.fail_next_delete();

        assert!(f.lifecycle.remove(a.id, f.note, f.user).await.is_ok());
        assert!(f.notes.all_blob_keys().await.unwrap().is_empty());
        assert!(f.blobs.exists(&a.blob_key).await.unwrap());
        assert_eq!(
            f.lifecycle.find_orphan_blobs().await.unwrap(),
            vec![a.blob_key]
        );
    }

    #[tokio::test]
    async fn test_remove_by_other_user_is_not_found() {
        let f = fixture(1024).await;
        let a = f.lifecycle.upload(upload_req(&f, b"bytes")).await.unwrap();

        let err = f
            .lifecycle
            .remove(a.id, f.note, Uuid::now_v7())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(f.blobs.exists(&a.blob_key).await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_with_mismatched_note_is_not_found() {
        let f = fixture(1024).await;
        let a = f.lifecycle.upload(upload_req(&f, b"bytes")).await.unwrap();

        let err = f
            .lifecycle
            .remove(a.id, Uuid::now_v7(), f.user)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_delete_note_purges_blobs_eventually() {
        let f = fixture(1024).await;
        let a = f.lifecycle.upload(upload_req(&f, b"one")).await.unwrap();
        let b = f.lifecycle.upload(upload_req(&f, b"two")).await.unwrap();

        let deleted = f.lifecycle.delete_note(f.note, f.user).await.unwrap();
        let mut keys = deleted.removed_blob_keys.clone();
        keys.sort();
        let mut expected = vec![a.blob_key.clone(), b.blob_key.clone()];
        expected.sort();
        assert_eq!(keys, expected);

        for _ in 0..50 {
            if f.blobs.list_keys().await.unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(f.blobs.get(&a.blob_key).await.unwrap_err().is_not_found());
        assert!(f.blobs.get(&b.blob_key).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_delete_foreign_note_is_not_found() {
        let f = fixture(1024).await;
        let err = f
            .lifecycle
            .delete_note(f.note, Uuid::now_v7())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_purge_blobs_counts_failures() {
        let blobs = MemoryBlobStore::new(1024);
        blobs.put("a", b"1").await.unwrap();
        blobs.put("b", b"2").await.unwrap();
        blobs.fail_next_delete();

        let failed = purge_blobs(&blobs, &["a".to_string(), "b".to_string()]).await;
        assert_eq!(failed, 1);
        assert_eq!(blobs.list_keys().await.unwrap().len(), 1);
    }

    #[test]
    fn test_display_name_strips_path_and_controls() {
        assert_eq!(display_name("../x/report\n.pdf"), "report.pdf");
        assert_eq!(display_name("   "), "unnamed_file");
        assert_eq!(display_name("my notes.txt"), "my notes.txt");
    }
}
