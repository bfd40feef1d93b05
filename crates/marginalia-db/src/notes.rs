//! PostgreSQL note aggregate store.
//!
//! Every mutation runs in one transaction with ownership checked by the
//! mutating statement itself (`WHERE id = $1 AND user_id = $2`). Each
//! operation also runs under a time budget; when it expires the in-flight
//! transaction is dropped and rolled back.

use std::future::Future;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use marginalia_core::{
    defaults, Attachment, DeletedNote, Error, NewAttachment, Note, NoteDraft, NoteKind, NotePage,
    NoteStore, PageRequest, ReorderOutcome, Result,
};

use crate::position::PositionSequencer;

const ATTACHMENT_COLUMNS: &str =
    "a.id, a.note_id, a.blob_key, a.original_name, a.mime_type, a.size, a.created_at";

/// PostgreSQL implementation of [`NoteStore`].
#[derive(Clone)]
pub struct PgNoteStore {
    pool: PgPool,
    time_budget: Duration,
}

impl PgNoteStore {
    /// Create a new PgNoteStore with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            time_budget: Duration::from_millis(defaults::DB_STATEMENT_TIMEOUT_MS),
        }
    }

    /// Override the per-operation time budget.
    pub fn with_time_budget(mut self, budget: Duration) -> Self {
        self.time_budget = budget;
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn within_budget<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = Result<T>> + Send,
    ) -> Result<T> {
        match tokio::time::timeout(self.time_budget, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    subsystem = "db",
                    component = "notes",
                    op,
                    budget_ms = self.time_budget.as_millis() as u64,
                    "Operation exceeded its time budget and was rolled back"
                );
                Err(Error::Timeout(op.to_string()))
            }
        }
    }

    async fn insert_hashtags_tx(
        tx: &mut Transaction<'_, Postgres>,
        note_id: Uuid,
        hashtags: &[String],
    ) -> Result<()> {
        for tag in hashtags {
            sqlx::query("INSERT INTO hashtags (note_id, tag) VALUES ($1, $2)")
                .bind(note_id)
                .bind(tag)
                .execute(&mut **tx)
                .await
                .map_err(Error::Database)?;
        }
        Ok(())
    }

    async fn create_note_tx(
        tx: &mut Transaction<'_, Postgres>,
        user_id: Uuid,
        draft: NoteDraft,
    ) -> Result<Note> {
        let position = PositionSequencer::initial_position(tx, user_id).await?;
        let note_id = Uuid::now_v7();

        let row = sqlx::query(
            "INSERT INTO notes (id, user_id, content, type, position)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING timestamp",
        )
        .bind(note_id)
        .bind(user_id)
        .bind(&draft.content)
        .bind(draft.kind.as_str())
        .bind(position)
        .fetch_one(&mut **tx)
        .await
        .map_err(Error::Database)?;

        Self::insert_hashtags_tx(tx, note_id, &draft.hashtags).await?;

        Ok(Note {
            id: note_id,
            user_id,
            content: draft.content,
            kind: draft.kind,
            position,
            timestamp: row.get("timestamp"),
            hashtags: draft.hashtags,
        })
    }

    async fn update_note_tx(
        tx: &mut Transaction<'_, Postgres>,
        note_id: Uuid,
        user_id: Uuid,
        draft: &NoteDraft,
    ) -> Result<()> {
        let result = sqlx::query("UPDATE notes SET content = $1, type = $2 WHERE id = $3 AND user_id = $4")
            .bind(&draft.content)
            .bind(draft.kind.as_str())
            .bind(note_id)
            .bind(user_id)
            .execute(&mut **tx)
            .await
            .map_err(Error::Database)?;
        if result.rows_affected() == 0 {
            return Err(Error::NoteNotFound(note_id));
        }

        // Wholesale replacement of the tag set.
        sqlx::query("DELETE FROM hashtags WHERE note_id = $1")
            .bind(note_id)
            .execute(&mut **tx)
            .await
            .map_err(Error::Database)?;
        Self::insert_hashtags_tx(tx, note_id, &draft.hashtags).await
    }

    async fn delete_note_tx(
        tx: &mut Transaction<'_, Postgres>,
        note_id: Uuid,
        user_id: Uuid,
    ) -> Result<DeletedNote> {
        let locked = sqlx::query("SELECT id FROM notes WHERE id = $1 AND user_id = $2 FOR UPDATE")
            .bind(note_id)
            .bind(user_id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(Error::Database)?;
        if locked.is_none() {
            return Err(Error::NoteNotFound(note_id));
        }

        let removed_blob_keys: Vec<String> = sqlx::query_scalar(
            "SELECT blob_key FROM attachments WHERE note_id = $1 ORDER BY created_at, id",
        )
        .bind(note_id)
        .fetch_all(&mut **tx)
        .await
        .map_err(Error::Database)?;

        // Hashtag and attachment rows go with the note (ON DELETE CASCADE).
        sqlx::query("DELETE FROM notes WHERE id = $1")
            .bind(note_id)
            .execute(&mut **tx)
            .await
            .map_err(Error::Database)?;

        Ok(DeletedNote {
            note_id,
            removed_blob_keys,
        })
    }
}

fn parse_note_row(row: &PgRow) -> Result<Note> {
    let kind: String = row.get("type");
    let kind: NoteKind = kind.parse().map_err(Error::Internal)?;
    Ok(Note {
        id: row.get("id"),
        user_id: row.get("user_id"),
        content: row.get("content"),
        kind,
        position: row.get("position"),
        timestamp: row.get("timestamp"),
        hashtags: row.get("hashtags"),
    })
}

fn parse_attachment_row(row: &PgRow) -> Attachment {
    Attachment {
        id: row.get("id"),
        note_id: row.get("note_id"),
        blob_key: row.get("blob_key"),
        original_name: row.get("original_name"),
        mime_type: row.get("mime_type"),
        size: row.get("size"),
        created_at: row.get("created_at"),
    }
}

fn is_foreign_key_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .and_then(|d| d.code())
        .is_some_and(|code| code == "23503")
}

#[async_trait]
impl NoteStore for PgNoteStore {
    #[instrument(
        skip(self, draft),
        fields(subsystem = "db", component = "notes", op = "create_note", user_id = %user_id)
    )]
    async fn create_note(&self, user_id: Uuid, draft: NoteDraft) -> Result<Note> {
        let start = Instant::now();
        let note = self
            .within_budget("create_note", async move {
                let mut tx = self.pool.begin().await.map_err(Error::Database)?;
                let note = Self::create_note_tx(&mut tx, user_id, draft).await?;
                tx.commit().await.map_err(Error::Database)?;
                Ok(note)
            })
            .await?;
        info!(
            note_id = %note.id,
            position = note.position,
            hashtag_count = note.hashtags.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Note created"
        );
        Ok(note)
    }

    #[instrument(
        skip(self),
        fields(subsystem = "db", component = "notes", op = "list_notes", user_id = %user_id)
    )]
    async fn list_notes(&self, user_id: Uuid, page: PageRequest) -> Result<NotePage> {
        let start = Instant::now();
        let rows = self
            .within_budget("list_notes", async move {
                sqlx::query(
                    "SELECT n.id, n.user_id, n.content, n.type, n.position, n.timestamp,
                            COALESCE(
                                array_agg(h.tag::TEXT ORDER BY h.id) FILTER (WHERE h.id IS NOT NULL),
                                '{}'::TEXT[]
                            ) AS hashtags
                     FROM notes n
                     LEFT JOIN hashtags h ON h.note_id = n.id
                     WHERE n.user_id = $1
                     GROUP BY n.id
                     ORDER BY n.position ASC, n.timestamp DESC, n.id DESC
                     LIMIT $2 OFFSET $3",
                )
                .bind(user_id)
                .bind(page.limit + 1)
                .bind(page.offset)
                .fetch_all(&self.pool)
                .await
                .map_err(Error::Database)
            })
            .await?;

        let mut notes = rows.iter().map(parse_note_row).collect::<Result<Vec<_>>>()?;
        let has_more = notes.len() as i64 > page.limit;
        notes.truncate(page.limit.max(0) as usize);

        debug!(
            result_count = notes.len(),
            has_more,
            duration_ms = start.elapsed().as_millis() as u64,
            "Notes listed"
        );
        Ok(NotePage { notes, has_more })
    }

    #[instrument(
        skip(self, draft),
        fields(subsystem = "db", component = "notes", op = "update_note", note_id = %note_id)
    )]
    async fn update_note(&self, note_id: Uuid, user_id: Uuid, draft: NoteDraft) -> Result<()> {
        self.within_budget("update_note", async move {
            let mut tx = self.pool.begin().await.map_err(Error::Database)?;
            Self::update_note_tx(&mut tx, note_id, user_id, &draft).await?;
            tx.commit().await.map_err(Error::Database)?;
            Ok(())
        })
        .await?;
        info!("Note updated");
        Ok(())
    }

    #[instrument(
        skip(self),
        fields(subsystem = "db", component = "notes", op = "delete_note", note_id = %note_id)
    )]
    async fn delete_note(&self, note_id: Uuid, user_id: Uuid) -> Result<DeletedNote> {
        let deleted = self
            .within_budget("delete_note", async move {
                let mut tx = self.pool.begin().await.map_err(Error::Database)?;
                let deleted = Self::delete_note_tx(&mut tx, note_id, user_id).await?;
                tx.commit().await.map_err(Error::Database)?;
                Ok(deleted)
            })
            .await?;
        debug!(
            result_count = deleted.removed_blob_keys.len(),
            "Note row deleted"
        );
        Ok(deleted)
    }

    #[instrument(
        skip(self, ordered_ids),
        fields(
            subsystem = "db",
            component = "notes",
            op = "reorder_notes",
            user_id = %user_id,
            id_count = ordered_ids.len(),
        )
    )]
    async fn reorder_notes(&self, user_id: Uuid, ordered_ids: &[Uuid]) -> Result<ReorderOutcome> {
        let outcome = self
            .within_budget("reorder_notes", async move {
                let mut tx = self.pool.begin().await.map_err(Error::Database)?;
                let outcome = PositionSequencer::reorder(&mut tx, user_id, ordered_ids).await?;
                tx.commit().await.map_err(Error::Database)?;
                Ok(outcome)
            })
            .await?;
        info!(
            updated = outcome.updated,
            skipped = outcome.skipped,
            "Notes reordered"
        );
        Ok(outcome)
    }

    async fn note_owned_by(&self, note_id: Uuid, user_id: Uuid) -> Result<bool> {
        self.within_budget("note_owned_by", async move {
            sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS(SELECT 1 FROM notes WHERE id = $1 AND user_id = $2)",
            )
            .bind(note_id)
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)
        })
        .await
    }

    #[instrument(
        skip(self, attachment),
        fields(
            subsystem = "db",
            component = "notes",
            op = "insert_attachment",
            note_id = %attachment.note_id,
        )
    )]
    async fn insert_attachment(
        &self,
        user_id: Uuid,
        attachment: NewAttachment,
    ) -> Result<Attachment> {
        let note_id = attachment.note_id;
        self.within_budget("insert_attachment", async move {
            let attachment_id = Uuid::now_v7();
            // Conditional insert: no row unless the note still belongs to the user.
            let row = sqlx::query(
                "INSERT INTO attachments (id, note_id, blob_key, original_name, mime_type, size)
                 SELECT $1, n.id, $3, $4, $5, $6 FROM notes n WHERE n.id = $2 AND n.user_id = $7
                 RETURNING created_at",
            )
            .bind(attachment_id)
            .bind(attachment.note_id)
            .bind(&attachment.blob_key)
            .bind(&attachment.original_name)
            .bind(&attachment.mime_type)
            .bind(attachment.size)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                if is_foreign_key_violation(&e) {
                    Error::NoteNotFound(note_id)
                } else {
                    Error::Database(e)
                }
            })?
            .ok_or(Error::NoteNotFound(note_id))?;

            Ok(Attachment {
                id: attachment_id,
                note_id: attachment.note_id,
                blob_key: attachment.blob_key,
                original_name: attachment.original_name,
                mime_type: attachment.mime_type,
                size: attachment.size,
                created_at: row.get("created_at"),
            })
        })
        .await
    }

    #[instrument(
        skip(self),
        fields(subsystem = "db", component = "notes", op = "remove_attachment")
    )]
    async fn remove_attachment(
        &self,
        attachment_id: Uuid,
        note_id: Uuid,
        user_id: Uuid,
    ) -> Result<Attachment> {
        self.within_budget("remove_attachment", async move {
            let sql = format!(
                "DELETE FROM attachments a USING notes n
                 WHERE a.id = $1 AND a.note_id = $2 AND n.id = a.note_id AND n.user_id = $3
                 RETURNING {}",
                ATTACHMENT_COLUMNS
            );
            let row = sqlx::query(&sql)
                .bind(attachment_id)
                .bind(note_id)
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(Error::Database)?
                .ok_or_else(|| Error::NotFound(format!("Attachment {}", attachment_id)))?;
            Ok(parse_attachment_row(&row))
        })
        .await
    }

    async fn attachments_for_notes(
        &self,
        user_id: Uuid,
        note_ids: &[Uuid],
    ) -> Result<Vec<Attachment>> {
        if note_ids.is_empty() {
            return Ok(Vec::new());
        }
        self.within_budget("attachments_for_notes", async move {
            let sql = format!(
                "SELECT {} FROM attachments a
                 JOIN notes n ON n.id = a.note_id
                 WHERE a.note_id = ANY($1) AND n.user_id = $2
                 ORDER BY a.created_at, a.id",
                ATTACHMENT_COLUMNS
            );
            let rows = sqlx::query(&sql)
                .bind(note_ids)
                .bind(user_id)
                .fetch_all(&self.pool)
                .await
                .map_err(Error::Database)?;
            Ok(rows.iter().map(parse_attachment_row).collect())
        })
        .await
    }

    async fn attachment_by_blob_key(&self, blob_key: &str) -> Result<Option<Attachment>> {
        self.within_budget("attachment_by_blob_key", async move {
            let sql = format!("SELECT {} FROM attachments a WHERE a.blob_key = $1", ATTACHMENT_COLUMNS);
            let row = sqlx::query(&sql)
                .bind(blob_key)
                .fetch_optional(&self.pool)
                .await
                .map_err(Error::Database)?;
            Ok(row.as_ref().map(parse_attachment_row))
        })
        .await
    }

    async fn all_blob_keys(&self) -> Result<Vec<String>> {
        self.within_budget("all_blob_keys", async move {
            sqlx::query_scalar("SELECT blob_key FROM attachments ORDER BY blob_key")
                .fetch_all(&self.pool)
                .await
                .map_err(Error::Database)
        })
        .await
    }
}
