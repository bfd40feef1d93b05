//! Per-user manual ordering of notes.
//!
//! Positions are plain integers, ascending. New notes go in front of the
//! user's current minimum. A reorder writes `position = index` for each listed
//! note the user owns and leaves every other note where it was, so positions
//! of unlisted notes may collide with reassigned ones.
//!
//! Both operations lock the user's row first, which serializes creates and
//! reorders issued concurrently by the same user.

use std::collections::HashSet;

use sqlx::{Postgres, Row, Transaction};
use tracing::{debug, warn};
use uuid::Uuid;

use marginalia_core::{Error, ReorderOutcome, Result};

/// Assigns and persists note positions inside a caller's transaction.
pub struct PositionSequencer;

impl PositionSequencer {
    /// Lock the user's row for the rest of the transaction.
    /// Returns false when the user does not exist.
    pub async fn lock_user(tx: &mut Transaction<'_, Postgres>, user_id: Uuid) -> Result<bool> {
        let row = sqlx::query("SELECT id FROM users WHERE id = $1 FOR UPDATE")
            .bind(user_id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(Error::Database)?;
        Ok(row.is_some())
    }

    /// Position for a note about to be created: one less than the user's
    /// current minimum, or -1 for a first note.
    pub async fn initial_position(
        tx: &mut Transaction<'_, Postgres>,
        user_id: Uuid,
    ) -> Result<i32> {
        if !Self::lock_user(tx, user_id).await? {
            return Err(Error::NotFound(format!("User {}", user_id)));
        }

        let row = sqlx::query(
            "SELECT COALESCE(MIN(position), 0) - 1 AS next_position FROM notes WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(&mut **tx)
        .await
        .map_err(Error::Database)?;

        let position: i32 = row.get("next_position");
        debug!(
            subsystem = "db",
            component = "position",
            op = "initial_position",
            user_id = %user_id,
            position,
            "Assigned initial position"
        );
        Ok(position)
    }

    /// Write `position = index` for each owned id, in list order. A repeated
    /// id ends up at its last index. Ids that are unknown or owned by another
    /// user are skipped. Both counts are of distinct ids.
    pub async fn reorder(
        tx: &mut Transaction<'_, Postgres>,
        user_id: Uuid,
        ordered_ids: &[Uuid],
    ) -> Result<ReorderOutcome> {
        Self::lock_user(tx, user_id).await?;

        let mut updated = HashSet::new();
        let mut skipped = HashSet::new();
        for (index, note_id) in ordered_ids.iter().enumerate() {
            let position = i32::try_from(index)
                .map_err(|_| Error::InvalidInput("Too many notes to reorder".to_string()))?;
            let result =
                sqlx::query("UPDATE notes SET position = $1 WHERE id = $2 AND user_id = $3")
                    .bind(position)
                    .bind(note_id)
                    .bind(user_id)
                    .execute(&mut **tx)
                    .await
                    .map_err(Error::Database)?;

            if result.rows_affected() == 0 {
                skipped.insert(*note_id);
            } else {
                updated.insert(*note_id);
            }
        }

        let outcome = ReorderOutcome {
            updated: updated.len() as u64,
            skipped: skipped.len() as u64,
        };

        if outcome.skipped > 0 {
            warn!(
                subsystem = "db",
                component = "position",
                op = "reorder",
                user_id = %user_id,
                updated = outcome.updated,
                skipped = outcome.skipped,
                "Reorder skipped ids that are missing or not owned"
            );
        }
        Ok(outcome)
    }
}
