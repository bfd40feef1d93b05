//! # marginalia-db
//!
//! PostgreSQL and filesystem storage for marginalia.
//!
//! This crate provides:
//! - Connection pool management with acquire and statement timeouts
//! - `PgNoteStore`: the note aggregate (notes, hashtags, attachment rows)
//! - `PositionSequencer`: per-user manual ordering
//! - `PgUserRepository`: user accounts
//! - `FsBlobStore`: attachment bytes on the local filesystem
//!
//! ## Example
//!
//! ```rust,ignore
//! use marginalia_db::{Database, NoteDraft, NoteKind, NoteStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/marginalia").await?;
//!
//!     let draft = NoteDraft::new("buy milk", NoteKind::Text, vec!["#todo".into()])?;
//!     let note = db.notes.create_note(user_id, draft).await?;
//!
//!     println!("Created note: {}", note.id);
//!     Ok(())
//! }
//! ```

pub mod blob_store;
pub mod notes;
pub mod pool;
pub mod position;
pub mod users;

// Test fixtures for integration tests
// Note: Always compiled so integration tests (in tests/) can use DEFAULT_TEST_DATABASE_URL
pub mod test_fixtures;

// Re-export core types
pub use marginalia_core::*;

pub use blob_store::FsBlobStore;
pub use notes::PgNoteStore;
pub use pool::{create_pool, create_pool_with_config, log_pool_metrics, PoolConfig};
pub use position::PositionSequencer;
pub use users::PgUserRepository;

/// Combined database context with all repositories.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Note aggregate store.
    pub notes: PgNoteStore,
    /// User account repository.
    pub users: PgUserRepository,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            notes: PgNoteStore::new(pool.clone()),
            users: PgUserRepository::new(pool.clone()),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Create with custom pool configuration. The note store's time budget
    /// follows the configured statement timeout.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let budget = config.statement_timeout;
        let pool = create_pool_with_config(url, config).await?;
        let mut db = Self::new(pool);
        db.notes = db.notes.with_time_budget(budget);
        Ok(db)
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}
