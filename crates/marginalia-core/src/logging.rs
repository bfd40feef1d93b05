//! Structured logging field names shared by every marginalia crate.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Request failed on a storage fault, operator attention needed |
//! | WARN  | Orphaned blob, failed best-effort cleanup, partial reorder |
//! | INFO  | Startup, shutdown, note and attachment lifecycle completions |
//! | DEBUG | Decision points (positions assigned, listing sizes) |
//! | TRACE | Per-row iteration |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Correlation ID taken from the `x-request-id` header (UUIDv7).
pub const REQUEST_ID: &str = "request_id";

/// Subsystem originating the log event.
/// Values: "api", "core", "db", "blob"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "lifecycle", "listing", "notes", "position", "fs_blob_store"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "upload", "remove", "delete_note", "reorder", "list"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Authenticated user UUID.
pub const USER_ID: &str = "user_id";

/// Note UUID being operated on.
pub const NOTE_ID: &str = "note_id";

/// Attachment UUID being operated on.
pub const ATTACHMENT_ID: &str = "attachment_id";

/// Blob store key.
pub const BLOB_KEY: &str = "blob_key";

/// Set to "blob" on a blob that has no attachment row referencing it.
pub const ORPHAN: &str = "orphan";

/// Upload pipeline stage reached before a failure.
pub const STAGE: &str = "stage";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of rows returned or affected.
pub const RESULT_COUNT: &str = "result_count";

/// Blob size in bytes.
pub const SIZE_BYTES: &str = "size_bytes";

// ─── Database fields ───────────────────────────────────────────────────────

/// Number of active connections in the pool.
pub const POOL_SIZE: &str = "pool_size";

/// Number of idle connections in the pool.
pub const POOL_IDLE: &str = "pool_idle";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";
