//! Centralized default constants for marginalia.
//!
//! Every crate reads its defaults and environment variable names from here
//! instead of repeating magic numbers.

// =============================================================================
// PAGINATION
// =============================================================================

/// Default page size for note listings.
pub const PAGE_LIMIT: i64 = 50;

/// Largest page a caller may request.
pub const PAGE_LIMIT_MAX: i64 = 100;

/// Default listing offset.
pub const PAGE_OFFSET: i64 = 0;

// =============================================================================
// NOTES
// =============================================================================

/// Maximum characters in a single hashtag (column width of `hashtags.tag`).
pub const HASHTAG_MAX_LEN: usize = 100;

/// Maximum characters kept from an uploaded file's original name.
pub const ORIGINAL_NAME_MAX_LEN: usize = 255;

/// Maximum bytes of the sanitized name inside a blob key. With the 32-char
/// UUID prefix and the `.{key}.tmp` staging name this stays under the
/// 255-byte file name limit of common filesystems.
pub const BLOB_KEY_NAME_MAX_BYTES: usize = 200;

// =============================================================================
// UPLOADS / BLOB STORE
// =============================================================================

/// Upload ceiling in bytes (10 MB).
pub const MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;

/// Extra request body allowance for multipart framing on top of the upload ceiling.
pub const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// Default blob directory root.
pub const BLOB_STORAGE_PATH: &str = "./uploads";

/// MIME type used when neither the client nor the bytes say otherwise.
pub const FALLBACK_MIME_TYPE: &str = "application/octet-stream";

/// Public path prefix under which blobs are served.
pub const UPLOADS_ROUTE_PREFIX: &str = "/uploads";

// =============================================================================
// DATABASE
// =============================================================================

/// Default database URL.
pub const DATABASE_URL: &str = "postgres://localhost/marginalia";

/// Default maximum pool connections.
pub const DB_MAX_CONNECTIONS: u32 = 10;

/// Default minimum pool connections.
pub const DB_MIN_CONNECTIONS: u32 = 1;

/// Default pool acquire timeout in seconds. Exhaustion past this is a capacity error.
pub const DB_ACQUIRE_TIMEOUT_SECS: u64 = 30;

/// Default idle connection timeout in seconds.
pub const DB_IDLE_TIMEOUT_SECS: u64 = 600;

/// Per-transaction time budget in milliseconds.
pub const DB_STATEMENT_TIMEOUT_MS: u64 = 15_000;

// =============================================================================
// SERVER
// =============================================================================

/// Default listen host.
pub const SERVER_HOST: &str = "0.0.0.0";

/// Default HTTP server port.
pub const SERVER_PORT: u16 = 3001;

/// Default CORS origin whitelist.
pub const ALLOWED_ORIGINS: &str = "http://localhost:3000";

/// Default CORS max-age in seconds (1 hour).
pub const CORS_MAX_AGE_SECS: u64 = 3600;

/// Default rate limit: max requests per period.
pub const RATE_LIMIT_REQUESTS: u64 = 100;

/// Default rate limit: period in seconds.
pub const RATE_LIMIT_PERIOD_SECS: u64 = 60;

// =============================================================================
// AUTH
// =============================================================================

/// Token lifetime in hours (7 days).
pub const JWT_TTL_HOURS: i64 = 168;

/// Shortest accepted password.
pub const PASSWORD_MIN_LEN: usize = 6;

/// Longest username (column width).
pub const USERNAME_MAX_LEN: usize = 50;

/// Longest email address (column width).
pub const EMAIL_MAX_LEN: usize = 255;

// =============================================================================
// ENVIRONMENT VARIABLE NAMES
// =============================================================================

pub const ENV_DATABASE_URL: &str = "DATABASE_URL";
pub const ENV_DB_MAX_CONNECTIONS: &str = "DB_MAX_CONNECTIONS";
pub const ENV_DB_ACQUIRE_TIMEOUT_SECS: &str = "DB_ACQUIRE_TIMEOUT_SECS";
pub const ENV_DB_STATEMENT_TIMEOUT_MS: &str = "DB_STATEMENT_TIMEOUT_MS";
pub const ENV_HOST: &str = "HOST";
pub const ENV_PORT: &str = "PORT";
pub const ENV_BLOB_STORAGE_PATH: &str = "BLOB_STORAGE_PATH";
pub const ENV_MAX_UPLOAD_BYTES: &str = "MAX_UPLOAD_BYTES";
pub const ENV_PAGE_LIMIT: &str = "PAGE_LIMIT";
pub const ENV_PUBLIC_BASE_URL: &str = "PUBLIC_BASE_URL";
pub const ENV_JWT_SECRET: &str = "JWT_SECRET";
pub const ENV_JWT_TTL_HOURS: &str = "JWT_TTL_HOURS";
pub const ENV_ALLOWED_ORIGINS: &str = "ALLOWED_ORIGINS";
pub const ENV_RATE_LIMIT_ENABLED: &str = "RATE_LIMIT_ENABLED";
pub const ENV_RATE_LIMIT_REQUESTS: &str = "RATE_LIMIT_REQUESTS";
pub const ENV_RATE_LIMIT_PERIOD_SECS: &str = "RATE_LIMIT_PERIOD_SECS";
