//! Server configuration from environment variables.
//!
//! Every variable has a default in [`marginalia_core::defaults`] except
//! `JWT_SECRET`, which must be set.

use std::path::PathBuf;
use std::time::Duration;

use marginalia_core::defaults::{self, *};
use marginalia_core::{Error, Result};
use marginalia_db::PoolConfig;

/// Parsed server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub database_url: String,
    pub db_max_connections: u32,
    pub db_acquire_timeout: Duration,
    pub db_statement_timeout: Duration,
    pub host: String,
    pub port: u16,
    pub blob_storage_path: PathBuf,
    pub max_upload_bytes: u64,
    pub page_limit: i64,
    /// Prefix for computed attachment URLs, without a trailing slash.
    pub public_base_url: String,
    pub jwt_secret: String,
    pub jwt_ttl_hours: i64,
    pub allowed_origins: Vec<String>,
    pub rate_limit_enabled: bool,
    pub rate_limit_requests: u64,
    pub rate_limit_period_secs: u64,
}

impl ServerConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read configuration through an arbitrary lookup. Unset and empty
    /// variables fall back to their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let host = get(ENV_HOST).unwrap_or_else(|| SERVER_HOST.to_string());
        let port = parse_or(&get, ENV_PORT, SERVER_PORT)?;

        let page_limit = parse_or(&get, ENV_PAGE_LIMIT, defaults::PAGE_LIMIT)?;
        if !(1..=PAGE_LIMIT_MAX).contains(&page_limit) {
            return Err(Error::Config(format!(
                "{} must be between 1 and {}",
                ENV_PAGE_LIMIT, PAGE_LIMIT_MAX
            )));
        }

        let max_upload_bytes = parse_or(&get, ENV_MAX_UPLOAD_BYTES, defaults::MAX_UPLOAD_BYTES)?;
        if max_upload_bytes == 0 {
            return Err(Error::Config(format!("{} must be positive", ENV_MAX_UPLOAD_BYTES)));
        }

        let jwt_secret = get(ENV_JWT_SECRET)
            .ok_or_else(|| Error::Config(format!("{} is required", ENV_JWT_SECRET)))?;
        let jwt_ttl_hours = parse_or(&get, ENV_JWT_TTL_HOURS, JWT_TTL_HOURS)?;
        if jwt_ttl_hours <= 0 {
            return Err(Error::Config(format!("{} must be positive", ENV_JWT_TTL_HOURS)));
        }

        let rate_limit_requests = parse_or(&get, ENV_RATE_LIMIT_REQUESTS, RATE_LIMIT_REQUESTS)?;
        let rate_limit_period_secs =
            parse_or(&get, ENV_RATE_LIMIT_PERIOD_SECS, RATE_LIMIT_PERIOD_SECS)?;
        if rate_limit_requests == 0 || rate_limit_period_secs == 0 {
            return Err(Error::Config(
                "Rate limit requests and period must be non-zero".to_string(),
            ));
        }

        let public_base_url = get(ENV_PUBLIC_BASE_URL)
            .unwrap_or_else(|| format!("http://{}:{}", host, port))
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            database_url: get(ENV_DATABASE_URL).unwrap_or_else(|| DATABASE_URL.to_string()),
            db_max_connections: parse_or(&get, ENV_DB_MAX_CONNECTIONS, DB_MAX_CONNECTIONS)?,
            db_acquire_timeout: Duration::from_secs(parse_or(
                &get,
                ENV_DB_ACQUIRE_TIMEOUT_SECS,
                DB_ACQUIRE_TIMEOUT_SECS,
            )?),
            db_statement_timeout: Duration::from_millis(parse_or(
                &get,
                ENV_DB_STATEMENT_TIMEOUT_MS,
                DB_STATEMENT_TIMEOUT_MS,
            )?),
            blob_storage_path: get(ENV_BLOB_STORAGE_PATH)
                .unwrap_or_else(|| BLOB_STORAGE_PATH.to_string())
                .into(),
            allowed_origins: parse_allowed_origins(
                &get(ENV_ALLOWED_ORIGINS).unwrap_or_else(|| ALLOWED_ORIGINS.to_string()),
            ),
            rate_limit_enabled: get(ENV_RATE_LIMIT_ENABLED)
                .map(|v| v == "true" || v == "1")
                .unwrap_or(true),
            host,
            port,
            page_limit,
            max_upload_bytes,
            public_base_url,
            jwt_secret,
            jwt_ttl_hours,
            rate_limit_requests,
            rate_limit_period_secs,
        })
    }

    /// Pool settings for [`marginalia_db::Database::connect_with_config`].
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig::new()
            .max_connections(self.db_max_connections)
            .acquire_timeout(self.db_acquire_timeout)
            .statement_timeout(self.db_statement_timeout)
    }

    /// Largest request body accepted: the upload ceiling plus multipart framing.
    pub fn body_limit(&self) -> usize {
        usize::try_from(self.max_upload_bytes)
            .unwrap_or(usize::MAX)
            .saturating_add(MULTIPART_OVERHEAD_BYTES)
    }
}

fn parse_or<T, G>(get: &G, name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("{} has an invalid value: {}", name, raw))),
        None => Ok(default),
    }
}

/// Split a comma-separated origin list, dropping blanks.
pub fn parse_allowed_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
