//! Shared application state.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::{Quota, RateLimiter};

use marginalia_core::{
    AttachmentLifecycle, AuthGateway, BlobStore, ListingAssembler, NoteStore, UserStore,
};

use crate::auth::JwtAuthGateway;
use crate::config::ServerConfig;

/// Global rate limiter type (direct quota, no keyed bucketing).
pub type GlobalRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub notes: Arc<dyn NoteStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub auth: Arc<dyn AuthGateway>,
    pub lifecycle: AttachmentLifecycle,
    pub listing: ListingAssembler,
    pub config: Arc<ServerConfig>,
    /// None if rate limiting is disabled.
    pub rate_limiter: Option<Arc<GlobalRateLimiter>>,
}

impl AppState {
    /// Wire the coordinators and the JWT gateway over the given stores.
    pub fn new(
        config: ServerConfig,
        notes: Arc<dyn NoteStore>,
        users: Arc<dyn UserStore>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        let auth = JwtAuthGateway::new(users, &config.jwt_secret, config.jwt_ttl_hours);
        Self {
            lifecycle: AttachmentLifecycle::new(Arc::clone(&notes), Arc::clone(&blobs)),
            listing: ListingAssembler::new(Arc::clone(&notes), config.public_base_url.clone()),
            rate_limiter: build_rate_limiter(&config),
            auth: Arc::new(auth),
            notes,
            blobs,
            config: Arc::new(config),
        }
    }
}

/// Build the global limiter, or None when disabled.
pub fn build_rate_limiter(config: &ServerConfig) -> Option<Arc<GlobalRateLimiter>> {
    if !config.rate_limit_enabled {
        return None;
    }
    let burst = NonZeroU32::new(u32::try_from(config.rate_limit_requests).unwrap_or(u32::MAX))?;
    // One cell replenishes every period / requests.
    let replenish = Duration::from_secs(config.rate_limit_period_secs) / burst.get();
    let quota = Quota::with_period(replenish)?.allow_burst(burst);
    Some(Arc::new(RateLimiter::direct(quota)))
}
