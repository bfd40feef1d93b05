//! # marginalia-api
//!
//! HTTP surface for marginalia: accounts, notes with hashtags, file
//! attachments and per-user manual ordering.
//!
//! The router is storage-agnostic. [`AppState::new`] takes any
//! [`marginalia_core::NoteStore`], [`marginalia_core::UserStore`] and
//! [`marginalia_core::BlobStore`]; the binary wires PostgreSQL and the
//! filesystem, tests wire the in-memory stores.

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use auth::{JwtAuthGateway, RequireUser};
pub use config::ServerConfig;
pub use error::ApiError;
pub use routes::{build_router, ApiDoc};
pub use state::AppState;
