//! # marginalia-core
//!
//! Core types, traits, and coordinators for marginalia, a note service with
//! hashtags, file attachments and per-user manual ordering.
//!
//! This crate owns the rules that keep a note aggregate consistent across
//! the relational store and the blob store. Storage backends live in
//! `marginalia-db`; the HTTP surface lives in `marginalia-api`.

pub mod defaults;
pub mod error;
pub mod file_safety;
pub mod lifecycle;
pub mod listing;
pub mod logging;
pub mod memory;
pub mod models;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, ErrorKind, Result};
pub use file_safety::{
    generate_blob_key, is_valid_blob_key, is_valid_mime_type, resolve_mime_type, sanitize_filename,
};
pub use lifecycle::{purge_blobs, AttachmentLifecycle, UploadRequest};
pub use listing::ListingAssembler;
pub use models::*;
pub use traits::*;
