//! Core data models for the file storage and sharing service.
//!
//! These entities map to the `files` and `shares` tables via `sqlx::FromRow`
//! and serialize as JSON via `serde` for the HTTP layer.

pub mod file;
pub mod share;
