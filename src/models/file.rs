//! Represents a stored file's metadata record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeSet;
use uuid::Uuid;

/// Folder assigned when the uploader does not name one.
pub const DEFAULT_FOLDER: &str = "root";

/// Metadata for one uploaded file.
///
/// The record never holds content bytes; those live in the content store
/// under `storage_key`. `owner_id` and `storage_key` are fixed at creation.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq, Eq)]
pub struct File {
    /// Stable, opaque identifier.
    pub id: Uuid,

    /// Identity of the uploading user.
    pub owner_id: String,

    /// Sanitized display name, e.g. `notes.txt`.
    pub name: String,

    /// Flat folder label; defaults to [`DEFAULT_FOLDER`].
    pub folder: String,

    /// Free-form description supplied at upload.
    pub description: String,

    /// MIME type reported by the uploader.
    pub content_type: String,

    /// Size of the blob in bytes.
    pub size_bytes: i64,

    /// Key of the blob in the content store.
    pub storage_key: String,

    /// When the record was created.
    pub created_at: DateTime<Utc>,

    /// Marked as a favorite by the owner.
    pub favorite: bool,

    /// Soft-deleted; hidden from the default listing but still restorable.
    pub trashed: bool,

    /// Recipients this file has been shared with, aggregated from the
    /// `shares` table whenever the record is loaded.
    #[sqlx(skip)]
    pub shared_to: BTreeSet<String>,
}

/// Where a file sits in its trash lifecycle.
///
/// `Deleted` is terminal and never observed on a loaded record: a deleted
/// file has no row left to load.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FileState {
    Active,
    Trashed,
    Deleted,
}

impl File {
    pub fn state(&self) -> FileState {
        if self.trashed {
            FileState::Trashed
        } else {
            FileState::Active
        }
    }
}
