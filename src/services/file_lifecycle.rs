//! src/services/file_lifecycle.rs
//!
//! Owner-scoped state transitions for file records, and the
//! ordering rules that keep records and blobs consistent:
//!
//! - upload: validate → put blob → insert record
//! - permanent delete: verify ownership → delete blob → delete record + shares
//!
//! Every mutation of a given file id runs under that id's lock, so
//! concurrent requests cannot lose updates to `favorite`, `trashed` or the
//! share set. Authorization failures and missing records are reported the
//! same way (`NotFoundOrForbidden`) so callers learn nothing about files
//! they do not own.

use crate::{
    models::{file::File, share::Share},
    services::{
        content_store::{ContentReader, ContentResult, ContentStore, ContentStoreError},
        file_locks::FileLocks,
        metadata_repository::{FileFilter, MetadataRepository},
        upload_gateway::{RawUpload, ValidationError, validate_and_stage},
    },
};
use chrono::Utc;
use std::{future::Future, sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const MAX_RECIPIENT_LEN: usize = 320;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("file type of `{0}` is not allowed")]
    InvalidFileType(String),
    #[error("invalid file name `{0}`")]
    InvalidName(String),
    #[error("invalid recipient `{0}`")]
    InvalidRecipient(String),
    #[error("file not found")]
    NotFoundOrForbidden,
    #[error("content storage unavailable: {0}")]
    StorageUnavailable(String),
    #[error("inconsistent state: {0}")]
    InconsistentState(String),
    #[error(transparent)]
    Repository(#[from] sqlx::Error),
}

impl From<ValidationError> for LifecycleError {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::InvalidFileType(name) => Self::InvalidFileType(name),
            ValidationError::InvalidName(name) => Self::InvalidName(name),
        }
    }
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;

#[derive(Clone)]
pub struct FileLifecycle {
    repo: MetadataRepository,
    content: Arc<dyn ContentStore>,
    locks: FileLocks,
    storage_timeout: Duration,
}

impl FileLifecycle {
    pub fn new(
        repo: MetadataRepository,
        content: Arc<dyn ContentStore>,
        storage_timeout: Duration,
    ) -> Self {
        Self {
            repo,
            content,
            locks: FileLocks::new(),
            storage_timeout,
        }
    }

    pub fn repository(&self) -> &MetadataRepository {
        &self.repo
    }

    pub fn content_store(&self) -> &Arc<dyn ContentStore> {
        &self.content
    }

    pub(crate) fn locks(&self) -> &FileLocks {
        &self.locks
    }

    /// Run a content-store call under the configured timeout.
    pub(crate) async fn bounded<T>(
        &self,
        call: impl Future<Output = ContentResult<T>>,
    ) -> ContentResult<T> {
        tokio::time::timeout(self.storage_timeout, call)
            .await
            .unwrap_or(Err(ContentStoreError::Timeout(self.storage_timeout)))
    }

    /// Validate, store the blob, then create the record.
    ///
    /// A rejected upload performs no writes. If the record insert fails the
    /// blob is removed best-effort; anything left behind is an unreferenced
    /// blob for the reconciliation sweep.
    pub async fn upload(&self, owner: &str, raw: RawUpload) -> LifecycleResult<File> {
        let staged = validate_and_stage(raw)?;

        let storage_key = self
            .bounded(self.content.put(staged.bytes))
            .await
            .map_err(unavailable)?;

        let file = File {
            id: Uuid::new_v4(),
            owner_id: owner.to_string(),
            name: staged.name,
            folder: staged.folder,
            description: staged.description,
            content_type: staged.content_type,
            size_bytes: staged.size_bytes,
            storage_key,
            created_at: Utc::now(),
            favorite: false,
            trashed: false,
            shared_to: Default::default(),
        };

        match self.repo.insert_file(&file).await {
            Ok(created) => {
                info!(file_id = %created.id, owner, name = %created.name, "file uploaded");
                Ok(created)
            }
            Err(err) => {
                warn!(
                    storage_key = %file.storage_key,
                    "record insert failed after blob write: {}", err
                );
                if let Err(cleanup) = self.bounded(self.content.delete(&file.storage_key)).await {
                    warn!(
                        storage_key = %file.storage_key,
                        "orphan blob left for reconciliation: {}", cleanup
                    );
                }
                Err(err.into())
            }
        }
    }

    /// Fetch one owned record.
    pub async fn get(&self, owner: &str, id: Uuid) -> LifecycleResult<File> {
        self.repo
            .find_owned(owner, id)
            .await?
            .ok_or(LifecycleError::NotFoundOrForbidden)
    }

    /// Move a file to the trash. Already-trashed files are returned as is.
    pub async fn trash(&self, owner: &str, id: Uuid) -> LifecycleResult<File> {
        self.set_trashed(owner, id, true).await
    }

    /// Bring a file back from the trash. Active files are returned as is.
    pub async fn restore(&self, owner: &str, id: Uuid) -> LifecycleResult<File> {
        self.set_trashed(owner, id, false).await
    }

    async fn set_trashed(&self, owner: &str, id: Uuid, trashed: bool) -> LifecycleResult<File> {
        let _guard = self.locks.lock(id).await;
        let file = self
            .repo
            .set_trashed(owner, id, trashed)
            .await?
            .ok_or(LifecycleError::NotFoundOrForbidden)?;
        info!(file_id = %id, owner, state = ?file.state(), "trash state updated");
        Ok(file)
    }

    /// Destroy a file from either state: blob first, then the record and
    /// every share referencing it.
    ///
    /// If the blob cannot be removed the record is left untouched. A blob
    /// that is already gone does not block removal of its record.
    pub async fn permanent_delete(&self, owner: &str, id: Uuid) -> LifecycleResult<()> {
        let _guard = self.locks.lock(id).await;
        let file = self
            .repo
            .find_owned(owner, id)
            .await?
            .ok_or(LifecycleError::NotFoundOrForbidden)?;

        match self.bounded(self.content.delete(&file.storage_key)).await {
            Ok(()) => {}
            Err(ContentStoreError::NotFound(key)) => {
                warn!(file_id = %id, storage_key = %key, "blob already missing; removing record");
            }
            Err(ContentStoreError::InvalidKey(key)) => {
                error!(file_id = %id, storage_key = %key, "record holds an unusable storage key");
                return Err(LifecycleError::InconsistentState(format!(
                    "file {id} references invalid storage key `{key}`"
                )));
            }
            Err(err) => return Err(unavailable(err)),
        }

        match self.repo.delete_file(owner, id).await {
            Ok(true) => {
                info!(file_id = %id, owner, "file permanently deleted");
                Ok(())
            }
            Ok(false) => {
                error!(file_id = %id, "record vanished while its blob was being deleted");
                Err(LifecycleError::InconsistentState(format!(
                    "file {id} disappeared during deletion"
                )))
            }
            Err(err) => {
                error!(
                    file_id = %id,
                    storage_key = %file.storage_key,
                    "blob deleted but record delete failed: {}", err
                );
                Err(LifecycleError::InconsistentState(format!(
                    "blob for file {id} deleted but record remains: {err}"
                )))
            }
        }
    }

    /// Flip the favorite flag.
    pub async fn toggle_favorite(&self, owner: &str, id: Uuid) -> LifecycleResult<File> {
        let _guard = self.locks.lock(id).await;
        let file = self
            .repo
            .toggle_favorite(owner, id)
            .await?
            .ok_or(LifecycleError::NotFoundOrForbidden)?;
        info!(file_id = %id, owner, favorite = file.favorite, "favorite toggled");
        Ok(file)
    }

    /// Grant `recipient` access to a file. Sharing the same pair twice is a
    /// silent no-op: one grant, one entry in `shared_to`.
    pub async fn share(&self, owner: &str, id: Uuid, recipient: &str) -> LifecycleResult<File> {
        let recipient = normalize_recipient(recipient)?;

        let _guard = self.locks.lock(id).await;
        if self.repo.find_owned(owner, id).await?.is_none() {
            return Err(LifecycleError::NotFoundOrForbidden);
        }

        let share = Share {
            file_id: id,
            recipient: recipient.clone(),
            shared_by: owner.to_string(),
            shared_at: Utc::now(),
        };
        if self.repo.insert_share(&share).await? {
            info!(file_id = %id, owner, recipient = %recipient, "file shared");
        } else {
            debug!(file_id = %id, recipient = %recipient, "duplicate share ignored");
        }

        self.repo
            .find_owned(owner, id)
            .await?
            .ok_or(LifecycleError::NotFoundOrForbidden)
    }

    /// Files `owner` has shared, each with its full recipient set, newest
    /// first. Trashed files are included.
    pub async fn list_shared_by_me(&self, owner: &str) -> LifecycleResult<Vec<File>> {
        let filter = FileFilter {
            shared_only: true,
            ..FileFilter::owned_by(owner)
        };
        Ok(self.repo.find_files(&filter).await?)
    }

    /// Owner-scoped content read, from either state. The lock covers only
    /// opening the blob; an open reader survives a later delete.
    pub async fn download(&self, owner: &str, id: Uuid) -> LifecycleResult<(File, ContentReader)> {
        let _guard = self.locks.lock(id).await;
        let file = self
            .repo
            .find_owned(owner, id)
            .await?
            .ok_or(LifecycleError::NotFoundOrForbidden)?;

        match self.bounded(self.content.open(&file.storage_key)).await {
            Ok(reader) => Ok((file, reader)),
            Err(ContentStoreError::NotFound(key)) | Err(ContentStoreError::InvalidKey(key)) => {
                error!(file_id = %id, storage_key = %key, "record points at a missing blob");
                Err(LifecycleError::InconsistentState(format!(
                    "content for file {id} is missing"
                )))
            }
            Err(err) => Err(unavailable(err)),
        }
    }
}

fn unavailable(err: ContentStoreError) -> LifecycleError {
    warn!("content store error: {}", err);
    LifecycleError::StorageUnavailable(err.to_string())
}

fn normalize_recipient(recipient: &str) -> LifecycleResult<String> {
    let trimmed = recipient.trim();
    if trimmed.is_empty()
        || trimmed.len() > MAX_RECIPIENT_LEN
        || trimmed.chars().any(|c| c.is_control() || c.is_whitespace())
    {
        return Err(LifecycleError::InvalidRecipient(recipient.to_string()));
    }
    Ok(trimmed.to_string())
}
