//! src/services/content_store.rs
//!
//! Key-addressed blob storage. The lifecycle engine only ever talks to the
//! [`ContentStore`] trait; [`DiskContentStore`] is the local-disk backend,
//! sharding payloads beneath `base_path/{shard}/{shard}/{key}`.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    pin::Pin,
};
use thiserror::Error;
use tokio::{
    fs::{self, File, ReadDir},
    io::{AsyncRead, AsyncWriteExt},
};
use tracing::debug;
use uuid::Uuid;

const TMP_PREFIX: &str = ".tmp-";
const CREATE_ATTEMPTS: u32 = 3;

#[derive(Debug, Error)]
pub enum ContentStoreError {
    #[error("blob `{0}` not found")]
    NotFound(String),
    #[error("invalid storage key `{0}`")]
    InvalidKey(String),
    #[error("content store did not answer within {0:?}")]
    Timeout(std::time::Duration),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type ContentResult<T> = Result<T, ContentStoreError>;

/// Readable blob body handed to the HTTP layer for streaming.
pub type ContentReader = Pin<Box<dyn AsyncRead + Send>>;

/// A committed blob as seen by [`ContentStore::list_blobs`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredBlob {
    pub key: String,
    pub stored_at: DateTime<Utc>,
}

/// Narrow blob-storage capability used by the lifecycle engine.
///
/// Keys returned by `put` are unique and never reused.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Persist `bytes` durably and return the key addressing them.
    async fn put(&self, bytes: Bytes) -> ContentResult<String>;

    /// Read back the bytes stored under `key`.
    async fn get(&self, key: &str) -> ContentResult<Bytes>;

    /// Open the blob under `key` for streaming. Backends without a native
    /// reader hand out the bytes from [`ContentStore::get`].
    async fn open(&self, key: &str) -> ContentResult<ContentReader> {
        let bytes = self.get(key).await?;
        Ok(Box::pin(io::Cursor::new(bytes)))
    }

    /// Remove the blob under `key`. Returns `NotFound` if it was already gone.
    async fn delete(&self, key: &str) -> ContentResult<()>;

    /// Enumerate every committed blob. Used by the reconciliation sweep.
    async fn list_blobs(&self) -> ContentResult<Vec<StoredBlob>>;

    /// Remove leftovers of interrupted writes last touched before `cutoff`.
    /// Writes still in progress are newer and left alone. Returns how many
    /// were removed.
    async fn purge_partial_writes(&self, _cutoff: DateTime<Utc>) -> ContentResult<usize> {
        Ok(0)
    }
}

/// Content store backed by the local filesystem.
#[derive(Clone, Debug)]
pub struct DiskContentStore {
    base_path: PathBuf,
}

impl DiskContentStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Keys are generated by `put` as 32 lowercase hex characters; anything
    /// else could escape `base_path` and is refused.
    fn ensure_key_safe(key: &str) -> ContentResult<()> {
        if key.len() == 32 && key.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            Ok(())
        } else {
            Err(ContentStoreError::InvalidKey(key.to_string()))
        }
    }

    /// Two-level shard directories from MD5(key), `00`–`ff` each.
    fn shards(key: &str) -> (String, String) {
        let digest = md5::compute(key);
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn blob_path(&self, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::shards(key);
        let mut path = self.base_path.clone();
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    /// Remove empty shard directories up to (not including) `base_path`.
    async fn prune_empty_dirs(&self, start: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(&self.base_path) && current != self.base_path {
            match fs::remove_dir(&current).await {
                Ok(_) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }

    /// Visit every file two shard levels below `base_path`. Shard
    /// directories pruned by a concurrent delete are skipped.
    async fn walk_shards(&self) -> ContentResult<Vec<PathBuf>> {
        let mut found = Vec::new();
        let Some(mut level_one) = read_dir_if_present(&self.base_path).await? else {
            return Ok(found);
        };
        while let Some(shard_a) = level_one.next_entry().await? {
            if !shard_a.file_type().await?.is_dir() {
                continue;
            }
            let Some(mut level_two) = read_dir_if_present(&shard_a.path()).await? else {
                continue;
            };
            while let Some(shard_b) = level_two.next_entry().await? {
                if !shard_b.file_type().await?.is_dir() {
                    continue;
                }
                let Some(mut blobs) = read_dir_if_present(&shard_b.path()).await? else {
                    continue;
                };
                while let Some(blob) = blobs.next_entry().await? {
                    if blob.file_type().await?.is_file() {
                        found.push(blob.path());
                    }
                }
            }
        }
        Ok(found)
    }

    /// Create the temp file for a write. A concurrent delete may prune the
    /// shard directory between `create_dir_all` and the create, so a
    /// `NotFound` is retried.
    async fn create_tmp(parent: &Path, tmp_path: &Path) -> io::Result<File> {
        let mut attempt = 1;
        loop {
            let created = match fs::create_dir_all(parent).await {
                Ok(()) => File::create(tmp_path).await,
                Err(err) => Err(err),
            };
            match created {
                Err(err) if err.kind() == ErrorKind::NotFound && attempt < CREATE_ATTEMPTS => {
                    debug!("shard {} pruned during write, retrying", parent.display());
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

async fn read_dir_if_present(path: &Path) -> io::Result<Option<ReadDir>> {
    match fs::read_dir(path).await {
        Ok(entries) => Ok(Some(entries)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

#[async_trait]
impl ContentStore for DiskContentStore {
    /// Write to a temp file, fsync, then rename into place. A failed or
    /// cancelled write never leaves anything under a committed key.
    async fn put(&self, bytes: Bytes) -> ContentResult<String> {
        let key = Uuid::new_v4().simple().to_string();
        let blob_path = self.blob_path(&key);
        let parent = blob_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            ContentStoreError::Io(io::Error::new(
                ErrorKind::Other,
                "blob path missing parent directory",
            ))
        })?;
        let tmp_path = parent.join(format!("{}{}", TMP_PREFIX, Uuid::new_v4()));

        let written = async {
            let mut file = Self::create_tmp(&parent, &tmp_path).await?;
            file.write_all(&bytes).await?;
            file.flush().await?;
            file.sync_all().await?;
            fs::rename(&tmp_path, &blob_path).await
        }
        .await;

        if let Err(err) = written {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(ContentStoreError::Io(err));
        }

        debug!("stored blob {} ({} bytes)", key, bytes.len());
        Ok(key)
    }

    async fn get(&self, key: &str) -> ContentResult<Bytes> {
        Self::ensure_key_safe(key)?;
        match fs::read(self.blob_path(key)).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(ContentStoreError::NotFound(key.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn open(&self, key: &str) -> ContentResult<ContentReader> {
        Self::ensure_key_safe(key)?;
        match File::open(self.blob_path(key)).await {
            Ok(file) => Ok(Box::pin(file)),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(ContentStoreError::NotFound(key.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn delete(&self, key: &str) -> ContentResult<()> {
        Self::ensure_key_safe(key)?;
        let blob_path = self.blob_path(key);
        match fs::remove_file(&blob_path).await {
            Ok(_) => debug!("removed blob {}", blob_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(ContentStoreError::NotFound(key.to_string()));
            }
            Err(err) => return Err(err.into()),
        }

        if let Some(parent) = blob_path.parent() {
            self.prune_empty_dirs(parent).await;
        }
        Ok(())
    }

    async fn list_blobs(&self) -> ContentResult<Vec<StoredBlob>> {
        let mut blobs = Vec::new();
        for path in self.walk_shards().await? {
            let Some(key) = path
                .file_name()
                .and_then(|name| name.to_str())
                .filter(|name| Self::ensure_key_safe(name).is_ok())
            else {
                continue;
            };
            let modified = match fs::metadata(&path).await {
                Ok(meta) => meta.modified()?,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };
            blobs.push(StoredBlob {
                key: key.to_string(),
                stored_at: DateTime::<Utc>::from(modified),
            });
        }
        Ok(blobs)
    }

    async fn purge_partial_writes(&self, cutoff: DateTime<Utc>) -> ContentResult<usize> {
        let mut removed = 0;
        for path in self.walk_shards().await? {
            let is_tmp = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with(TMP_PREFIX));
            if !is_tmp {
                continue;
            }
            let modified = match fs::metadata(&path).await {
                Ok(meta) => DateTime::<Utc>::from(meta.modified()?),
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };
            if modified >= cutoff {
                continue;
            }
            match fs::remove_file(&path).await {
                Ok(_) => removed += 1,
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(removed)
    }
}
