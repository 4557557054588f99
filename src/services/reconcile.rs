//! Reconciliation sweep between the metadata repository and the content
//! store.
//!
//! Repairs the two kinds of drift the lifecycle ordering can leave behind:
//! blobs no record references (an upload whose record insert failed or was
//! cancelled) and records whose blob is gone (a permanent delete whose
//! record delete failed).

use crate::services::{
    content_store::{ContentStore, ContentStoreError},
    file_lifecycle::{FileLifecycle, LifecycleError, LifecycleResult},
};
use chrono::Utc;
use futures::{StreamExt, stream};
use serde::Serialize;
use std::{collections::HashSet, time::Duration};
use tracing::{error, info, warn};

const DELETE_CONCURRENCY: usize = 8;

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub partial_writes_removed: usize,
    pub orphan_blobs_removed: usize,
    pub dangling_records_removed: usize,
}

impl FileLifecycle {
    /// Run one sweep. Blobs and partial writes younger than `grace` are
    /// left alone so an upload still in progress is not disturbed.
    pub async fn reconcile(&self, grace: Duration) -> LifecycleResult<ReconcileReport> {
        let mut report = ReconcileReport::default();
        let cutoff = Utc::now()
            - chrono::Duration::from_std(grace).unwrap_or_else(|_| chrono::Duration::zero());

        report.partial_writes_removed = self
            .bounded(self.content_store().purge_partial_writes(cutoff))
            .await
            .map_err(storage_error)?;

        // Records read before listing blobs: each already had its blob
        // written, so a key absent from the listing really is missing.
        let before = self.repository().storage_keys().await?;
        let blobs = self
            .bounded(self.content_store().list_blobs())
            .await
            .map_err(storage_error)?;
        let after = self.repository().storage_keys().await?;

        let listed: HashSet<&str> = blobs.iter().map(|b| b.key.as_str()).collect();
        for (id, owner, key) in &before {
            if listed.contains(key.as_str()) {
                continue;
            }
            let _guard = self.locks().lock(*id).await;
            let still_missing = matches!(
                self.bounded(self.content_store().get(key)).await,
                Err(ContentStoreError::NotFound(_))
            );
            if still_missing && self.repository().delete_file(owner, *id).await? {
                warn!(file_id = %id, storage_key = %key, "removed record with missing blob");
                report.dangling_records_removed += 1;
            }
        }

        let referenced: HashSet<&str> = after.iter().map(|(_, _, key)| key.as_str()).collect();
        let orphans: Vec<&str> = blobs
            .iter()
            .filter(|b| b.stored_at < cutoff && !referenced.contains(b.key.as_str()))
            .map(|b| b.key.as_str())
            .collect();

        let results: Vec<_> = stream::iter(orphans)
            .map(|key| async move { (key, self.bounded(self.content_store().delete(key)).await) })
            .buffer_unordered(DELETE_CONCURRENCY)
            .collect()
            .await;

        for (key, result) in results {
            match result {
                Ok(()) => {
                    warn!(storage_key = %key, "removed orphan blob");
                    report.orphan_blobs_removed += 1;
                }
                Err(ContentStoreError::NotFound(_)) => {}
                Err(err) => error!(storage_key = %key, "failed to remove orphan blob: {}", err),
            }
        }

        info!(?report, "reconciliation sweep finished");
        Ok(report)
    }
}

fn storage_error(err: ContentStoreError) -> LifecycleError {
    LifecycleError::StorageUnavailable(err.to_string())
}
