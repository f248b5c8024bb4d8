use std::io;
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, info, warn};

use super::api::TrackerApi;
use super::backoff::Backoff;
use super::model::{ItemFailurePolicy, TransferItem};
use super::store::{DriveStore, StoreError, UploadOutcome};

pub const DOWNLOAD_CONCURRENCY: usize = 8;
pub const UPLOAD_CONCURRENCY: usize = 4;
pub const UPLOAD_ATTEMPTS: u32 = 6;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("{failed} of {total} downloads failed")]
    DownloadsFailed { failed: usize, total: usize },
    #[error("{failed} of {total} uploads failed")]
    UploadsFailed { failed: usize, total: usize },
    #[error("transfer worker panicked: {0}")]
    Worker(#[from] JoinError),
    #[error("concurrency limiter is closed")]
    ConcurrencyClosed,
}

/// Fetches attachment bytes into the staging directory.
pub struct Downloader {
    tracker: Arc<dyn TrackerApi>,
    limit: Arc<Semaphore>,
}

impl Downloader {
    pub fn new(tracker: Arc<dyn TrackerApi>, concurrency: usize) -> Self {
        Self {
            tracker,
            limit: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    /// Downloads every item, then fails if any single one failed.
    /// Returns the number of bytes staged.
    pub async fn download_all(&self, items: &[TransferItem]) -> Result<u64, TransferError> {
        let mut units = JoinSet::new();
        for item in items {
            let tracker = Arc::clone(&self.tracker);
            let limit = Arc::clone(&self.limit);
            let item = item.clone();
            units.spawn(async move {
                let _permit = limit
                    .acquire_owned()
                    .await
                    .map_err(|_| TransferError::ConcurrencyClosed)?;
                let result = tracker.download(&item.download_url, item.staging_path()).await;
                Ok::<_, TransferError>((item, result))
            });
        }

        let mut failed = 0usize;
        let mut bytes = 0u64;
        while let Some(joined) = units.join_next().await {
            let (item, result) = joined??;
            match result {
                Ok(size) => {
                    debug!(id = %item.source_id, name = %item.name, bytes = size, "attachment staged");
                    bytes += size;
                }
                Err(err) => {
                    warn!(id = %item.source_id, name = %item.name, error = %err, "download failed");
                    failed += 1;
                }
            }
        }

        if failed > 0 {
            return Err(TransferError::DownloadsFailed {
                failed,
                total: items.len(),
            });
        }
        info!(files = items.len(), bytes, "attachments downloaded");
        Ok(bytes)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadReport {
    pub created: usize,
    pub replaced: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl UploadReport {
    fn record(&mut self, outcome: UploadOutcome) {
        match outcome {
            UploadOutcome::Created => self.created += 1,
            UploadOutcome::Replaced => self.replaced += 1,
            UploadOutcome::Skipped => self.skipped += 1,
        }
    }
}

/// Pushes staged files to the drive, retrying with exponential backoff.
pub struct Uploader {
    store: Arc<DriveStore>,
    limit: Arc<Semaphore>,
    backoff: Backoff,
    attempts: u32,
    policy: ItemFailurePolicy,
}

impl Uploader {
    pub fn new(store: Arc<DriveStore>, concurrency: usize) -> Self {
        Self {
            store,
            limit: Arc::new(Semaphore::new(concurrency.max(1))),
            backoff: Backoff::for_uploads(false),
            attempts: UPLOAD_ATTEMPTS,
            policy: ItemFailurePolicy::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_policy(mut self, policy: ItemFailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub async fn upload_all(&self, items: &[TransferItem]) -> Result<UploadReport, TransferError> {
        let mut units = JoinSet::new();
        for item in items {
            let store = Arc::clone(&self.store);
            let limit = Arc::clone(&self.limit);
            let item = item.clone();
            let backoff = self.backoff;
            let attempts = self.attempts;
            units.spawn(async move {
                let _permit = limit
                    .acquire_owned()
                    .await
                    .map_err(|_| TransferError::ConcurrencyClosed)?;
                let result = upload_with_retry(&store, &item, backoff, attempts).await;
                remove_staged(item.staging_path()).await;
                Ok::<_, TransferError>((item, result))
            });
        }

        let mut report = UploadReport::default();
        while let Some(joined) = units.join_next().await {
            let (item, result) = joined??;
            match result {
                Ok(outcome) => report.record(outcome),
                Err(err) => {
                    warn!(path = %item.remote_path(), error = %err, "upload gave up");
                    report.failed += 1;
                }
            }
        }

        info!(
            created = report.created,
            replaced = report.replaced,
            skipped = report.skipped,
            failed = report.failed,
            "uploads finished"
        );
        if self.policy == ItemFailurePolicy::Strict && report.failed > 0 {
            return Err(TransferError::UploadsFailed {
                failed: report.failed,
                total: items.len(),
            });
        }
        Ok(report)
    }
}

async fn upload_with_retry(
    store: &DriveStore,
    item: &TransferItem,
    backoff: Backoff,
    attempts: u32,
) -> Result<UploadOutcome, StoreError> {
    let mut attempt = 0u32;
    loop {
        match store.upload(item).await {
            Ok(outcome) => {
                debug!(path = %item.remote_path(), ?outcome, attempt, "upload done");
                return Ok(outcome);
            }
            Err(err) if err.is_retryable() && attempt + 1 < attempts => {
                let delay = backoff.delay(attempt);
                warn!(
                    path = %item.remote_path(),
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "upload failed, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Staged bytes go away once their upload is settled, whatever the outcome.
pub async fn remove_staged(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => warn!(path = %path.display(), error = %err, "cannot remove staged file"),
    }
}
