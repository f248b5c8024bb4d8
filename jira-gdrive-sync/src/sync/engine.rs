use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use gdrive_core::DriveError;
use thiserror::Error;
use tracing::{info, warn};

use super::api::{DriveApi, TrackerApi};
use super::backoff::Backoff;
use super::delete::{DeleteError, DeleteReport, Deleter};
use super::folders::FolderCreator;
use super::model::{ItemFailurePolicy, RemoteItem, SyncDecision, TargetLayout};
use super::paths::{PathError, canonical_dir};
use super::phase::{Phase, PhaseError};
use super::reconcile::reconcile;
use super::source::{SourceError, SourceLister, SourceListing};
use super::store::DriveStore;
use super::transfer::{
    DOWNLOAD_CONCURRENCY, Downloader, TransferError, UPLOAD_CONCURRENCY, UploadReport, Uploader,
    remove_staged,
};
use super::tree::{TREE_CONCURRENCY, TreeError, TreeLister};

/// Failure of a single unit inside a phase.
#[derive(Debug, Error)]
pub enum UnitError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Tree(#[from] TreeError),
    #[error(transparent)]
    Transfer(#[from] TransferError),
    #[error(transparent)]
    Delete(#[from] DeleteError),
    #[error("drive error: {0}")]
    Drive(#[from] DriveError),
    #[error("target folders could not be created")]
    FoldersUnavailable,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Phase(#[from] PhaseError<UnitError>),
    #[error("invalid staging key: {0}")]
    Path(#[from] PathError),
    #[error("query {query:?} returned no attachments; refusing to empty the mirror")]
    EmptySource { query: String },
    #[error("staging directory unusable: {0}")]
    Staging(#[from] io::Error),
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub query: String,
    pub layout: TargetLayout,
    pub tree_concurrency: usize,
    pub download_concurrency: usize,
    pub upload_concurrency: usize,
    pub failure_policy: ItemFailurePolicy,
    pub allow_empty_source: bool,
    pub dry_run: bool,
    pub backoff: Backoff,
}

impl EngineSettings {
    pub fn new(query: impl Into<String>, root: &str, staging_root: PathBuf) -> Self {
        Self {
            query: query.into(),
            layout: TargetLayout {
                root: canonical_dir(root),
                staging_root,
                description_template: "Uploaded by {{uploader}} on {{date}}".to_string(),
            },
            tree_concurrency: TREE_CONCURRENCY,
            download_concurrency: DOWNLOAD_CONCURRENCY,
            upload_concurrency: UPLOAD_CONCURRENCY,
            failure_policy: ItemFailurePolicy::default(),
            allow_empty_source: false,
            dry_run: false,
            backoff: Backoff::for_uploads(false),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub planned_uploads: usize,
    pub planned_deletes: usize,
    pub planned_folders: usize,
    pub staged_bytes: u64,
    pub cleanup: Option<DeleteReport>,
    pub uploads: Option<UploadReport>,
    pub dry_run: bool,
    pub elapsed: Duration,
}

impl SyncSummary {
    fn planned(decision: &SyncDecision) -> Self {
        Self {
            planned_uploads: decision.to_upload.len(),
            planned_deletes: decision.to_delete.len(),
            planned_folders: decision.paths_to_create.len(),
            ..Self::default()
        }
    }
}

enum UnitOutput {
    Source(SourceListing),
    Remote(Vec<RemoteItem>),
    Staged(u64),
    Folders,
    Cleaned(DeleteReport),
    Uploaded(UploadReport),
}

/// One mirror run: list both sides, reconcile, then mutate in two phases.
pub struct SyncEngine {
    tracker: Arc<dyn TrackerApi>,
    store: Arc<DriveStore>,
    settings: EngineSettings,
}

impl SyncEngine {
    pub fn new(tracker: Arc<dyn TrackerApi>, drive: Arc<dyn DriveApi>, settings: EngineSettings) -> Self {
        Self {
            tracker,
            store: Arc::new(DriveStore::new(drive)),
            settings,
        }
    }

    pub async fn run(&self) -> Result<SyncSummary, SyncError> {
        let started = Instant::now();
        let (listing, remote) = self.listing_phase().await?;
        let source = match listing {
            SourceListing::Items(items) => items,
            SourceListing::Empty if self.settings.allow_empty_source => {
                warn!(query = %self.settings.query, "tracker returned nothing, mirroring an empty set");
                Vec::new()
            }
            SourceListing::Empty => {
                return Err(SyncError::EmptySource {
                    query: self.settings.query.clone(),
                });
            }
        };

        let decision = reconcile(&source, &remote, &self.settings.layout)?;
        let mut summary = SyncSummary::planned(&decision);
        if self.settings.dry_run {
            log_plan(&decision);
            summary.dry_run = true;
            summary.elapsed = started.elapsed();
            return Ok(summary);
        }
        if decision.is_noop() {
            summary.elapsed = started.elapsed();
            info!(elapsed_ms = summary.elapsed.as_millis() as u64, "mirror already up to date");
            return Ok(summary);
        }

        tokio::fs::create_dir_all(&self.settings.layout.staging_root).await?;
        let (staged_bytes, cleanup) = match self.transfer_phase(&decision).await {
            Ok(done) => done,
            Err(err) => {
                for item in &decision.to_upload {
                    remove_staged(item.staging_path()).await;
                }
                return Err(err);
            }
        };
        summary.staged_bytes = staged_bytes;
        summary.cleanup = Some(cleanup);
        summary.uploads = Some(self.upload_phase(&decision).await?);

        summary.elapsed = started.elapsed();
        info!(elapsed_ms = summary.elapsed.as_millis() as u64, "sync finished");
        Ok(summary)
    }

    async fn listing_phase(&self) -> Result<(SourceListing, Vec<RemoteItem>), SyncError> {
        let mut phase: Phase<UnitOutput, UnitError> = Phase::new("listing");
        let lister = SourceLister::new(Arc::clone(&self.tracker), self.settings.query.clone());
        phase.spawn("source listing", async move {
            Ok(UnitOutput::Source(lister.fetch().await?))
        });
        let tree = TreeLister::new(Arc::clone(&self.store), self.settings.tree_concurrency);
        let root = self.settings.layout.root.clone();
        phase.spawn("tree listing", async move {
            Ok(UnitOutput::Remote(tree.list_tree(&root).await?))
        });

        let mut listing = SourceListing::Empty;
        let mut remote = Vec::new();
        for output in phase.run().await? {
            match output {
                UnitOutput::Source(found) => listing = found,
                UnitOutput::Remote(found) => remote = found,
                _ => {}
            }
        }
        Ok((listing, remote))
    }

    async fn transfer_phase(&self, decision: &SyncDecision) -> Result<(u64, DeleteReport), SyncError> {
        let mut phase: Phase<UnitOutput, UnitError> = Phase::new("transfer");

        let downloader = Downloader::new(Arc::clone(&self.tracker), self.settings.download_concurrency);
        let downloads = decision.to_upload.clone();
        phase.spawn("downloads", async move {
            Ok(UnitOutput::Staged(downloader.download_all(&downloads).await?))
        });

        let creator = FolderCreator::new(Arc::clone(&self.store));
        let paths = decision.paths_to_create.clone();
        phase.spawn("folders", async move {
            if creator.ensure_all(&paths).await? {
                Ok(UnitOutput::Folders)
            } else {
                Err(UnitError::FoldersUnavailable)
            }
        });

        let deleter = Deleter::new(Arc::clone(&self.store), &self.settings.layout.root)
            .keeping(&decision.paths_to_create)
            .with_policy(self.settings.failure_policy);
        let orphans = decision.to_delete.clone();
        phase.spawn("deletions", async move {
            Ok(UnitOutput::Cleaned(deleter.delete_and_prune(&orphans).await?))
        });

        let mut staged = 0;
        let mut cleanup = DeleteReport::default();
        for output in phase.run().await? {
            match output {
                UnitOutput::Staged(bytes) => staged = bytes,
                UnitOutput::Cleaned(report) => cleanup = report,
                _ => {}
            }
        }
        Ok((staged, cleanup))
    }

    async fn upload_phase(&self, decision: &SyncDecision) -> Result<UploadReport, SyncError> {
        let mut phase: Phase<UnitOutput, UnitError> = Phase::new("upload");
        let uploader = Uploader::new(Arc::clone(&self.store), self.settings.upload_concurrency)
            .with_backoff(self.settings.backoff)
            .with_policy(self.settings.failure_policy);
        let uploads = decision.to_upload.clone();
        phase.spawn("uploads", async move {
            Ok(UnitOutput::Uploaded(uploader.upload_all(&uploads).await?))
        });

        let mut report = UploadReport::default();
        for output in phase.run().await? {
            if let UnitOutput::Uploaded(done) = output {
                report = done;
            }
        }
        Ok(report)
    }
}

fn log_plan(decision: &SyncDecision) {
    for path in &decision.paths_to_create {
        info!(path = %path, "dry run: would create folder");
    }
    for item in &decision.to_upload {
        info!(path = %item.remote_path(), "dry run: would upload");
    }
    for item in &decision.to_delete {
        info!(path = %item.path, name = %item.name, "dry run: would delete");
    }
}
