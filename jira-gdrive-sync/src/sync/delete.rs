use std::collections::BTreeSet;
use std::sync::Arc;

use gdrive_core::{ChildQuery, DriveError};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::model::{ItemFailurePolicy, RemoteItem};
use super::paths::{canonical_dir, is_same_or_ancestor, join_dir};
use super::store::DriveStore;

#[derive(Debug, Error)]
pub enum DeleteError {
    #[error("{failed} remote deletions failed")]
    ItemsFailed { failed: usize },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteReport {
    pub deleted: usize,
    pub pruned: usize,
    pub failed: usize,
}

/// Removes orphaned remote files, then the issue and project folders they
/// leave empty.
pub struct Deleter {
    store: Arc<DriveStore>,
    root: String,
    keep: BTreeSet<String>,
    policy: ItemFailurePolicy,
}

impl Deleter {
    pub fn new(store: Arc<DriveStore>, root: &str) -> Self {
        Self {
            store,
            root: canonical_dir(root),
            keep: BTreeSet::new(),
            policy: ItemFailurePolicy::default(),
        }
    }

    /// Folders that are about to receive uploads; neither they nor their
    /// ancestors are pruned.
    pub fn keeping(mut self, paths: &BTreeSet<String>) -> Self {
        self.keep = paths.iter().map(|path| canonical_dir(path)).collect();
        self
    }

    pub fn with_policy(mut self, policy: ItemFailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub async fn delete_and_prune(&self, to_delete: &[RemoteItem]) -> Result<DeleteReport, DeleteError> {
        let mut report = DeleteReport::default();
        let mut parents = BTreeSet::new();
        for item in to_delete {
            match self.store.delete(&item.id).await {
                Ok(()) => {
                    debug!(path = %item.path, name = %item.name, "remote file deleted");
                    report.deleted += 1;
                    parents.insert(canonical_dir(&item.path));
                }
                Err(err) => {
                    warn!(path = %item.path, name = %item.name, error = %err, "remote delete failed");
                    report.failed += 1;
                }
            }
        }

        if !parents.is_empty() {
            self.store.clear_cache();
            for dir in &parents {
                if self.prune_if_empty(dir, &mut report).await {
                    report.pruned += 1;
                }
            }
        }

        if report.pruned > 0 {
            self.store.clear_cache();
            self.prune_projects(&mut report).await;
        }

        info!(
            deleted = report.deleted,
            pruned = report.pruned,
            failed = report.failed,
            "remote cleanup finished"
        );
        if self.policy == ItemFailurePolicy::Strict && report.failed > 0 {
            return Err(DeleteError::ItemsFailed {
                failed: report.failed,
            });
        }
        Ok(report)
    }

    async fn prune_projects(&self, report: &mut DeleteReport) {
        let projects = match self.store.list_dir(&self.root).await {
            Ok(Some(children)) => children,
            Ok(None) => return,
            Err(err) => {
                warn!(root = %self.root, error = %err, "cannot list root for pruning");
                report.failed += 1;
                return;
            }
        };
        for project in projects.iter().filter(|entry| entry.is_folder()) {
            let dir = join_dir(&self.root, &project.name);
            if self.prune_if_empty(&dir, report).await {
                report.pruned += 1;
            }
        }
    }

    /// Deletes the folder at `dir` when it has no children left. Failures
    /// are counted, never raised.
    async fn prune_if_empty(&self, dir: &str, report: &mut DeleteReport) -> bool {
        if dir == self.root || !is_same_or_ancestor(&self.root, dir) {
            return false;
        }
        if let Some(kept) = self.keep.iter().find(|path| is_same_or_ancestor(dir, path)) {
            debug!(path = %dir, kept = %kept, "folder is about to be filled, not pruning");
            return false;
        }
        match self.try_prune(dir).await {
            Ok(pruned) => pruned,
            Err(err) => {
                warn!(path = %dir, error = %err, "folder prune failed");
                report.failed += 1;
                false
            }
        }
    }

    async fn try_prune(&self, dir: &str) -> Result<bool, DriveError> {
        let Some(folder_id) = self.store.resolve_folder_id(dir).await? else {
            return Ok(false);
        };
        if !self.store.query(ChildQuery::children(&folder_id)).await?.is_empty() {
            return Ok(false);
        }
        self.store.delete(&folder_id).await?;
        info!(path = %dir, "empty folder removed");
        Ok(true)
    }
}
