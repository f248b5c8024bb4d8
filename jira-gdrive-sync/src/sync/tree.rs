use std::sync::Arc;

use gdrive_core::{ChildQuery, DriveError, DriveFile};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, info, warn};

use super::model::RemoteItem;
use super::paths::{canonical_dir, join_dir};
use super::store::DriveStore;

pub const TREE_CONCURRENCY: usize = 32;

#[derive(Debug, Error)]
pub enum TreeError {
    #[error("listing {path} failed: {source}")]
    Listing { path: String, source: DriveError },
    #[error("listing worker panicked: {0}")]
    Worker(#[from] JoinError),
    #[error("listing pool closed")]
    PoolClosed,
}

/// Walks the remote tree below a root, one unit per folder.
pub struct TreeLister {
    store: Arc<DriveStore>,
    concurrency: usize,
}

impl TreeLister {
    pub fn new(store: Arc<DriveStore>, concurrency: usize) -> Self {
        Self {
            store,
            concurrency: concurrency.max(1),
        }
    }

    /// Lists every file below `root`, same-named copies included. A root
    /// that does not exist yet yields an empty tree.
    pub async fn list_tree(&self, root: &str) -> Result<Vec<RemoteItem>, TreeError> {
        let root = canonical_dir(root);
        let root_id = self
            .store
            .resolve_folder_id(&root)
            .await
            .map_err(|source| TreeError::Listing {
                path: root.clone(),
                source,
            })?;
        let Some(root_id) = root_id else {
            warn!(root = %root, "remote root does not exist, treating tree as empty");
            return Ok(Vec::new());
        };

        let limit = Arc::new(Semaphore::new(self.concurrency));
        let mut units = JoinSet::new();
        self.spawn_unit(&mut units, &limit, root_id, root.clone());

        let mut items = Vec::new();
        let mut folders = 0usize;
        // The walk is done once no unit is pending.
        while let Some(joined) = units.join_next().await {
            let (dir, children) = joined??;
            for child in children {
                if child.is_folder() {
                    folders += 1;
                    let path = join_dir(&dir, &child.name);
                    self.spawn_unit(&mut units, &limit, child.id, path);
                    continue;
                }
                items.push(RemoteItem::from_drive(&child, &dir));
            }
        }

        items.sort_by(|a, b| (&a.path, &a.name, &a.id).cmp(&(&b.path, &b.name, &b.id)));
        info!(root = %root, files = items.len(), folders, "remote tree listed");
        Ok(items)
    }

    fn spawn_unit(
        &self,
        units: &mut JoinSet<Result<(String, Vec<DriveFile>), TreeError>>,
        limit: &Arc<Semaphore>,
        folder_id: String,
        path: String,
    ) {
        let store = Arc::clone(&self.store);
        let limit = Arc::clone(limit);
        units.spawn(async move {
            let _permit = limit
                .acquire_owned()
                .await
                .map_err(|_| TreeError::PoolClosed)?;
            debug!(path = %path, "listing folder");
            let children = store
                .query(ChildQuery::children(&folder_id))
                .await
                .map_err(|source| TreeError::Listing {
                    path: path.clone(),
                    source,
                })?;
            Ok((path, children))
        });
    }
}
