use std::collections::BTreeSet;
use std::sync::Arc;

use gdrive_core::DriveError;
use tracing::{debug, info, warn};

use super::paths::{canonical_dir, prefixes};
use super::store::DriveStore;

pub struct FolderCreator {
    store: Arc<DriveStore>,
}

impl FolderCreator {
    pub fn new(store: Arc<DriveStore>) -> Self {
        Self { store }
    }

    /// Creates every missing folder along `path`, shallowest first. Returns
    /// `false` at the first level that could not be created.
    pub async fn ensure_path(&self, path: &str) -> Result<bool, DriveError> {
        let path = canonical_dir(path);
        for prefix in prefixes(&path) {
            if !self.store.create_directory(&prefix).await? {
                warn!(path = %path, level = %prefix, "cannot create folder");
                return Ok(false);
            }
        }
        debug!(path = %path, "folder path ensured");
        Ok(true)
    }

    /// Ensures all `paths` in order. Paths sharing a prefix create it once
    /// because the store remembers folders it created.
    pub async fn ensure_all(&self, paths: &BTreeSet<String>) -> Result<bool, DriveError> {
        for path in paths {
            if !self.ensure_path(path).await? {
                return Ok(false);
            }
        }
        info!(paths = paths.len(), "target folders ready");
        Ok(true)
    }
}
