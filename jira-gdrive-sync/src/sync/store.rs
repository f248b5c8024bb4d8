use std::io;
use std::sync::Arc;

use gdrive_core::{ChildQuery, DriveError, DriveFile, FileMetadata, ROOT_ID};
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, warn};

use super::api::DriveApi;
use super::cache::{CacheKey, PathCache};
use super::model::{TransferItem, parse_drive_time};
use super::paths::{canonical_dir, parent_dir, segments};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("drive error: {0}")]
    Drive(#[from] DriveError),
    #[error("target folder does not exist: {0}")]
    MissingFolder(String),
    #[error("a folder already occupies {0}")]
    FolderInTheWay(String),
    #[error("staged file unreadable: {0}")]
    Staging(#[from] io::Error),
    #[error("timestamp formatting failed: {0}")]
    Time(#[from] time::error::Format),
}

impl StoreError {
    /// Every failure is worth another attempt except a staged file that is
    /// gone, which no retry can bring back.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, StoreError::Staging(err) if err.kind() == io::ErrorKind::NotFound)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    Created,
    Replaced,
    /// The remote copy is at least as new as the source.
    Skipped,
}

/// Path-addressed view over the flat, id-addressed drive API.
///
/// Every lookup goes through the shared [`PathCache`]; all units of a run
/// hold the same `DriveStore`.
pub struct DriveStore {
    api: Arc<dyn DriveApi>,
    cache: PathCache,
}

impl DriveStore {
    pub fn new(api: Arc<dyn DriveApi>) -> Self {
        Self {
            api,
            cache: PathCache::new(),
        }
    }

    pub fn clear_cache(&self) {
        debug!(entries = self.cache.len(), "clearing listing cache");
        self.cache.clear();
    }

    pub async fn query(&self, query: ChildQuery<'_>) -> Result<Vec<DriveFile>, DriveError> {
        let key = CacheKey::Query(query.to_query_string());
        self.cache
            .get_or_fetch(key, || self.api.list_children(&query))
            .await
    }

    /// Resolves `path` one segment at a time. A missing segment, or one that
    /// matches more than one entry, resolves to `None`.
    pub async fn resolve(&self, path: &str) -> Result<Option<DriveFile>, DriveError> {
        let parts = segments(path);
        if parts.is_empty() {
            return Ok(None);
        }
        let full = format!("/{}", parts.join("/"));
        if let Some(mut hit) = self.cache.get(&CacheKey::Path(full))
            && hit.len() == 1
        {
            return Ok(hit.pop());
        }

        let mut parent = ROOT_ID.to_string();
        let mut current = None;
        for part in parts {
            let mut matches = self.query(ChildQuery::named(&parent, part)).await?;
            if matches.len() != 1 {
                debug!(path, segment = part, found = matches.len(), "path does not resolve");
                return Ok(None);
            }
            let entry = matches.remove(0);
            parent = entry.id.clone();
            current = Some(entry);
        }
        Ok(current)
    }

    /// Id of the folder at `path`; the drive root always resolves.
    pub async fn resolve_folder_id(&self, path: &str) -> Result<Option<String>, DriveError> {
        if segments(path).is_empty() {
            return Ok(Some(ROOT_ID.to_string()));
        }
        Ok(self
            .resolve(path)
            .await?
            .filter(DriveFile::is_folder)
            .map(|folder| folder.id))
    }

    /// Children of the folder at `path`, or `None` when no such folder exists.
    pub async fn list_dir(&self, path: &str) -> Result<Option<Vec<DriveFile>>, DriveError> {
        let Some(folder_id) = self.resolve_folder_id(path).await? else {
            return Ok(None);
        };
        Ok(Some(self.query(ChildQuery::children(&folder_id)).await?))
    }

    /// Creates the leaf folder of `path` under its already existing parent.
    ///
    /// Returns `true` when the folder exists afterwards and `false` when the
    /// parent cannot be resolved or the leaf name is already taken by more
    /// than one entry or by a file.
    pub async fn create_directory(&self, path: &str) -> Result<bool, DriveError> {
        let dir = canonical_dir(path);
        if self.resolve_folder_id(&dir).await?.is_some() {
            debug!(path = %dir, "folder already exists");
            return Ok(true);
        }
        let Some(parent) = parent_dir(&dir) else {
            return Ok(true);
        };
        let Some(parent_id) = self.resolve_folder_id(&parent).await? else {
            warn!(path = %dir, parent = %parent, "parent folder cannot be resolved");
            return Ok(false);
        };
        let name = segments(&dir).last().map(|s| s.to_string()).unwrap_or_default();
        let taken = self.query(ChildQuery::named(&parent_id, &name)).await?;
        if !taken.is_empty() {
            warn!(path = %dir, found = taken.len(), "folder name is ambiguous or taken by a file");
            return Ok(false);
        }
        let created = self
            .api
            .create_folder(&name, (parent_id != ROOT_ID).then_some(parent_id.as_str()))
            .await?;
        debug!(path = %dir, id = %created.id, "folder created");
        // Listings can lag behind a fresh create; seed the lookup instead.
        self.cache.insert_if_absent(
            CacheKey::Query(ChildQuery::named(&parent_id, &name).to_query_string()),
            vec![created],
        );
        Ok(true)
    }

    /// Writes a staged file to its target folder unless the remote copy is
    /// already current.
    pub async fn upload(&self, item: &TransferItem) -> Result<UploadOutcome, StoreError> {
        let remote_path = item.remote_path();
        let existing = self.resolve(&remote_path).await?;
        if let Some(remote) = &existing {
            if remote.is_folder() {
                return Err(StoreError::FolderInTheWay(remote_path));
            }
            if parse_drive_time(remote.modified_time.as_deref()) >= item.desired_modified {
                debug!(path = %remote_path, "remote copy is current, skipping");
                return Ok(UploadOutcome::Skipped);
            }
        }

        let parent_id = self
            .resolve_folder_id(&item.target_dir)
            .await?
            .ok_or_else(|| StoreError::MissingFolder(item.target_dir.clone()))?;
        let content = tokio::fs::read(item.staging_path()).await?;
        let metadata = FileMetadata {
            name: item.name.clone(),
            mime_type: item.mime_type.clone(),
            description: Some(item.description.clone()),
            modified_time: Some(item.desired_modified.format(&Rfc3339)?),
            parents: vec![parent_id],
        };
        let written = self
            .api
            .write_file(&metadata, content, existing.as_ref().map(|f| f.id.as_str()))
            .await?;
        self.cache
            .insert_if_absent(CacheKey::Path(remote_path), vec![written]);

        Ok(if existing.is_some() {
            UploadOutcome::Replaced
        } else {
            UploadOutcome::Created
        })
    }

    pub async fn delete(&self, id: &str) -> Result<(), DriveError> {
        self.api.delete(id).await
    }
}
