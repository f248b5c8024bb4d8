use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use gdrive_core::DriveFile;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use url::Url;

use super::paths::{PathError, canonical_dir, join_dir, staging_path_for};

/// Project and issue an attachment belongs to; maps onto two folder levels
/// below the drive root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContainerKey {
    pub project: String,
    pub issue: String,
}

impl ContainerKey {
    pub fn new(project: impl Into<String>, issue: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            issue: issue.into(),
        }
    }

    pub fn target_dir(&self, root: &str) -> String {
        join_dir(&join_dir(root, &self.project), &self.issue)
    }
}

/// An attachment as reported by the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceItem {
    pub id: String,
    pub container: ContainerKey,
    pub name: String,
    pub mime_type: String,
    pub created_at: OffsetDateTime,
    pub uploader: String,
    pub download_url: Url,
}

/// A file or folder in the drive tree.
///
/// `path` is the canonical directory holding the entry; for a folder that is
/// its parent, and `name` is the folder's own segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteItem {
    pub id: String,
    pub name: String,
    pub path: String,
    pub modified_at: OffsetDateTime,
    pub is_folder: bool,
}

impl RemoteItem {
    pub fn from_drive(file: &DriveFile, path: &str) -> Self {
        Self {
            id: file.id.clone(),
            name: file.name.clone(),
            path: canonical_dir(path),
            modified_at: parse_drive_time(file.modified_time.as_deref()),
            is_folder: file.is_folder(),
        }
    }
}

/// Missing or unreadable timestamps sort before everything else, which makes
/// any tracker copy look newer.
pub fn parse_drive_time(value: Option<&str>) -> OffsetDateTime {
    value
        .and_then(|raw| OffsetDateTime::parse(raw, &Rfc3339).ok())
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

/// Where remote targets and staged bytes live for one run.
#[derive(Debug, Clone)]
pub struct TargetLayout {
    pub root: String,
    pub staging_root: PathBuf,
    pub description_template: String,
}

impl TargetLayout {
    pub fn target_dir(&self, source: &SourceItem) -> String {
        source.container.target_dir(&self.root)
    }

    pub fn transfer_for(&self, source: &SourceItem) -> Result<TransferItem, PathError> {
        Ok(TransferItem {
            source_id: source.id.clone(),
            name: source.name.clone(),
            target_dir: self.target_dir(source),
            staging_path: staging_path_for(&self.staging_root, &source.id)?,
            download_url: source.download_url.clone(),
            mime_type: source.mime_type.clone(),
            description: render_description(
                &self.description_template,
                &source.uploader,
                source.created_at,
            ),
            desired_modified: source.created_at,
        })
    }
}

/// A source attachment bound to its remote destination and staging file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferItem {
    pub source_id: String,
    pub name: String,
    pub target_dir: String,
    pub staging_path: PathBuf,
    pub download_url: Url,
    pub mime_type: String,
    pub description: String,
    /// Tracker creation time, written as the remote modification time.
    pub desired_modified: OffsetDateTime,
}

impl TransferItem {
    pub fn remote_path(&self) -> String {
        format!("{}{}", self.target_dir, self.name)
    }

    pub fn staging_path(&self) -> &Path {
        &self.staging_path
    }
}

/// Outcome of reconciliation; built once per run and only read afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncDecision {
    pub to_upload: Vec<TransferItem>,
    pub to_delete: Vec<RemoteItem>,
    pub paths_to_create: BTreeSet<String>,
}

impl SyncDecision {
    pub fn is_noop(&self) -> bool {
        self.to_upload.is_empty() && self.to_delete.is_empty() && self.paths_to_create.is_empty()
    }
}

/// What a unit reports when single items fail after their retries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ItemFailurePolicy {
    /// Log the item and let the unit succeed.
    #[default]
    BestEffort,
    /// Fail the unit once every item has been attempted.
    Strict,
}

impl FromStr for ItemFailurePolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "best-effort" | "best_effort" => Ok(ItemFailurePolicy::BestEffort),
            "strict" => Ok(ItemFailurePolicy::Strict),
            other => Err(format!("unknown item failure policy: {other}")),
        }
    }
}

pub fn render_description(template: &str, uploader: &str, created_at: OffsetDateTime) -> String {
    let date = created_at
        .format(format_description!(
            "[year]-[month]-[day] [hour]:[minute]:[second]"
        ))
        .unwrap_or_default();
    template
        .replace("{{date}}", &date)
        .replace("{{uploader}}", uploader)
}
