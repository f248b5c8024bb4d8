use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::warn;

use crate::credentials::DriveCredentials;
use crate::sync::backoff::Backoff;
use crate::sync::engine::EngineSettings;
use crate::sync::model::{ItemFailurePolicy, TargetLayout};
use crate::sync::paths::canonical_dir;
use crate::sync::transfer::{DOWNLOAD_CONCURRENCY, UPLOAD_CONCURRENCY};
use crate::sync::tree::TREE_CONCURRENCY;

const DEFAULT_DRIVE_ROOT: &str = "/";
const DEFAULT_DESCRIPTION: &str = "Uploaded by {{uploader}} on {{date}}";
const DEFAULT_USER_AGENT: &str = concat!("jira-gdrive-sync/", env!("CARGO_PKG_VERSION"));

#[derive(Clone, Debug)]
pub struct SyncConfig {
    pub jira_url: String,
    pub jira_query: String,
    pub jira_user: String,
    pub jira_password: String,
    pub user_agent: String,
    pub drive_root: String,
    pub staging_dir: PathBuf,
    pub description_template: String,
    pub tree_concurrency: usize,
    pub download_concurrency: usize,
    pub upload_concurrency: usize,
    pub failure_policy: ItemFailurePolicy,
    pub allow_empty_source: bool,
    pub retry_jitter: bool,
    pub drive_credentials: DriveCredentials,
}

impl SyncConfig {
    /// Reads the process environment after loading `.env` if present.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| {
            lookup(name)
                .filter(|value| !value.trim().is_empty())
                .with_context(|| format!("{name} is not set"))
        };
        let jira_url = required("JGSYNC_JIRA_URL")?;
        url::Url::parse(&jira_url).with_context(|| format!("JGSYNC_JIRA_URL is not a url: {jira_url}"))?;

        let staging_dir = lookup("JGSYNC_STAGING_DIR")
            .map(|value| expand_with_home(&value, dirs::home_dir().as_deref()))
            .unwrap_or_else(default_staging_dir);
        let failure_policy = match lookup("JGSYNC_ITEM_FAILURE_POLICY") {
            Some(value) => value.parse().map_err(anyhow::Error::msg)?,
            None => ItemFailurePolicy::default(),
        };

        Ok(Self {
            jira_query: required("JGSYNC_JIRA_QUERY")?,
            jira_user: required("JGSYNC_JIRA_USER")?,
            jira_password: required("JGSYNC_JIRA_PASSWORD")?,
            jira_url,
            user_agent: lookup("JGSYNC_USER_AGENT").unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            drive_root: canonical_dir(
                &lookup("JGSYNC_DRIVE_ROOT").unwrap_or_else(|| DEFAULT_DRIVE_ROOT.to_string()),
            ),
            staging_dir,
            description_template: lookup("JGSYNC_FILE_DESCRIPTION")
                .unwrap_or_else(|| DEFAULT_DESCRIPTION.to_string()),
            tree_concurrency: read_usize(&lookup, "JGSYNC_TREE_CONCURRENCY", TREE_CONCURRENCY),
            download_concurrency: read_usize(
                &lookup,
                "JGSYNC_DOWNLOAD_CONCURRENCY",
                DOWNLOAD_CONCURRENCY,
            ),
            upload_concurrency: read_usize(&lookup, "JGSYNC_UPLOAD_CONCURRENCY", UPLOAD_CONCURRENCY),
            failure_policy,
            allow_empty_source: read_bool(&lookup, "JGSYNC_ALLOW_EMPTY_SOURCE", false),
            retry_jitter: read_bool(&lookup, "JGSYNC_RETRY_JITTER", false),
            drive_credentials: DriveCredentials::from_lookup(&lookup)?,
        })
    }

    pub fn engine_settings(&self, dry_run: bool) -> EngineSettings {
        EngineSettings {
            query: self.jira_query.clone(),
            layout: TargetLayout {
                root: self.drive_root.clone(),
                staging_root: self.staging_dir.clone(),
                description_template: self.description_template.clone(),
            },
            tree_concurrency: self.tree_concurrency,
            download_concurrency: self.download_concurrency,
            upload_concurrency: self.upload_concurrency,
            failure_policy: self.failure_policy,
            allow_empty_source: self.allow_empty_source,
            dry_run,
            backoff: Backoff::for_uploads(self.retry_jitter),
        }
    }
}

fn default_staging_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("jira-gdrive-sync")
        .join("staging")
}

fn expand_with_home(value: &str, home: Option<&Path>) -> PathBuf {
    let Some(home) = home else {
        return PathBuf::from(value);
    };
    if value == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(value)
}

/// Unparsable values fall back to `default`; zero is clamped to one.
fn read_usize<F>(lookup: &F, name: &str, default: usize) -> usize
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => default,
        Some(value) => match value.trim().parse::<usize>() {
            Ok(parsed) => parsed.max(1),
            Err(_) => {
                warn!(var = name, value = %value, default, "ignoring invalid number");
                default
            }
        },
    }
}

fn read_bool<F>(lookup: &F, name: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(default)
}
