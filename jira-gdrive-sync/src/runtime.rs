use std::sync::Arc;

use anyhow::Context;
use gdrive_core::DriveClient;
use jira_core::JiraClient;
use tracing::info;

use crate::config::SyncConfig;
use crate::credentials::TokenProvider;
use crate::sync::engine::{SyncEngine, SyncSummary};

pub struct SyncRuntime {
    engine: SyncEngine,
}

impl SyncRuntime {
    /// Builds both clients and resolves the drive token up front, so a bad
    /// credential fails before any listing starts.
    pub async fn bootstrap(config: &SyncConfig, dry_run: bool) -> anyhow::Result<Self> {
        let tracker = JiraClient::new(&config.jira_url, &config.jira_user, &config.jira_password)
            .context("invalid tracker configuration")?
            .with_user_agent(&config.user_agent);
        let token = TokenProvider::new(config.drive_credentials.clone())
            .access_token()
            .await
            .context("failed to obtain a drive access token")?;
        let drive = DriveClient::new(token).context("invalid drive configuration")?;

        info!(
            tracker = %config.jira_url,
            root = %config.drive_root,
            staging = %config.staging_dir.display(),
            dry_run,
            "sync configured"
        );
        Ok(Self {
            engine: SyncEngine::new(
                Arc::new(tracker),
                Arc::new(drive),
                config.engine_settings(dry_run),
            ),
        })
    }

    pub async fn run(&self) -> anyhow::Result<SyncSummary> {
        Ok(self.engine.run().await?)
    }
}
