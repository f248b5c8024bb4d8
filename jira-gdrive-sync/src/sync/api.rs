//! Seams between the engine and the two backends.
//!
//! The engine only talks to these traits so phases can run against the real
//! REST clients or against in-memory stand-ins.

use std::path::Path;

use async_trait::async_trait;
use gdrive_core::{ChildQuery, DriveClient, DriveError, DriveFile, FileMetadata};
use jira_core::{JiraClient, JiraError, SearchPage};
use url::Url;

#[async_trait]
pub trait TrackerApi: Send + Sync {
    async fn search_page(
        &self,
        query: &str,
        start_at: u64,
        page_size: u64,
    ) -> Result<SearchPage, JiraError>;

    async fn download(&self, url: &Url, target: &Path) -> Result<u64, JiraError>;
}

#[async_trait]
pub trait DriveApi: Send + Sync {
    async fn list_children(&self, query: &ChildQuery<'_>) -> Result<Vec<DriveFile>, DriveError>;

    async fn create_folder(
        &self,
        name: &str,
        parent_id: Option<&str>,
    ) -> Result<DriveFile, DriveError>;

    /// Creates a new file, or replaces the content of `existing_id`.
    async fn write_file(
        &self,
        metadata: &FileMetadata,
        content: Vec<u8>,
        existing_id: Option<&str>,
    ) -> Result<DriveFile, DriveError>;

    async fn delete(&self, id: &str) -> Result<(), DriveError>;
}

#[async_trait]
impl TrackerApi for JiraClient {
    async fn search_page(
        &self,
        query: &str,
        start_at: u64,
        page_size: u64,
    ) -> Result<SearchPage, JiraError> {
        JiraClient::search_page(self, query, start_at, page_size).await
    }

    async fn download(&self, url: &Url, target: &Path) -> Result<u64, JiraError> {
        self.download_to_path(url, target).await
    }
}

#[async_trait]
impl DriveApi for DriveClient {
    async fn list_children(&self, query: &ChildQuery<'_>) -> Result<Vec<DriveFile>, DriveError> {
        DriveClient::list_children(self, query).await
    }

    async fn create_folder(
        &self,
        name: &str,
        parent_id: Option<&str>,
    ) -> Result<DriveFile, DriveError> {
        DriveClient::create_folder(self, name, parent_id).await
    }

    async fn write_file(
        &self,
        metadata: &FileMetadata,
        content: Vec<u8>,
        existing_id: Option<&str>,
    ) -> Result<DriveFile, DriveError> {
        match existing_id {
            Some(id) => self.update_file(id, metadata, content).await,
            None => self.create_file(metadata, content).await,
        }
    }

    async fn delete(&self, id: &str) -> Result<(), DriveError> {
        self.delete_file(id).await
    }
}
