//! In-memory backends for exercising the engine without a network.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use gdrive_core::{ChildQuery, DriveError, DriveFile, FOLDER_MIME_TYPE, FileMetadata, ROOT_ID};
use jira_core::{JiraError, SearchPage};
use reqwest::StatusCode;
use serde_json::{Value, json};
use time::OffsetDateTime;
use url::Url;

use super::api::{DriveApi, TrackerApi};
use super::model::{ContainerKey, SourceItem, TransferItem};

#[derive(Debug, Clone)]
struct Entry {
    file: DriveFile,
    content: Vec<u8>,
}

#[derive(Default)]
struct DriveState {
    entries: Vec<Entry>,
    next_id: usize,
    writes: Vec<Option<String>>,
    write_attempts: usize,
    failing_writes: usize,
    rejecting_writes: bool,
    failing_deletes: HashSet<String>,
    failing_listings: HashSet<String>,
    deleted: Vec<String>,
    list_calls: usize,
}

#[derive(Default)]
pub struct FakeDrive {
    state: Mutex<DriveState>,
}

impl FakeDrive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_folder(&self, parent_id: &str, name: &str) -> String {
        self.insert(parent_id, name, FOLDER_MIME_TYPE, None, Vec::new())
    }

    pub fn add_file(&self, parent_id: &str, name: &str, modified: &str) -> String {
        self.insert(parent_id, name, "application/pdf", Some(modified), Vec::new())
    }

    pub fn folder_count(&self) -> usize {
        let state = self.lock();
        state.entries.iter().filter(|e| e.file.is_folder()).count()
    }

    pub fn file_count(&self) -> usize {
        let state = self.lock();
        state.entries.iter().filter(|e| !e.file.is_folder()).count()
    }

    pub fn file_content(&self, name: &str) -> Option<Vec<u8>> {
        let state = self.lock();
        state
            .entries
            .iter()
            .find(|e| e.file.name == name && !e.file.is_folder())
            .map(|e| e.content.clone())
    }

    pub fn modified_time(&self, name: &str) -> Option<String> {
        let state = self.lock();
        state
            .entries
            .iter()
            .find(|e| e.file.name == name)
            .and_then(|e| e.file.modified_time.clone())
    }

    pub fn exists(&self, id: &str) -> bool {
        self.lock().entries.iter().any(|e| e.file.id == id)
    }

    /// Id of the single entry named `name` directly under `parent_id`.
    pub fn child_id(&self, parent_id: &str, name: &str) -> Option<String> {
        let state = self.lock();
        let mut hits = state
            .entries
            .iter()
            .filter(|e| e.file.name == name && e.file.parents.iter().any(|p| p == parent_id));
        let first = hits.next()?;
        hits.next().is_none().then(|| first.file.id.clone())
    }

    pub fn write_count(&self) -> usize {
        self.lock().writes.len()
    }

    /// Id the most recent write replaced, if it replaced anything.
    pub fn last_write_target(&self) -> Option<String> {
        self.lock().writes.last().cloned().flatten()
    }

    pub fn write_attempts(&self) -> usize {
        self.lock().write_attempts
    }

    pub fn deleted(&self) -> Vec<String> {
        self.lock().deleted.clone()
    }

    pub fn list_calls(&self) -> usize {
        self.lock().list_calls
    }

    pub fn fail_next_writes(&self, count: usize) {
        self.lock().failing_writes = count;
    }

    /// Every write from now on is refused with a 400.
    pub fn reject_writes(&self) {
        self.lock().rejecting_writes = true;
    }

    pub fn fail_delete(&self, id: &str) {
        self.lock().failing_deletes.insert(id.to_string());
    }

    pub fn fail_listing(&self, parent_id: &str) {
        self.lock().failing_listings.insert(parent_id.to_string());
    }

    fn insert(
        &self,
        parent_id: &str,
        name: &str,
        mime_type: &str,
        modified: Option<&str>,
        content: Vec<u8>,
    ) -> String {
        let mut state = self.lock();
        state.next_id += 1;
        let id = format!("id-{}", state.next_id);
        state.entries.push(Entry {
            file: DriveFile {
                id: id.clone(),
                name: name.to_string(),
                mime_type: mime_type.to_string(),
                modified_time: modified.map(str::to_string),
                parents: vec![parent_id.to_string()],
            },
            content,
        });
        id
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DriveState> {
        self.state.lock().unwrap()
    }
}

fn api_error(status: StatusCode, body: &str) -> DriveError {
    DriveError::Api {
        status,
        body: body.to_string(),
    }
}

#[async_trait]
impl DriveApi for FakeDrive {
    async fn list_children(&self, query: &ChildQuery<'_>) -> Result<Vec<DriveFile>, DriveError> {
        let mut state = self.lock();
        state.list_calls += 1;
        if state.failing_listings.contains(query.parent_id) {
            return Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, "backend error"));
        }
        Ok(state
            .entries
            .iter()
            .filter(|e| e.file.parents.iter().any(|p| p == query.parent_id))
            .filter(|e| query.name.is_none_or(|name| e.file.name == name))
            .map(|e| e.file.clone())
            .collect())
    }

    async fn create_folder(
        &self,
        name: &str,
        parent_id: Option<&str>,
    ) -> Result<DriveFile, DriveError> {
        let id = self.insert(parent_id.unwrap_or(ROOT_ID), name, FOLDER_MIME_TYPE, None, Vec::new());
        let state = self.lock();
        let created = state.entries.iter().find(|e| e.file.id == id).map(|e| e.file.clone());
        created.ok_or_else(|| api_error(StatusCode::INTERNAL_SERVER_ERROR, "lost folder"))
    }

    async fn write_file(
        &self,
        metadata: &FileMetadata,
        content: Vec<u8>,
        existing_id: Option<&str>,
    ) -> Result<DriveFile, DriveError> {
        {
            let mut state = self.lock();
            state.write_attempts += 1;
            if state.failing_writes > 0 {
                state.failing_writes -= 1;
                return Err(api_error(StatusCode::FORBIDDEN, "userRateLimitExceeded"));
            }
            if state.rejecting_writes {
                return Err(api_error(StatusCode::BAD_REQUEST, "invalid metadata"));
            }
            state.writes.push(existing_id.map(str::to_string));
            if let Some(id) = existing_id {
                let entry = state
                    .entries
                    .iter_mut()
                    .find(|e| e.file.id == id)
                    .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "file not found"))?;
                entry.content = content;
                entry.file.modified_time = metadata.modified_time.clone();
                return Ok(entry.file.clone());
            }
        }
        let parent = metadata.parents.first().map(String::as_str).unwrap_or(ROOT_ID);
        let id = self.insert(
            parent,
            &metadata.name,
            &metadata.mime_type,
            metadata.modified_time.as_deref(),
            content,
        );
        let state = self.lock();
        let written = state.entries.iter().find(|e| e.file.id == id).map(|e| e.file.clone());
        written.ok_or_else(|| api_error(StatusCode::INTERNAL_SERVER_ERROR, "lost file"))
    }

    async fn delete(&self, id: &str) -> Result<(), DriveError> {
        let mut state = self.lock();
        if state.failing_deletes.contains(id) {
            return Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, "backend error"));
        }
        if !state.entries.iter().any(|e| e.file.id == id) {
            return Err(api_error(StatusCode::NOT_FOUND, "file not found"));
        }
        // Deleting a folder takes its whole subtree with it.
        let mut doomed: HashSet<String> = HashSet::from([id.to_string()]);
        loop {
            let before = doomed.len();
            for entry in &state.entries {
                if entry.file.parents.iter().any(|p| doomed.contains(p)) {
                    doomed.insert(entry.file.id.clone());
                }
            }
            if doomed.len() == before {
                break;
            }
        }
        state.entries.retain(|e| !doomed.contains(&e.file.id));
        state.deleted.push(id.to_string());
        Ok(())
    }
}

#[derive(Default)]
struct TrackerState {
    offsets: Vec<u64>,
    failing_searches: usize,
    downloads: Vec<Url>,
}

/// Tracker serving a fixed issue list and a content map for downloads.
#[derive(Default)]
pub struct FakeTracker {
    issues: Vec<Value>,
    contents: HashMap<String, Vec<u8>>,
    failing_downloads: HashSet<String>,
    page_cap: Option<u64>,
    reported_total: Option<u64>,
    state: Mutex<TrackerState>,
    queued_errors: Mutex<VecDeque<JiraError>>,
}

impl FakeTracker {
    pub fn with_issues(issues: Vec<Value>) -> Self {
        Self {
            issues,
            ..Self::default()
        }
    }

    pub fn with_content(mut self, url: &str, bytes: &[u8]) -> Self {
        self.contents.insert(url.to_string(), bytes.to_vec());
        self
    }

    pub fn with_failing_download(mut self, url: &str) -> Self {
        self.failing_downloads.insert(url.to_string());
        self
    }

    /// Serves at most `cap` issues per page whatever the caller asks for.
    pub fn with_page_cap(mut self, cap: u64) -> Self {
        self.page_cap = Some(cap);
        self
    }

    /// Claims `total` matches regardless of how many issues exist.
    pub fn with_reported_total(mut self, total: u64) -> Self {
        self.reported_total = Some(total);
        self
    }

    pub fn fail_next_searches(&self, count: usize) {
        self.state.lock().unwrap().failing_searches = count;
    }

    pub fn fail_next_search_with(&self, err: JiraError) {
        self.queued_errors.lock().unwrap().push_back(err);
    }

    pub fn requested_offsets(&self) -> Vec<u64> {
        self.state.lock().unwrap().offsets.clone()
    }

    pub fn download_count(&self) -> usize {
        self.state.lock().unwrap().downloads.len()
    }
}

#[async_trait]
impl TrackerApi for FakeTracker {
    async fn search_page(
        &self,
        _query: &str,
        start_at: u64,
        page_size: u64,
    ) -> Result<SearchPage, JiraError> {
        {
            let mut state = self.state.lock().unwrap();
            state.offsets.push(start_at);
            if state.failing_searches > 0 {
                state.failing_searches -= 1;
                return Err(JiraError::EmptyResponse);
            }
        }
        if let Some(err) = self.queued_errors.lock().unwrap().pop_front() {
            return Err(err);
        }
        let max_results = self.page_cap.map_or(page_size, |cap| cap.min(page_size));
        let issues = self
            .issues
            .iter()
            .skip(start_at as usize)
            .take(max_results as usize)
            .cloned()
            .collect();
        Ok(SearchPage {
            start_at,
            max_results,
            total: self.reported_total.unwrap_or(self.issues.len() as u64),
            issues,
        })
    }

    async fn download(&self, url: &Url, target: &Path) -> Result<u64, JiraError> {
        self.state.lock().unwrap().downloads.push(url.clone());
        if self.failing_downloads.contains(url.as_str()) {
            return Err(JiraError::Api {
                status: StatusCode::NOT_FOUND,
                body: "gone".to_string(),
            });
        }
        let bytes = self.contents.get(url.as_str()).cloned().unwrap_or_default();
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(target, &bytes).await?;
        Ok(bytes.len() as u64)
    }
}

pub fn attachment_json(id: &str, name: &str, created: &str) -> Value {
    json!({
        "id": id,
        "filename": name,
        "mimeType": "application/octet-stream",
        "created": created,
        "content": format!("https://jira.example.com/secure/attachment/{id}/{name}"),
        "author": { "displayName": "Ann Example" }
    })
}

pub fn issue_json(project: &str, issue: &str, attachments: Vec<Value>) -> Value {
    json!({
        "key": issue,
        "fields": {
            "project": { "key": project },
            "attachment": attachments
        }
    })
}

pub fn source(
    id: &str,
    project: &str,
    issue: &str,
    name: &str,
    created_at: OffsetDateTime,
) -> SourceItem {
    SourceItem {
        id: id.to_string(),
        container: ContainerKey::new(project, issue),
        name: name.to_string(),
        mime_type: "application/pdf".to_string(),
        created_at,
        uploader: "Ann Example".to_string(),
        download_url: content_url(id, name),
    }
}

pub fn content_url(id: &str, name: &str) -> Url {
    Url::parse(&format!("https://jira.example.com/secure/attachment/{id}/{name}")).unwrap()
}

pub fn transfer(
    staging_root: &Path,
    id: &str,
    name: &str,
    target_dir: &str,
    desired_modified: OffsetDateTime,
) -> TransferItem {
    TransferItem {
        source_id: id.to_string(),
        name: name.to_string(),
        target_dir: target_dir.to_string(),
        staging_path: staging_root.join(id),
        download_url: content_url(id, name),
        mime_type: "application/pdf".to_string(),
        description: "Uploaded by Ann Example".to_string(),
        desired_modified,
    }
}
