use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;

const DEFAULT_BASE_URL: &str = "https://www.googleapis.com";
const FILES_PATH: &str = "/drive/v3/files";
const UPLOAD_PATH: &str = "/upload/drive/v3/files";
const FILE_FIELDS: &str = "id,name,mimeType,modifiedTime,parents";
const LIST_PAGE_SIZE: u32 = 1000;
const MULTIPART_BOUNDARY: &str = "jira-gdrive-sync-part";

/// Mime type Drive uses to mark a folder.
pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

/// Alias Drive accepts for the id of "My Drive".
pub const ROOT_ID: &str = "root";

#[derive(Debug, Error)]
pub enum DriveError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("metadata encoding failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    RateLimit,
    Transient,
    Permanent,
}

/// Filter selecting the non-trashed children of one folder, optionally
/// narrowed to a single name.
///
/// The rendered query string doubles as a cache key, so two equal queries
/// always render identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildQuery<'a> {
    pub parent_id: &'a str,
    pub name: Option<&'a str>,
}

impl<'a> ChildQuery<'a> {
    pub fn children(parent_id: &'a str) -> Self {
        Self {
            parent_id,
            name: None,
        }
    }

    pub fn named(parent_id: &'a str, name: &'a str) -> Self {
        Self {
            parent_id,
            name: Some(name),
        }
    }

    pub fn to_query_string(&self) -> String {
        let mut query = format!(
            "trashed = false and '{}' in parents",
            escape_literal(self.parent_id)
        );
        if let Some(name) = self.name {
            query.push_str(&format!(" and name = '{}'", escape_literal(name)));
        }
        query
    }
}

#[derive(Clone)]
pub struct DriveClient {
    http: Client,
    base_url: Url,
    token: String,
}

impl DriveClient {
    pub fn new(token: impl Into<String>) -> Result<Self, DriveError> {
        Self::with_base_url(DEFAULT_BASE_URL, token)
    }

    pub fn with_base_url(base_url: &str, token: impl Into<String>) -> Result<Self, DriveError> {
        Ok(Self {
            http: Client::new(),
            base_url: Url::parse(base_url)?,
            token: token.into(),
        })
    }

    pub async fn list_children(&self, query: &ChildQuery<'_>) -> Result<Vec<DriveFile>, DriveError> {
        self.list_files(&query.to_query_string()).await
    }

    /// Runs a `files.list` query and follows `nextPageToken` until exhausted.
    pub async fn list_files(&self, query: &str) -> Result<Vec<DriveFile>, DriveError> {
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let page = self.list_page(query, page_token.as_deref()).await?;
            files.extend(page.files);
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
        debug!(query, count = files.len(), "listed drive files");
        Ok(files)
    }

    async fn list_page(
        &self,
        query: &str,
        page_token: Option<&str>,
    ) -> Result<FileList, DriveError> {
        let mut url = self.endpoint(FILES_PATH)?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("q", query)
                .append_pair("pageSize", &LIST_PAGE_SIZE.to_string())
                .append_pair("fields", &format!("nextPageToken,files({FILE_FIELDS})"));
            if let Some(token) = page_token {
                pairs.append_pair("pageToken", token);
            }
        }
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Self::handle_response(response).await
    }

    pub async fn create_folder(
        &self,
        name: &str,
        parent_id: Option<&str>,
    ) -> Result<DriveFile, DriveError> {
        let mut url = self.endpoint(FILES_PATH)?;
        url.query_pairs_mut().append_pair("fields", FILE_FIELDS);
        let metadata = FileMetadata {
            name: name.to_string(),
            mime_type: FOLDER_MIME_TYPE.to_string(),
            description: None,
            modified_time: None,
            parents: parent_id.map(|id| vec![id.to_string()]).unwrap_or_default(),
        };
        let response = self
            .http
            .post(url)
            .header("Authorization", self.auth_header_value())
            .json(&metadata)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    pub async fn create_file(
        &self,
        metadata: &FileMetadata,
        content: Vec<u8>,
    ) -> Result<DriveFile, DriveError> {
        let mut url = self.endpoint(UPLOAD_PATH)?;
        url.query_pairs_mut()
            .append_pair("uploadType", "multipart")
            .append_pair("fields", FILE_FIELDS);
        let body = multipart_related_body(metadata, &content)?;
        let response = self
            .http
            .post(url)
            .header("Authorization", self.auth_header_value())
            .header("Content-Type", multipart_content_type())
            .body(body)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    /// Replaces content and metadata of an existing file. Parents cannot be
    /// changed through this call and are dropped from the metadata.
    pub async fn update_file(
        &self,
        id: &str,
        metadata: &FileMetadata,
        content: Vec<u8>,
    ) -> Result<DriveFile, DriveError> {
        let mut url = self.endpoint(&format!("{UPLOAD_PATH}/{id}"))?;
        url.query_pairs_mut()
            .append_pair("uploadType", "multipart")
            .append_pair("fields", FILE_FIELDS);
        let metadata = FileMetadata {
            parents: Vec::new(),
            ..metadata.clone()
        };
        let body = multipart_related_body(&metadata, &content)?;
        let response = self
            .http
            .patch(url)
            .header("Authorization", self.auth_header_value())
            .header("Content-Type", multipart_content_type())
            .body(body)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    pub async fn delete_file(&self, id: &str) -> Result<(), DriveError> {
        let url = self.endpoint(&format!("{FILES_PATH}/{id}"))?;
        let response = self
            .http
            .delete(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        if response.status().is_success() {
            return Ok(());
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(DriveError::Api { status, body })
    }

    fn auth_header_value(&self) -> String {
        format!("Bearer {}", self.token)
    }

    fn endpoint(&self, path: &str) -> Result<Url, DriveError> {
        Ok(self.base_url.join(path)?)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, DriveError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(DriveError::Api { status, body })
        }
    }
}

impl DriveError {
    pub fn classification(&self) -> Option<ApiErrorClass> {
        match self {
            DriveError::Api { status, body } => Some(classify_api_status(*status, body)),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            DriveError::Request(_) => true,
            _ => matches!(
                self.classification(),
                Some(ApiErrorClass::RateLimit | ApiErrorClass::Transient)
            ),
        }
    }
}

fn classify_api_status(status: StatusCode, body: &str) -> ApiErrorClass {
    // Drive reports quota exhaustion as 403 with a rate-limit reason.
    if status == StatusCode::FORBIDDEN && body.contains("ateLimitExceeded") {
        ApiErrorClass::RateLimit
    } else if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        ApiErrorClass::Auth
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        ApiErrorClass::RateLimit
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        ApiErrorClass::Transient
    } else {
        ApiErrorClass::Permanent
    }
}

fn escape_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

fn multipart_content_type() -> String {
    format!("multipart/related; boundary={MULTIPART_BOUNDARY}")
}

fn multipart_related_body(metadata: &FileMetadata, content: &[u8]) -> Result<Vec<u8>, DriveError> {
    let json = serde_json::to_vec(metadata)?;
    let mut body = Vec::with_capacity(json.len() + content.len() + 256);
    body.extend_from_slice(
        format!("--{MULTIPART_BOUNDARY}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n")
            .as_bytes(),
    );
    body.extend_from_slice(&json);
    body.extend_from_slice(
        format!(
            "\r\n--{MULTIPART_BOUNDARY}\r\nContent-Type: {}\r\n\r\n",
            metadata.mime_type
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{MULTIPART_BOUNDARY}--\r\n").as_bytes());
    Ok(body)
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    #[serde(default)]
    pub modified_time: Option<String>,
    #[serde(default)]
    pub parents: Vec<String>,
}

impl DriveFile {
    pub fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME_TYPE
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub name: String,
    pub mime_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// RFC 3339 timestamp.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_time: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub parents: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    #[serde(default)]
    next_page_token: Option<String>,
}
