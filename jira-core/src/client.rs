use std::io;
use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use url::Url;

const SEARCH_PATH: &str = "rest/api/2/search";
const SEARCH_FIELDS: &str = "attachment,project";
const DEFAULT_USER_AGENT: &str = concat!("jira-core/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum JiraError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed search response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("api returned an empty body")]
    EmptyResponse,
}

impl JiraError {
    /// Transport hiccups, empty pages and server-side failures are worth
    /// another attempt; malformed payloads and client errors are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            JiraError::Request(_) | JiraError::EmptyResponse => true,
            JiraError::Api { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            _ => false,
        }
    }
}

/// One page of `/search` results.
///
/// Issues are kept as raw JSON: individual records are validated by the
/// caller so that one malformed issue does not sink the whole page.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchPage {
    #[serde(default)]
    pub start_at: u64,
    #[serde(default)]
    pub max_results: u64,
    pub total: u64,
    pub issues: Vec<serde_json::Value>,
}

#[derive(Clone)]
pub struct JiraClient {
    http: Client,
    base_url: Url,
    username: String,
    password: String,
    user_agent: String,
}

impl JiraClient {
    pub fn new(
        base_url: &str,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, JiraError> {
        Ok(Self {
            http: Client::new(),
            base_url: base_dir(base_url)?,
            username: username.into(),
            password: password.into(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        })
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub async fn search_page(
        &self,
        jql: &str,
        start_at: u64,
        max_results: u64,
    ) -> Result<SearchPage, JiraError> {
        let mut url = self.base_url.join(SEARCH_PATH)?;
        url.query_pairs_mut()
            .append_pair("jql", jql)
            .append_pair("fields", SEARCH_FIELDS)
            .append_pair("startAt", &start_at.to_string())
            .append_pair("maxResults", &max_results.to_string());
        debug!(%url, "requesting search page");
        let response = self.authorized(self.http.get(url)).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(JiraError::Api { status, body });
        }
        if body.trim().is_empty() {
            return Err(JiraError::EmptyResponse);
        }
        Ok(serde_json::from_str(&body)?)
    }

    /// Streams `url` into `target`, writing through a `.partial` sibling that
    /// is renamed only once the body is complete. Returns the byte count.
    pub async fn download_to_path(&self, url: &Url, target: &Path) -> Result<u64, JiraError> {
        let response = self
            .authorized(self.http.get(url.clone()))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(JiraError::Api { status, body });
        }

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let partial = partial_path(target);
        let written = match write_stream(response, &partial).await {
            Ok(written) => written,
            Err(err) => {
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(err);
            }
        };
        tokio::fs::rename(&partial, target).await?;
        debug!(target = %target.display(), bytes = written, "attachment downloaded");
        Ok(written)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .basic_auth(&self.username, Some(&self.password))
            .header("User-Agent", &self.user_agent)
            .header("Accept", "application/json")
    }
}

async fn write_stream(response: reqwest::Response, partial: &Path) -> Result<u64, JiraError> {
    let mut file = tokio::fs::File::create(partial).await?;
    let mut stream = response.bytes_stream();
    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    file.sync_all().await?;
    Ok(written)
}

/// Parses `base_url` so relative joins land below its path, keeping a
/// context path such as `/jira`.
fn base_dir(base_url: &str) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(base_url)?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn partial_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".partial");
    target.with_file_name(name)
}
