use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use jira_core::{JiraError, SearchPage};
use serde_json::Value;
use thiserror::Error;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};
use tracing::{debug, info, warn};
use url::Url;

use super::api::TrackerApi;
use super::model::{ContainerKey, SourceItem};

pub const PAGE_SIZE: u64 = 500;
pub const PAGE_ATTEMPTS: u32 = 3;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("tracker error: {0}")]
    Tracker(#[from] JiraError),
    #[error("page at offset {start_at} failed {attempts} times: {source}")]
    RetriesExhausted {
        start_at: u64,
        attempts: u32,
        source: JiraError,
    },
}

/// Result of listing the tracker after duplicate names are collapsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceListing {
    Items(Vec<SourceItem>),
    Empty,
}

impl SourceListing {
    pub fn from_items(items: Vec<SourceItem>) -> Self {
        if items.is_empty() {
            SourceListing::Empty
        } else {
            SourceListing::Items(items)
        }
    }

    pub fn into_items(self) -> Vec<SourceItem> {
        match self {
            SourceListing::Items(items) => items,
            SourceListing::Empty => Vec::new(),
        }
    }
}

pub struct SourceLister {
    tracker: Arc<dyn TrackerApi>,
    query: String,
    page_size: u64,
    page_attempts: u32,
}

impl SourceLister {
    pub fn new(tracker: Arc<dyn TrackerApi>, query: impl Into<String>) -> Self {
        Self {
            tracker,
            query: query.into(),
            page_size: PAGE_SIZE,
            page_attempts: PAGE_ATTEMPTS,
        }
    }

    pub fn with_page_size(mut self, page_size: u64) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Pages through the search results and returns the newest attachment
    /// per issue and file name.
    pub async fn fetch(&self) -> Result<SourceListing, SourceError> {
        info!(query = %self.query, "listing tracker attachments");
        let mut start_at = 0u64;
        let mut raw = Vec::new();
        loop {
            let page = self.fetch_page(start_at).await?;
            for issue in &page.issues {
                raw.extend(parse_issue(issue));
            }
            // The server may cap maxResults below what was asked for.
            let received = page.issues.len() as u64;
            debug!(start_at, received, total = page.total, collected = raw.len(), "search page parsed");
            start_at = start_at.saturating_add(received);
            if received == 0 || start_at >= page.total {
                break;
            }
        }

        let total = raw.len();
        let items = dedup_newest(raw);
        info!(attachments = total, unique = items.len(), "tracker listing complete");
        Ok(SourceListing::from_items(items))
    }

    async fn fetch_page(&self, start_at: u64) -> Result<SearchPage, SourceError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self
                .tracker
                .search_page(&self.query, start_at, self.page_size)
                .await
            {
                Ok(page) => return Ok(page),
                Err(err) if err.is_retryable() && attempt < self.page_attempts => {
                    warn!(start_at, attempt, error = %err, "search page failed, retrying");
                }
                Err(err) if err.is_retryable() => {
                    return Err(SourceError::RetriesExhausted {
                        start_at,
                        attempts: attempt,
                        source: err,
                    });
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

/// Keeps one attachment per `(container, name)`: the one created last.
/// On equal timestamps the first one listed stays.
pub fn dedup_newest(items: Vec<SourceItem>) -> Vec<SourceItem> {
    let mut slots: HashMap<(ContainerKey, String), usize> = HashMap::new();
    let mut kept: Vec<SourceItem> = Vec::with_capacity(items.len());
    for item in items {
        match slots.entry((item.container.clone(), item.name.clone())) {
            Entry::Occupied(slot) => {
                let index = *slot.get();
                if item.created_at > kept[index].created_at {
                    kept[index] = item;
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(kept.len());
                kept.push(item);
            }
        }
    }
    kept
}

/// Extracts the attachments of one search hit. Malformed issues yield
/// nothing and malformed attachments are dropped individually.
pub fn parse_issue(issue: &Value) -> Vec<SourceItem> {
    let (Some(issue_key), Some(fields)) = (
        issue.get("key").and_then(Value::as_str),
        issue.get("fields").filter(|fields| fields.is_object()),
    ) else {
        warn!("skipping issue: expected string key and object fields");
        return Vec::new();
    };
    let Some(project_key) = fields
        .get("project")
        .and_then(|project| project.get("key"))
        .and_then(Value::as_str)
    else {
        warn!(issue = issue_key, "skipping issue: project key missing");
        return Vec::new();
    };
    let Some(attachments) = fields.get("attachment").and_then(Value::as_array) else {
        warn!(issue = issue_key, "skipping issue: attachment list missing");
        return Vec::new();
    };

    let container = ContainerKey::new(project_key, issue_key);
    attachments
        .iter()
        .filter_map(|attachment| match parse_attachment(attachment, &container) {
            Ok(item) => Some(item),
            Err(reason) => {
                warn!(issue = issue_key, reason, "skipping attachment");
                None
            }
        })
        .collect()
}

fn parse_attachment(value: &Value, container: &ContainerKey) -> Result<SourceItem, &'static str> {
    if !value.is_object() {
        return Err("attachment is not an object");
    }
    let id = match value.get("id") {
        Some(Value::String(id)) => id.clone(),
        Some(Value::Number(id)) => id.to_string(),
        _ => return Err("id missing"),
    };
    let name = str_field(value, "filename").ok_or("filename missing")?;
    let mime_type = str_field(value, "mimeType").ok_or("mimeType missing")?;
    let created = str_field(value, "created").ok_or("created missing")?;
    let content = str_field(value, "content").ok_or("content url missing")?;
    let uploader = value
        .get("author")
        .and_then(|author| author.get("displayName"))
        .and_then(Value::as_str)
        .ok_or("author displayName missing")?;

    let created_at = parse_created(created).ok_or("created is not yyyy-MM-ddTHH:mm:ss")?;
    let download_url = Url::parse(content).map_err(|_| "content url is malformed")?;

    Ok(SourceItem {
        id,
        container: container.clone(),
        name: name.to_string(),
        mime_type: mime_type.to_string(),
        created_at,
        uploader: uploader.to_string(),
        download_url,
    })
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

/// Parses Jira's `2024-01-02T10:20:30.000+0100`. Fractional seconds are
/// dropped; a missing or unreadable offset means UTC.
pub fn parse_created(raw: &str) -> Option<OffsetDateTime> {
    let head = raw.get(..19)?;
    let local = PrimitiveDateTime::parse(
        head,
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
    )
    .ok()?;
    let tail = &raw[19..];
    let offset = tail
        .find(['+', '-'])
        .and_then(|pos| {
            let digits: String = tail[pos + 1..]
                .chars()
                .filter(char::is_ascii_digit)
                .collect();
            if digits.len() != 4 {
                return None;
            }
            let hours: i8 = digits[..2].parse().ok()?;
            let minutes: i8 = digits[2..].parse().ok()?;
            let sign = if tail[pos..].starts_with('-') { -1 } else { 1 };
            UtcOffset::from_hms(sign * hours, sign * minutes, 0).ok()
        })
        .unwrap_or(UtcOffset::UTC);
    Some(local.assume_offset(offset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::testing::{FakeTracker, attachment_json, issue_json, source};
    use serde_json::json;
    use time::macros::datetime;

    #[test]
    fn parses_created_with_offset() {
        assert_eq!(
            parse_created("2024-01-02T10:20:30.000+0100").unwrap(),
            datetime!(2024-01-02 09:20:30 UTC)
        );
        assert_eq!(
            parse_created("2024-01-02T10:20:30").unwrap(),
            datetime!(2024-01-02 10:20:30 UTC)
        );
        assert_eq!(
            parse_created("2024-01-02T10:20:30.5-05:30").unwrap(),
            datetime!(2024-01-02 15:50:30 UTC)
        );
        assert!(parse_created("02.01.2024").is_none());
    }

    #[test]
    fn parse_issue_extracts_attachments() {
        let issue = issue_json(
            "X",
            "X-1",
            vec![attachment_json("10", "report.pdf", "2024-01-02T00:00:00.000+0000")],
        );
        let items = parse_issue(&issue);
        assert_eq!(items.len(), 1);
        let item = &items[0];
        assert_eq!(item.id, "10");
        assert_eq!(item.container, ContainerKey::new("X", "X-1"));
        assert_eq!(item.name, "report.pdf");
        assert_eq!(item.mime_type, "application/octet-stream");
        assert_eq!(item.uploader, "Ann Example");
        assert_eq!(item.created_at, datetime!(2024-01-02 0:00 UTC));
    }

    #[test]
    fn malformed_records_are_skipped() {
        let mut broken_author = attachment_json("11", "b.txt", "2024-01-02T00:00:00.000+0000");
        broken_author["author"] = json!("nobody");
        let mut bad_date = attachment_json("12", "c.txt", "2024-01-02T00:00:00.000+0000");
        bad_date["created"] = json!("yesterday");
        let mut bad_url = attachment_json("13", "d.txt", "2024-01-02T00:00:00.000+0000");
        bad_url["content"] = json!("not a url");
        let good = attachment_json("14", "e.txt", "2024-01-02T00:00:00.000+0000");

        let issue = issue_json("X", "X-1", vec![json!(7), broken_author, bad_date, bad_url, good]);
        let items = parse_issue(&issue);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "14");

        assert!(parse_issue(&json!({ "key": 5, "fields": {} })).is_empty());
        assert!(parse_issue(&json!({ "key": "X-2", "fields": { "attachment": [] } })).is_empty());
        assert!(
            parse_issue(&json!({ "key": "X-3", "fields": { "project": { "key": "X" } } }))
                .is_empty()
        );
    }

    #[test]
    fn dedup_keeps_newest_per_container_and_name() {
        let items = vec![
            source("1", "X", "X-1", "a.pdf", datetime!(2024-01-01 0:00 UTC)),
            source("2", "X", "X-1", "a.pdf", datetime!(2024-01-03 0:00 UTC)),
            source("3", "X", "X-1", "a.pdf", datetime!(2024-01-02 0:00 UTC)),
            source("4", "X", "X-2", "a.pdf", datetime!(2024-01-01 0:00 UTC)),
            source("5", "Y", "X-1", "a.pdf", datetime!(2024-01-01 0:00 UTC)),
        ];
        let kept = dedup_newest(items);
        let ids: Vec<_> = kept.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["2", "4", "5"]);
    }

    #[test]
    fn dedup_keeps_exactly_one_on_equal_timestamps() {
        let items = vec![
            source("1", "X", "X-1", "a.pdf", datetime!(2024-01-01 0:00 UTC)),
            source("2", "X", "X-1", "a.pdf", datetime!(2024-01-01 0:00 UTC)),
        ];
        assert_eq!(dedup_newest(items).len(), 1);
    }

    #[tokio::test]
    async fn fetch_pages_until_total_is_covered() {
        let issues: Vec<_> = (0..5)
            .map(|n| {
                issue_json(
                    "X",
                    &format!("X-{n}"),
                    vec![attachment_json(&n.to_string(), "a.pdf", "2024-01-02T00:00:00.000+0000")],
                )
            })
            .collect();
        let tracker = Arc::new(FakeTracker::with_issues(issues));
        let lister = SourceLister::new(tracker.clone(), "project = X").with_page_size(2);

        let items = lister.fetch().await.unwrap().into_items();

        assert_eq!(items.len(), 5);
        assert_eq!(tracker.requested_offsets(), vec![0, 2, 4]);
    }

    #[tokio::test]
    async fn server_capped_pages_advance_by_what_was_returned() {
        let issues: Vec<_> = (0..5)
            .map(|n| {
                issue_json(
                    "X",
                    &format!("X-{n}"),
                    vec![attachment_json(&n.to_string(), "a.pdf", "2024-01-02T00:00:00.000+0000")],
                )
            })
            .collect();
        let tracker = Arc::new(FakeTracker::with_issues(issues).with_page_cap(2));
        let lister = SourceLister::new(tracker.clone(), "project = X").with_page_size(4);

        let items = lister.fetch().await.unwrap().into_items();

        assert_eq!(items.len(), 5);
        assert_eq!(tracker.requested_offsets(), vec![0, 2, 4]);
    }

    #[tokio::test]
    async fn empty_page_before_total_ends_the_listing() {
        let tracker = Arc::new(
            FakeTracker::with_issues(vec![issue_json(
                "X",
                "X-1",
                vec![attachment_json("1", "a.pdf", "2024-01-02T00:00:00.000+0000")],
            )])
            .with_reported_total(10),
        );
        let lister = SourceLister::new(tracker.clone(), "q").with_page_size(4);

        let items = lister.fetch().await.unwrap().into_items();

        assert_eq!(items.len(), 1);
        assert_eq!(tracker.requested_offsets(), vec![0, 1]);
    }

    #[tokio::test]
    async fn transient_page_failures_are_retried() {
        let issues = vec![issue_json(
            "X",
            "X-1",
            vec![attachment_json("1", "a.pdf", "2024-01-02T00:00:00.000+0000")],
        )];
        let tracker = Arc::new(FakeTracker::with_issues(issues));
        tracker.fail_next_searches(2);
        let lister = SourceLister::new(tracker.clone(), "q");

        let listing = lister.fetch().await.unwrap();

        assert!(matches!(listing, SourceListing::Items(ref items) if items.len() == 1));
        assert_eq!(tracker.requested_offsets(), vec![0, 0, 0]);
    }

    #[tokio::test]
    async fn exhausted_retry_budget_fails_the_fetch() {
        let tracker = Arc::new(FakeTracker::with_issues(Vec::new()));
        tracker.fail_next_searches(3);
        let lister = SourceLister::new(tracker.clone(), "q");

        let err = lister.fetch().await.unwrap_err();

        assert!(matches!(err, SourceError::RetriesExhausted { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn nothing_left_is_reported_as_empty() {
        let tracker = Arc::new(FakeTracker::with_issues(vec![issue_json("X", "X-1", Vec::new())]));
        let lister = SourceLister::new(tracker, "q");

        assert_eq!(lister.fetch().await.unwrap(), SourceListing::Empty);
    }
}
