//! Festival-info file loading, news search client, and article cleaning.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use festnews_core::{
    FestivalSource, FestivalTarget, RecentArticle, SearchItem, SearchResponse, PUB_DATE_FORMAT,
};
use festnews_storage::{FestivalStore, FetchError, HttpFetcher, RetryDisposition, UpsertOutcome};
use scraper::Html;
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const CRATE_NAME: &str = "festnews-adapters";

pub const NAVER_NEWS_SEARCH_URL: &str = "https://openapi.naver.com/v1/search/news.json";
pub const DEFAULT_SEARCH_DISPLAY: u32 = 100;
pub const DEFAULT_RECENCY_MONTHS: u32 = 12;

/// Strip markup and decode entities. Never fails; malformed markup yields
/// whatever text the HTML5 parser recovers.
pub fn sanitize_text(raw: &str) -> String {
    let (markup, tail) = split_unterminated_tag(raw);
    let fragment = Html::parse_fragment(markup);
    let mut text = fragment.root_element().text().collect::<String>();
    text.push_str(tail);
    // search snippets are frequently double-escaped (`&amp;quot;`)
    html_escape::decode_html_entities(&text).into_owned()
}

/// Split off a trailing `<` that would open a tag never closed before end of
/// input (`x<y`). The tokenizer drops such a tail; it is kept as text instead.
fn split_unterminated_tag(raw: &str) -> (&str, &str) {
    let search_from = raw.rfind('>').map_or(0, |i| i + 1);
    let bytes = raw.as_bytes();
    let open = raw[search_from..]
        .match_indices('<')
        .map(|(i, _)| search_from + i)
        .find(|&i| {
            bytes
                .get(i + 1)
                .is_some_and(|b| b.is_ascii_alphabetic() || matches!(b, b'/' | b'!' | b'?'))
        });
    match open {
        Some(i) => raw.split_at(i),
        None => (raw, ""),
    }
}

/// `now - 30 * months` days, clamped to the earliest representable instant.
pub fn recency_cutoff(now: DateTime<Utc>, months: u32) -> DateTime<Utc> {
    Duration::try_days(30 * i64::from(months))
        .and_then(|window| now.checked_sub_signed(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Keep items published strictly after `now - 30 * months` days.
///
/// Items with a missing or unparseable `pubDate` are logged and dropped.
pub fn filter_recent(items: Vec<SearchItem>, months: u32, now: DateTime<Utc>) -> Vec<RecentArticle> {
    let cutoff = recency_cutoff(now, months);
    let mut recent = Vec::with_capacity(items.len());

    for item in items {
        let Some(raw_date) = item.pub_date.as_deref() else {
            warn!(link = item.link.as_deref().unwrap_or("<none>"), "skipping article without pubDate");
            continue;
        };
        let pub_date = match DateTime::parse_from_str(raw_date, PUB_DATE_FORMAT) {
            Ok(d) => d,
            Err(err) => {
                warn!(pub_date = raw_date, error = %err, "skipping article with invalid pubDate");
                continue;
            }
        };
        if pub_date.with_timezone(&Utc) > cutoff {
            recent.push(RecentArticle::from_item(item, pub_date));
        }
    }

    recent
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("decoding search response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl SearchError {
    /// Whether the next pass has a reasonable chance of succeeding.
    pub fn is_transient(&self) -> bool {
        match self {
            SearchError::Fetch(err) => err.disposition() == RetryDisposition::Retryable,
            SearchError::Decode(_) => false,
        }
    }
}

#[async_trait]
pub trait NewsSearch: Send + Sync {
    fn source_id(&self) -> &'static str;

    async fn search(&self, query: &str) -> Result<SearchResponse, SearchError>;
}

#[derive(Debug, Clone)]
pub struct NaverCredentials {
    pub client_id: String,
    pub client_secret: String,
}

/// Naver news search. One GET per call, no retries.
#[derive(Debug, Clone)]
pub struct NaverNewsClient {
    http: HttpFetcher,
    credentials: NaverCredentials,
    endpoint: String,
    display: u32,
}

impl NaverNewsClient {
    pub fn new(http: HttpFetcher, credentials: NaverCredentials) -> Self {
        Self {
            http,
            credentials,
            endpoint: NAVER_NEWS_SEARCH_URL.to_string(),
            display: DEFAULT_SEARCH_DISPLAY,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_display(mut self, display: u32) -> Self {
        self.display = display;
        self
    }
}

#[async_trait]
impl NewsSearch for NaverNewsClient {
    fn source_id(&self) -> &'static str {
        "naver-news"
    }

    async fn search(&self, query: &str) -> Result<SearchResponse, SearchError> {
        let display = self.display.to_string();
        let fetched = self
            .http
            .fetch_bytes(
                &self.endpoint,
                &[("query", query), ("display", display.as_str())],
                &[
                    ("X-Naver-Client-Id", self.credentials.client_id.as_str()),
                    ("X-Naver-Client-Secret", self.credentials.client_secret.as_str()),
                ],
            )
            .await
            .map_err(|err| {
                warn!(query, error = %err, "news search request failed");
                SearchError::from(err)
            })?;

        let response: SearchResponse = serde_json::from_slice(&fetched.body).map_err(|err| {
            warn!(query, error = %err, "news search response was not valid JSON");
            SearchError::from(err)
        })?;
        debug!(
            query,
            items = response.items.as_ref().map(Vec::len).unwrap_or(0),
            "news search ok"
        );
        Ok(response)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    pub files: usize,
    pub inserted: usize,
    pub updated: usize,
    pub skipped_items: usize,
    pub failed_files: Vec<String>,
}

/// Reads the festival-info directory: one JSON array of festival objects per `*.json` file.
#[derive(Debug, Clone)]
pub struct DetailLoader {
    dir: PathBuf,
}

impl DetailLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `*.json` files in the directory, sorted by file name.
    pub fn json_files(&self) -> Result<Vec<PathBuf>> {
        let entries = fs::read_dir(&self.dir)
            .with_context(|| format!("reading festival directory {}", self.dir.display()))?;
        let mut files = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "json"))
            .collect::<Vec<_>>();
        files.sort();
        Ok(files)
    }

    /// Upsert every festival object into `store`, stamped with `now`.
    ///
    /// Only a missing directory is an error; bad files and bad items are
    /// logged and counted.
    pub async fn load_into(&self, store: &dyn FestivalStore, now: DateTime<Utc>) -> Result<LoadSummary> {
        let mut summary = LoadSummary::default();

        for path in self.json_files()? {
            summary.files += 1;
            let items = match read_festival_array(&path) {
                Ok(items) => items,
                Err(err) => {
                    warn!(file = %path.display(), error = %err, "failed to process festival file");
                    summary.failed_files.push(path.display().to_string());
                    continue;
                }
            };

            for item in items {
                let detail = match serde_json::from_value::<FestivalSource>(item) {
                    Ok(src) => src.into_detail(now),
                    Err(err) => {
                        warn!(file = %path.display(), error = %err, "skipping malformed festival entry");
                        summary.skipped_items += 1;
                        continue;
                    }
                };
                let Some(detail) = detail else {
                    warn!(file = %path.display(), "skipping festival entry without Title");
                    summary.skipped_items += 1;
                    continue;
                };

                match store.upsert_detail(&detail).await {
                    Ok(UpsertOutcome::Inserted) => summary.inserted += 1,
                    Ok(UpsertOutcome::Updated) => summary.updated += 1,
                    Err(err) => {
                        warn!(title = %detail.title, error = %err, "failed to save festival details");
                        summary.skipped_items += 1;
                    }
                }
            }
        }

        info!(
            files = summary.files,
            inserted = summary.inserted,
            updated = summary.updated,
            skipped = summary.skipped_items,
            failed_files = summary.failed_files.len(),
            "festival details loaded"
        );
        Ok(summary)
    }

    /// `(Title, Main Region)` pairs in file then array order. Duplicates are kept.
    pub fn targets(&self) -> Result<Vec<FestivalTarget>> {
        let mut targets = Vec::new();
        for path in self.json_files()? {
            let items = match read_festival_array(&path) {
                Ok(items) => items,
                Err(err) => {
                    warn!(file = %path.display(), error = %err, "skipping unreadable festival file");
                    continue;
                }
            };
            for item in items {
                match serde_json::from_value::<FestivalSource>(item)
                    .ok()
                    .and_then(|src| src.target())
                {
                    Some(target) => targets.push(target),
                    None => warn!(file = %path.display(), "festival entry lacks Title or Main Region"),
                }
            }
        }
        Ok(targets)
    }
}

fn read_festival_array(path: &Path) -> Result<Vec<JsonValue>> {
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}
