//! Festival/news persistence + HTTP fetch utilities.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use festnews_core::{FestivalDetail, NewsArticle};
use reqwest::StatusCode;
use sqlx::migrate::Migrator;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info_span, Instrument};

pub const CRATE_NAME: &str = "festnews-storage";

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Upsert-by-unique-key access to the two tables.
///
/// `created_at` on a festival row is kept from the first insert; every other
/// column, `updated_at` included, takes the latest value.
#[async_trait]
pub trait FestivalStore: Send + Sync {
    async fn upsert_detail(&self, detail: &FestivalDetail) -> Result<UpsertOutcome, StoreError>;

    async fn upsert_news(&self, article: &NewsArticle) -> Result<UpsertOutcome, StoreError>;

    async fn detail(&self, title: &str) -> Result<Option<FestivalDetail>, StoreError>;

    async fn news_article(&self, link: &str) -> Result<Option<NewsArticle>, StoreError>;
}

#[derive(Debug, Clone)]
pub struct PgFestivalStore {
    pool: PgPool,
}

impl PgFestivalStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }
}

fn outcome(inserted: bool) -> UpsertOutcome {
    if inserted {
        UpsertOutcome::Inserted
    } else {
        UpsertOutcome::Updated
    }
}

#[async_trait]
impl FestivalStore for PgFestivalStore {
    async fn upsert_detail(&self, detail: &FestivalDetail) -> Result<UpsertOutcome, StoreError> {
        // xmax is 0 only for a freshly inserted tuple
        let row = sqlx::query(
            r#"
            INSERT INTO festival_details
                (title, region, main_region, period, nature, fee, info, url, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (title) DO UPDATE
               SET region = EXCLUDED.region,
                   main_region = EXCLUDED.main_region,
                   period = EXCLUDED.period,
                   nature = EXCLUDED.nature,
                   fee = EXCLUDED.fee,
                   info = EXCLUDED.info,
                   url = EXCLUDED.url,
                   updated_at = EXCLUDED.updated_at
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(&detail.title)
        .bind(&detail.region)
        .bind(&detail.main_region)
        .bind(&detail.period)
        .bind(&detail.nature)
        .bind(&detail.fee)
        .bind(&detail.info)
        .bind(&detail.url)
        .bind(detail.created_at)
        .bind(detail.updated_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(outcome(row.try_get("inserted")?))
    }

    async fn upsert_news(&self, article: &NewsArticle) -> Result<UpsertOutcome, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO festival_news
                (link, festival_name, title, originallink, description, pub_date, main_region)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (link) DO UPDATE
               SET festival_name = EXCLUDED.festival_name,
                   title = EXCLUDED.title,
                   originallink = EXCLUDED.originallink,
                   description = EXCLUDED.description,
                   pub_date = EXCLUDED.pub_date,
                   main_region = EXCLUDED.main_region
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(&article.link)
        .bind(&article.festival_name)
        .bind(&article.title)
        .bind(&article.original_link)
        .bind(&article.description)
        .bind(article.pub_date.with_timezone(&Utc))
        .bind(&article.main_region)
        .fetch_one(&self.pool)
        .await?;
        Ok(outcome(row.try_get("inserted")?))
    }

    async fn detail(&self, title: &str) -> Result<Option<FestivalDetail>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT title, region, main_region, period, nature, fee, info, url, created_at, updated_at
              FROM festival_details
             WHERE title = $1
            "#,
        )
        .bind(title)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(FestivalDetail {
            title: row.try_get("title")?,
            region: row.try_get("region")?,
            main_region: row.try_get("main_region")?,
            period: row.try_get("period")?,
            nature: row.try_get("nature")?,
            fee: row.try_get("fee")?,
            info: row.try_get("info")?,
            url: row.try_get("url")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        }))
    }

    async fn news_article(&self, link: &str) -> Result<Option<NewsArticle>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT link, festival_name, title, originallink, description, pub_date, main_region
              FROM festival_news
             WHERE link = $1
            "#,
        )
        .bind(link)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let pub_date: DateTime<Utc> = row.try_get("pub_date")?;
        Ok(Some(NewsArticle {
            link: row.try_get("link")?,
            festival_name: row.try_get("festival_name")?,
            title: row.try_get("title")?,
            original_link: row.try_get("originallink")?,
            description: row.try_get("description")?,
            pub_date: pub_date.into(),
            main_region: row.try_get("main_region")?,
        }))
    }
}

/// In-process store with the same upsert semantics as [`PgFestivalStore`].
#[derive(Debug, Default)]
pub struct MemoryFestivalStore {
    details: Mutex<BTreeMap<String, FestivalDetail>>,
    news: Mutex<BTreeMap<String, NewsArticle>>,
}

impl MemoryFestivalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn details(&self) -> Vec<FestivalDetail> {
        self.details.lock().await.values().cloned().collect()
    }

    pub async fn news(&self) -> Vec<NewsArticle> {
        self.news.lock().await.values().cloned().collect()
    }
}

#[async_trait]
impl FestivalStore for MemoryFestivalStore {
    async fn upsert_detail(&self, detail: &FestivalDetail) -> Result<UpsertOutcome, StoreError> {
        let mut details = self.details.lock().await;
        match details.get_mut(&detail.title) {
            Some(existing) => {
                let created_at = existing.created_at;
                *existing = detail.clone();
                existing.created_at = created_at;
                Ok(UpsertOutcome::Updated)
            }
            None => {
                details.insert(detail.title.clone(), detail.clone());
                Ok(UpsertOutcome::Inserted)
            }
        }
    }

    async fn upsert_news(&self, article: &NewsArticle) -> Result<UpsertOutcome, StoreError> {
        let previous = self
            .news
            .lock()
            .await
            .insert(article.link.clone(), article.clone());
        Ok(outcome(previous.is_none()))
    }

    async fn detail(&self, title: &str) -> Result<Option<FestivalDetail>, StoreError> {
        Ok(self.details.lock().await.get(title).cloned())
    }

    async fn news_article(&self, link: &str) -> Result<Option<NewsArticle>, StoreError> {
        Ok(self.news.lock().await.get(link).cloned())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Default)]
pub struct HttpClientConfig {
    /// `None` leaves reqwest's default (no overall timeout).
    pub timeout: Option<Duration>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

impl FetchError {
    pub fn disposition(&self) -> RetryDisposition {
        match self {
            FetchError::Request(err) => classify_reqwest_error(err),
            FetchError::HttpStatus { status, .. } => StatusCode::from_u16(*status)
                .map(classify_status)
                .unwrap_or(RetryDisposition::NonRetryable),
        }
    }
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder().gzip(true).brotli(true);

        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self { client })
    }

    /// Single GET; anything other than `200 OK` is an error. No retries.
    pub async fn fetch_bytes(
        &self,
        url: &str,
        query: &[(&str, &str)],
        headers: &[(&str, &str)],
    ) -> Result<FetchedResponse, FetchError> {
        let span = info_span!("http_fetch", url);
        self.get_once(url, query, headers).instrument(span).await
    }

    async fn get_once(
        &self,
        url: &str,
        query: &[(&str, &str)],
        headers: &[(&str, &str)],
    ) -> Result<FetchedResponse, FetchError> {
        let mut request = self.client.get(url).query(query);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }

        let resp = request.send().await?;
        let status = resp.status();
        let final_url = resp.url().to_string();
        if status != StatusCode::OK {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: final_url,
            });
        }

        let body = resp.bytes().await?.to_vec();
        debug!(bytes = body.len(), "fetched");
        Ok(FetchedResponse {
            status,
            final_url,
            body,
        })
    }
}
