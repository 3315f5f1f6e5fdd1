//! Core domain model for festival news sync.

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "festnews-core";

/// Publication date layout used by the news search API (`pubDate`).
pub const PUB_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S %z";

/// One festival description as it appears in a festival-info JSON file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FestivalSource {
    #[serde(rename = "Title", default)]
    pub title: Option<String>,
    #[serde(rename = "Region", default)]
    pub region: Option<String>,
    #[serde(rename = "Main Region", default)]
    pub main_region: Option<String>,
    #[serde(rename = "Period", default)]
    pub period: Option<String>,
    #[serde(rename = "Nature", default)]
    pub nature: Option<String>,
    #[serde(rename = "Fee", default)]
    pub fee: Option<String>,
    #[serde(rename = "Info", default)]
    pub info: Option<String>,
    #[serde(rename = "URL", default)]
    pub url: Option<String>,
}

impl FestivalSource {
    /// Stamp a source record into a storable detail row. `None` when the title is absent.
    pub fn into_detail(self, now: DateTime<Utc>) -> Option<FestivalDetail> {
        let title = self.title.filter(|t| !t.trim().is_empty())?;
        Some(FestivalDetail {
            title,
            region: self.region,
            main_region: self.main_region,
            period: self.period,
            nature: self.nature,
            fee: self.fee,
            info: self.info,
            url: self.url,
            created_at: now,
            updated_at: now,
        })
    }

    /// `None` unless both a non-blank title and a main region are present.
    pub fn target(&self) -> Option<FestivalTarget> {
        let title = self.title.as_ref().filter(|t| !t.trim().is_empty());
        match (title, &self.main_region) {
            (Some(name), Some(main_region)) => Some(FestivalTarget {
                name: name.clone(),
                main_region: main_region.clone(),
            }),
            _ => None,
        }
    }
}

/// Festival details row, unique by `title`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FestivalDetail {
    pub title: String,
    pub region: Option<String>,
    pub main_region: Option<String>,
    pub period: Option<String>,
    pub nature: Option<String>,
    pub fee: Option<String>,
    pub info: Option<String>,
    pub url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A festival the poller searches news for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FestivalTarget {
    pub name: String,
    pub main_region: String,
}

/// News row, unique by `link`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsArticle {
    pub link: String,
    pub festival_name: String,
    pub title: String,
    pub original_link: String,
    pub description: String,
    pub pub_date: DateTime<FixedOffset>,
    pub main_region: String,
}

/// Body of a news search response. Only `items` drives the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResponse {
    #[serde(rename = "lastBuildDate", default)]
    pub last_build_date: Option<String>,
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub start: Option<u64>,
    #[serde(default)]
    pub display: Option<u64>,
    #[serde(default)]
    pub items: Option<Vec<SearchItem>>,
}

/// Raw search hit before cleaning.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchItem {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub originallink: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "pubDate", default)]
    pub pub_date: Option<String>,
}

/// Search hit that passed the recency window, with its date parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecentArticle {
    pub title: Option<String>,
    pub originallink: Option<String>,
    pub link: Option<String>,
    pub description: Option<String>,
    pub pub_date: DateTime<FixedOffset>,
}

impl RecentArticle {
    pub fn from_item(item: SearchItem, pub_date: DateTime<FixedOffset>) -> Self {
        Self {
            title: item.title,
            originallink: item.originallink,
            link: item.link,
            description: item.description,
            pub_date,
        }
    }
}
