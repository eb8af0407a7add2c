//! # Paper sources
//!
//! Two upstream shapes feed the same [`Paper`] stream:
//!
//! - [`query::QueryAdapter`]: the arXiv export API. Filtering by category,
//!   author and submission date happens server-side.
//! - [`feed::FeedAdapter`]: the arXiv RSS feed. Returns the current day's
//!   snapshot for a category; author filtering happens locally.
//!
//! Adapters never return errors. An upstream failure is reported through
//! [`FetchStatus::Failed`] with an empty paper list, and per-entry
//! normalization failures are collected as [`DroppedEntry`] values.

pub mod feed;
pub mod query;
pub mod xml;

pub use feed::{FeedAdapter, FeedDocument, FeedEntry, FeedFetcher, RssFeedClient};
pub use query::{ArxivApi, ArxivApiClient, QueryAdapter, QueryPage, QueryRecord, QueryRequest};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::paper::Paper;

/// Which upstream a run reads from. Resolved once from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// Paginated query API with server-side filtering.
    #[serde(alias = "api")]
    Query,
    /// Daily syndication feed snapshot.
    #[default]
    #[serde(alias = "rss")]
    Feed,
}

impl Source {
    /// Parse a source name. `api` and `rss` are accepted as aliases.
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "query" | "api" => Some(Self::Query),
            "feed" | "rss" => Some(Self::Feed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Feed => "feed",
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An upstream entry that could not be normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedEntry {
    /// Whatever identifier the raw entry had, if any.
    pub entry_id: Option<String>,
    pub reason: String,
}

impl DroppedEntry {
    pub fn new(entry_id: Option<&str>, reason: impl Into<String>) -> Self {
        Self {
            entry_id: entry_id.map(str::to_string),
            reason: reason.into(),
        }
    }
}

/// Whether the upstream call itself succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchStatus {
    Complete,
    Failed(String),
}

/// Result of one adapter fetch.
#[derive(Debug, Clone)]
pub struct FetchBatch {
    pub papers: Vec<Paper>,
    pub dropped: Vec<DroppedEntry>,
    pub status: FetchStatus,
}

impl FetchBatch {
    pub fn complete(papers: Vec<Paper>, dropped: Vec<DroppedEntry>) -> Self {
        Self {
            papers,
            dropped,
            status: FetchStatus::Complete,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            papers: Vec::new(),
            dropped: Vec::new(),
            status: FetchStatus::Failed(reason.into()),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, FetchStatus::Failed(_))
    }
}

/// Common contract for both source variants.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// The variant this adapter serves.
    fn source(&self) -> Source;

    /// Fetch and normalize papers. `since` is the query watermark; feed
    /// adapters ignore it.
    async fn fetch(&self, since: Option<DateTime<Utc>>) -> FetchBatch;
}
