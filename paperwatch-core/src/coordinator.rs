//! Turns one configured source into the run's ordered list of new papers.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::matcher::NameMatcher;
use crate::paper::Paper;
use crate::sources::{DroppedEntry, FetchBatch, FetchStatus, Source, SourceAdapter};
use crate::watermark::WatermarkStore;

/// What the coordinator produced for one run.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub source: Source,
    /// Deduplicated, ascending by `published`.
    pub papers: Vec<Paper>,
    pub dropped: Vec<DroppedEntry>,
    /// The query watermark the fetch started from. `None` for the feed.
    pub since: Option<DateTime<Utc>>,
    /// The feed was already checked today; nothing was fetched.
    pub skipped: bool,
    pub upstream_failure: Option<String>,
}

impl FetchOutcome {
    fn skipped(source: Source) -> Self {
        Self {
            source,
            papers: Vec::new(),
            dropped: Vec::new(),
            since: None,
            skipped: true,
            upstream_failure: None,
        }
    }

    pub fn attempted(&self) -> bool {
        !self.skipped
    }

    pub fn upstream_failed(&self) -> bool {
        self.upstream_failure.is_some()
    }
}

/// Drop repeated ids (first occurrence wins) and sort ascending by
/// `published`. The sort is stable, so equal timestamps keep fetch order.
pub fn dedupe_and_sort(papers: Vec<Paper>) -> Vec<Paper> {
    let mut seen = HashSet::new();
    let mut unique: Vec<Paper> = papers
        .into_iter()
        .filter(|p| seen.insert(p.id.clone()))
        .collect();
    unique.sort_by_key(|p| p.published);
    unique
}

pub struct FetchCoordinator {
    adapter: Arc<dyn SourceAdapter>,
    matcher: NameMatcher,
}

impl FetchCoordinator {
    pub fn new(adapter: Arc<dyn SourceAdapter>, matcher: NameMatcher) -> Self {
        Self { adapter, matcher }
    }

    pub async fn fetch_new_papers(&self, store: &WatermarkStore) -> FetchOutcome {
        let source = self.adapter.source();

        if source == Source::Feed && store.has_checked_feed_today() {
            tracing::info!("Feed already checked today, skipping fetch");
            return FetchOutcome::skipped(source);
        }

        let since = match source {
            Source::Query => Some(store.read_query_watermark()),
            Source::Feed => None,
        };
        tracing::info!(
            source = %source,
            since = ?since.map(|ts| ts.to_rfc3339()),
            "Fetching papers"
        );

        let adapter = Arc::clone(&self.adapter);
        let batch = match tokio::spawn(async move { adapter.fetch(since).await }).await {
            Ok(batch) => batch,
            Err(e) => {
                tracing::error!(error = %e, "Fetch task aborted");
                FetchBatch::failed(format!("fetch task aborted: {e}"))
            }
        };

        let FetchBatch {
            papers,
            dropped,
            status,
        } = batch;

        if let FetchStatus::Failed(reason) = status {
            tracing::warn!(source = %source, reason = %reason, "Upstream fetch failed");
            return FetchOutcome {
                source,
                papers: Vec::new(),
                dropped,
                since,
                skipped: false,
                upstream_failure: Some(reason),
            };
        }

        let fetched = papers.len();
        let papers: Vec<Paper> = match source {
            Source::Feed => papers
                .into_iter()
                .filter(|p| {
                    let keep = self.matcher.matches(&p.authors);
                    if !keep {
                        tracing::trace!(id = %p.id, "No watched author");
                    }
                    keep
                })
                .collect(),
            Source::Query => papers,
        };
        let papers = dedupe_and_sort(papers);

        tracing::info!(
            source = %source,
            fetched,
            relevant = papers.len(),
            dropped = dropped.len(),
            "Fetch complete"
        );

        FetchOutcome {
            source,
            papers,
            dropped,
            since,
            skipped: false,
            upstream_failure: None,
        }
    }
}
