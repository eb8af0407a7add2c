//! Feed source: the arXiv RSS feed for one category.
//!
//! The feed carries only the latest daily announcement, has no server-side
//! filtering, and packs all authors of an item into one comma-separated
//! `dc:creator` string with TeX escapes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::xml::{Record, read_document};
use super::{DroppedEntry, FetchBatch, Source, SourceAdapter};
use crate::error::SourceError;
use crate::latex::decode_author_name;
use crate::paper::{
    normalize_whitespace, pdf_link_for, short_id_from_url, AnnounceType, Paper,
    UNKNOWN_FEED_ANNOUNCE_TYPE,
};

const ARXIV_RSS_BASE: &str = "https://rss.arxiv.org/rss";
const USER_AGENT: &str = concat!("paperwatch/", env!("CARGO_PKG_VERSION"));
const SOURCE_NAME: &str = "arXiv RSS";

/// Textual date format used when no pre-parsed time is available.
pub const FEED_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S %z";

/// A raw feed item, before normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedEntry {
    pub id: Option<String>,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub link: Option<String>,
    /// Raw creator strings. arXiv sends one string holding every author.
    pub authors: Vec<String>,
    /// Raw `pubDate` text.
    pub published: Option<String>,
    /// Structured publication time, when the document provided a parseable one.
    pub published_parsed: Option<DateTime<Utc>>,
    pub journal_reference: Option<String>,
    pub announce_type: Option<String>,
}

/// A fetched and parsed feed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedDocument {
    /// Final HTTP status after redirects.
    pub status: Option<u16>,
    /// Set when the document was not well formed; entries may be partial.
    pub bozo: bool,
    pub bozo_reason: Option<String>,
    pub entries: Vec<FeedEntry>,
}

/// The feed collaborator.
#[async_trait]
pub trait FeedFetcher: Send + Sync {
    async fn fetch(&self, category: &str) -> Result<FeedDocument, SourceError>;
}

/// HTTP client for the arXiv RSS feed. Redirects are followed.
pub struct RssFeedClient {
    client: reqwest::Client,
    base_url: String,
}

impl RssFeedClient {
    pub fn new() -> Result<Self, SourceError> {
        Self::with_base_url(ARXIV_RSS_BASE)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| SourceError::Client {
                message: e.to_string(),
            })?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    pub fn feed_url(&self, category: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), category)
    }
}

#[async_trait]
impl FeedFetcher for RssFeedClient {
    async fn fetch(&self, category: &str) -> Result<FeedDocument, SourceError> {
        let url = self.feed_url(category);
        tracing::info!(url = %url, "Fetching RSS feed");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| SourceError::Request {
                source_name: SOURCE_NAME.to_string(),
                message: e.to_string(),
            })?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| SourceError::Request {
            source_name: SOURCE_NAME.to_string(),
            message: format!("failed to read body: {e}"),
        })?;

        let mut document = parse_rss_document(&body);
        document.status = Some(status);
        Ok(document)
    }
}

// ── RSS parsing ───────────────────────────────────────────────

/// Parse an RSS 2.0 document. Never fails; a malformed document, or one
/// without a `<channel>`, sets `bozo` and keeps whatever items closed cleanly.
pub fn parse_rss_document(xml: &str) -> FeedDocument {
    let doc = read_document(xml, "item");

    let bozo_reason = doc.error.or_else(|| {
        (!doc.top.contains("channel")).then(|| "document has no <channel> element".to_string())
    });

    FeedDocument {
        status: None,
        bozo: bozo_reason.is_some(),
        bozo_reason,
        entries: doc.records.iter().map(parse_item).collect(),
    }
}

fn parse_item(item: &Record) -> FeedEntry {
    let owned = |path: &str| item.text(path).map(str::to_string);
    let published = owned("pubDate");
    let published_parsed = item
        .text("dc:date")
        .and_then(|d| DateTime::parse_from_rfc3339(d).ok())
        .or_else(|| {
            published
                .as_deref()
                .and_then(|p| DateTime::parse_from_rfc2822(p).ok())
        })
        .map(|dt| dt.with_timezone(&Utc));

    FeedEntry {
        id: owned("guid"),
        title: owned("title"),
        summary: owned("description"),
        link: owned("link"),
        authors: item.texts("dc:creator").map(str::to_string).collect(),
        published,
        published_parsed,
        journal_reference: owned("arxiv:journal_reference"),
        announce_type: owned("arxiv:announce_type"),
    }
}

// ── Normalization ─────────────────────────────────────────────

/// Split the feed's joined author strings and decode TeX escapes.
pub fn parse_authors(raw: &[String]) -> Vec<String> {
    raw.iter()
        .flat_map(|joined| joined.split(','))
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(decode_author_name)
        .filter(|name| !name.is_empty())
        .collect()
}

/// Canonical abstract URL for an entry: the id when it is a URL, otherwise
/// the abstract link, otherwise one rebuilt from the short id.
fn canonical_url(id: &str, link: Option<&str>) -> String {
    if id.contains("/abs/") {
        return id.to_string();
    }
    if let Some(link) = link.filter(|l| l.contains("/abs/")) {
        return link.to_string();
    }
    format!("https://arxiv.org/abs/{}", short_id_from_url(id))
}

fn parse_published(entry: &FeedEntry, id: &str) -> Result<DateTime<Utc>, DroppedEntry> {
    if let Some(parsed) = entry.published_parsed {
        return Ok(parsed);
    }
    match entry.published.as_deref() {
        Some(text) => DateTime::parse_from_str(text.trim(), FEED_DATE_FORMAT)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                DroppedEntry::new(
                    Some(id),
                    format!("unparseable published date '{}': {}", text, e),
                )
            }),
        None => Err(DroppedEntry::new(Some(id), "no usable published date")),
    }
}

/// Strip the `arXiv:... Announce Type: ... Abstract:` preamble.
fn clean_summary(raw: &str) -> String {
    let body = raw.split_once("Abstract: ").map_or(raw, |(_, rest)| rest);
    normalize_whitespace(body)
}

/// Normalize a raw feed entry into a [`Paper`].
pub fn normalize_entry(entry: &FeedEntry) -> Result<Paper, DroppedEntry> {
    let Some(raw_id) = entry.id.as_deref().filter(|id| !id.trim().is_empty()) else {
        return Err(DroppedEntry::new(None, "missing id"));
    };
    let Some(title) = entry.title.as_deref() else {
        return Err(DroppedEntry::new(Some(raw_id), "missing title"));
    };
    let Some(summary) = entry.summary.as_deref() else {
        return Err(DroppedEntry::new(Some(raw_id), "missing summary"));
    };

    let id = canonical_url(raw_id.trim(), entry.link.as_deref());
    let published = parse_published(entry, &id)?;

    let authors = parse_authors(&entry.authors);
    if authors.is_empty() {
        tracing::warn!(id = %id, raw = ?entry.authors, "Could not parse authors for feed entry");
    }

    let short_id = short_id_from_url(&id);
    let announce_type = entry
        .announce_type
        .as_deref()
        .map(AnnounceType::parse)
        .unwrap_or_else(|| AnnounceType::Other(UNKNOWN_FEED_ANNOUNCE_TYPE.to_string()));

    Ok(Paper {
        title: normalize_whitespace(title),
        authors,
        published,
        summary: clean_summary(summary),
        link: entry.link.clone().unwrap_or_else(|| id.clone()),
        pdf_link: pdf_link_for(&short_id),
        journal_ref: entry
            .journal_reference
            .as_deref()
            .map(normalize_whitespace)
            .filter(|j| !j.is_empty()),
        announce_type: Some(announce_type),
        id,
    })
}

// ── Adapter ───────────────────────────────────────────────────

/// Source adapter over the RSS feed. Returns every normalizable entry;
/// author filtering is applied by the coordinator.
pub struct FeedAdapter {
    fetcher: Arc<dyn FeedFetcher>,
    category: String,
    max_results: usize,
}

impl FeedAdapter {
    pub fn new(fetcher: Arc<dyn FeedFetcher>, category: impl Into<String>, max_results: usize) -> Self {
        Self {
            fetcher,
            category: category.into(),
            max_results,
        }
    }
}

#[async_trait]
impl SourceAdapter for FeedAdapter {
    fn source(&self) -> Source {
        Source::Feed
    }

    async fn fetch(&self, _since: Option<DateTime<Utc>>) -> FetchBatch {
        let document = match self.fetcher.fetch(&self.category).await {
            Ok(doc) => doc,
            Err(e) => {
                tracing::error!(error = %e, "RSS feed fetch failed");
                return FetchBatch::failed(e.to_string());
            }
        };

        if document.bozo {
            tracing::warn!(
                reason = document.bozo_reason.as_deref().unwrap_or("unknown"),
                "RSS feed parsed with problems"
            );
        }

        if let Some(status) = document.status.filter(|s| *s >= 400) {
            tracing::error!(status, "RSS feed returned an error status");
            return FetchBatch::failed(format!("HTTP status {}", status));
        }

        tracing::info!(
            status = ?document.status,
            entries = document.entries.len(),
            "RSS feed fetched"
        );

        let mut papers = Vec::new();
        let mut dropped = Vec::new();
        for entry in document.entries.iter().take(self.max_results) {
            match normalize_entry(entry) {
                Ok(paper) => papers.push(paper),
                Err(d) => {
                    tracing::warn!(entry = ?d.entry_id, reason = %d.reason, "Dropping feed entry");
                    dropped.push(d);
                }
            }
        }
        FetchBatch::complete(papers, dropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const SAMPLE_RSS: &str = r#"<?xml version='1.0' encoding='UTF-8'?>
<rss xmlns:arxiv="http://arxiv.org/schemas/atom" xmlns:dc="http://purl.org/dc/elements/1.1/" version="2.0">
  <channel>
    <title>quant-ph updates on arXiv.org</title>
    <link>http://rss.arxiv.org/rss/quant-ph</link>
    <item>
      <title>Entanglement &amp; Memory</title>
      <link>https://arxiv.org/abs/2410.01234</link>
      <description>arXiv:2410.01234v1 Announce Type: new
Abstract: We study entanglement
in memories.</description>
      <guid isPermaLink="false">oai:arXiv.org:2410.01234v1</guid>
      <category>quant-ph</category>
      <pubDate>Thu, 03 Oct 2024 00:00:00 -0400</pubDate>
      <arxiv:announce_type>new</arxiv:announce_type>
      <dc:creator>Alice Smith, Erwin Schr\"odinger, Bob Jones</dc:creator>
    </item>
    <item>
      <title>Published Result</title>
      <link>https://arxiv.org/abs/2409.00001</link>
      <description>arXiv:2409.00001v2 Announce Type: replace
Abstract: Old result.</description>
      <guid isPermaLink="false">oai:arXiv.org:2409.00001v2</guid>
      <pubDate>Thu, 03 Oct 2024 00:00:00 -0400</pubDate>
      <arxiv:announce_type>replace</arxiv:announce_type>
      <dc:creator>Carol King</dc:creator>
      <arxiv:journal_reference>Nature 1, 2 (2024)</arxiv:journal_reference>
    </item>
  </channel>
</rss>"#;

    fn entry(id: &str) -> FeedEntry {
        FeedEntry {
            id: Some(id.to_string()),
            title: Some("Title".into()),
            summary: Some("Abstract: Body".into()),
            link: None,
            authors: vec!["Alice Smith".into()],
            published: Some("Thu, 03 Oct 2024 00:00:00 -0400".into()),
            published_parsed: None,
            journal_reference: None,
            announce_type: None,
        }
    }

    struct StaticFetcher(Result<FeedDocument, SourceError>);

    #[async_trait]
    impl FeedFetcher for StaticFetcher {
        async fn fetch(&self, _category: &str) -> Result<FeedDocument, SourceError> {
            self.0.clone()
        }
    }

    #[test]
    fn test_parse_rss_document() {
        let doc = parse_rss_document(SAMPLE_RSS);
        assert!(!doc.bozo);
        assert_eq!(doc.entries.len(), 2);
        let first = &doc.entries[0];
        assert_eq!(first.id.as_deref(), Some("oai:arXiv.org:2410.01234v1"));
        assert_eq!(first.title.as_deref(), Some("Entanglement & Memory"));
        assert_eq!(first.announce_type.as_deref(), Some("new"));
        assert_eq!(first.authors.len(), 1);
        assert_eq!(
            first.published_parsed,
            Some(Utc.with_ymd_and_hms(2024, 10, 3, 4, 0, 0).unwrap())
        );
        assert_eq!(
            doc.entries[1].journal_reference.as_deref(),
            Some("Nature 1, 2 (2024)")
        );
    }

    #[test]
    fn test_parse_rss_cdata_description_kept_literally() {
        let xml = r#"<rss xmlns:dc="http://purl.org/dc/elements/1.1/" version="2.0"><channel>
  <item>
    <title>Inequalities &amp; Bounds</title>
    <link>https://arxiv.org/abs/2410.04444</link>
    <description><![CDATA[arXiv:2410.04444v1 Announce Type: new
Abstract: We prove 5 &lt; 6 for a < b.]]></description>
    <guid isPermaLink='false'>oai:arXiv.org:2410.04444v1</guid>
    <pubDate>Thu, 03 Oct 2024 00:00:00 -0400</pubDate>
    <dc:creator>Alice Smith</dc:creator>
  </item>
</channel></rss>"#;
        let doc = parse_rss_document(xml);
        assert!(!doc.bozo);
        let paper = normalize_entry(&doc.entries[0]).unwrap();
        assert_eq!(paper.title, "Inequalities & Bounds");
        assert_eq!(paper.summary, "We prove 5 &lt; 6 for a < b.");
    }

    #[test]
    fn test_parse_rss_malformed_is_bozo_with_partial_entries() {
        let cut = SAMPLE_RSS.find("<title>Published Result").unwrap();
        let doc = parse_rss_document(&SAMPLE_RSS[..cut]);
        assert!(doc.bozo);
        assert!(doc.bozo_reason.is_some());
        assert_eq!(doc.entries.len(), 1);
    }

    #[test]
    fn test_parse_rss_bozo_without_channel() {
        let doc = parse_rss_document("<html><body>Service unavailable</body></html>");
        assert!(doc.bozo);
        assert!(doc.entries.is_empty());
    }

    #[test]
    fn test_normalize_entry_from_document() {
        let doc = parse_rss_document(SAMPLE_RSS);
        let paper = normalize_entry(&doc.entries[0]).unwrap();
        assert_eq!(paper.id, "https://arxiv.org/abs/2410.01234");
        assert_eq!(paper.pdf_link, "https://arxiv.org/pdf/2410.01234");
        assert_eq!(
            paper.authors,
            vec!["Alice Smith", "Erwin Schrödinger", "Bob Jones"]
        );
        assert_eq!(paper.summary, "We study entanglement in memories.");
        assert_eq!(paper.announce_type, Some(AnnounceType::New));

        let replaced = normalize_entry(&doc.entries[1]).unwrap();
        assert_eq!(replaced.announce_type, Some(AnnounceType::Replace));
        assert_eq!(replaced.journal_ref.as_deref(), Some("Nature 1, 2 (2024)"));
    }

    #[test]
    fn test_normalize_entry_url_id() {
        let paper = normalize_entry(&entry("http://arxiv.org/abs/2410.09999v1")).unwrap();
        assert_eq!(paper.id, "http://arxiv.org/abs/2410.09999v1");
        assert_eq!(paper.link, paper.id);
        assert_eq!(paper.pdf_link, "https://arxiv.org/pdf/2410.09999v1");
        assert_eq!(
            paper.announce_type,
            Some(AnnounceType::Other(UNKNOWN_FEED_ANNOUNCE_TYPE.into()))
        );
    }

    #[test]
    fn test_normalize_entry_text_date_fallback() {
        let paper = normalize_entry(&entry("http://arxiv.org/abs/2410.09999")).unwrap();
        assert_eq!(
            paper.published,
            Utc.with_ymd_and_hms(2024, 10, 3, 4, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_normalize_entry_prefers_parsed_date() {
        let mut e = entry("http://arxiv.org/abs/2410.09999");
        let parsed = Utc.with_ymd_and_hms(2024, 10, 2, 0, 0, 0).unwrap();
        e.published_parsed = Some(parsed);
        e.published = Some("garbage".into());
        assert_eq!(normalize_entry(&e).unwrap().published, parsed);
    }

    #[test]
    fn test_normalize_entry_without_date_is_dropped() {
        let mut e = entry("http://arxiv.org/abs/2410.09999");
        e.published = Some("03/10/2024".into());
        let dropped = normalize_entry(&e).unwrap_err();
        assert!(dropped.reason.contains("03/10/2024"));

        e.published = None;
        let dropped = normalize_entry(&e).unwrap_err();
        assert_eq!(dropped.reason, "no usable published date");
    }

    #[test]
    fn test_normalize_entry_without_id_is_dropped() {
        let mut e = entry("x");
        e.id = None;
        let dropped = normalize_entry(&e).unwrap_err();
        assert!(dropped.entry_id.is_none());
    }

    #[test]
    fn test_parse_authors_splits_and_decodes() {
        let raw = vec!["Jos\\'e Garc\\'ia,  Bj\\o rn Berg , ".to_string()];
        assert_eq!(parse_authors(&raw), vec!["José García", "Bjørn Berg"]);
    }

    #[tokio::test]
    async fn test_adapter_error_status_voids_fetch() {
        let mut doc = parse_rss_document(SAMPLE_RSS);
        doc.status = Some(404);
        let adapter = FeedAdapter::new(Arc::new(StaticFetcher(Ok(doc))), "quant-ph", 50);
        let batch = adapter.fetch(None).await;
        assert!(batch.is_failed());
        assert!(batch.papers.is_empty());
    }

    #[tokio::test]
    async fn test_adapter_accepts_redirect_status() {
        let mut doc = parse_rss_document(SAMPLE_RSS);
        doc.status = Some(301);
        let adapter = FeedAdapter::new(Arc::new(StaticFetcher(Ok(doc))), "quant-ph", 50);
        let batch = adapter.fetch(None).await;
        assert!(!batch.is_failed());
        assert_eq!(batch.papers.len(), 2);
    }

    #[tokio::test]
    async fn test_adapter_keeps_entries_of_bozo_document() {
        let cut = SAMPLE_RSS.find("<title>Published Result").unwrap();
        let mut doc = parse_rss_document(&SAMPLE_RSS[..cut]);
        assert!(doc.bozo);
        doc.status = Some(200);
        let adapter = FeedAdapter::new(Arc::new(StaticFetcher(Ok(doc))), "quant-ph", 50);
        let batch = adapter.fetch(None).await;
        assert!(!batch.is_failed());
        assert_eq!(batch.papers.len(), 1);
        assert_eq!(batch.papers[0].id, "https://arxiv.org/abs/2410.01234");
    }

    #[tokio::test]
    async fn test_adapter_caps_entries_and_collects_drops() {
        let mut bad = entry("http://arxiv.org/abs/2410.00002");
        bad.published = None;
        let doc = FeedDocument {
            status: Some(200),
            entries: vec![entry("http://arxiv.org/abs/2410.00001"), bad, entry("http://arxiv.org/abs/2410.00003")],
            ..Default::default()
        };
        let adapter = FeedAdapter::new(Arc::new(StaticFetcher(Ok(doc))), "quant-ph", 2);
        let batch = adapter.fetch(None).await;
        assert_eq!(batch.papers.len(), 1);
        assert_eq!(batch.dropped.len(), 1);
    }

    #[tokio::test]
    async fn test_adapter_request_error_is_failed_batch() {
        let err = SourceError::Request {
            source_name: SOURCE_NAME.into(),
            message: "connection reset".into(),
        };
        let adapter = FeedAdapter::new(Arc::new(StaticFetcher(Err(err))), "quant-ph", 50);
        assert!(adapter.fetch(None).await.is_failed());
    }

    #[tokio::test]
    #[ignore = "requires network access"]
    async fn test_real_feed() {
        let client = RssFeedClient::new().unwrap();
        let doc = client.fetch("quant-ph").await.unwrap();
        assert!(doc.status.is_some_and(|s| s < 400));
    }
}
