//! Query source: the arXiv export API (Atom XML over HTTP).

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::xml::{Record, read_document};
use super::{DroppedEntry, FetchBatch, Source, SourceAdapter};
use crate::error::SourceError;
use crate::paper::{normalize_whitespace, pdf_link_for, short_id_from_url, AnnounceType, Paper};

const ARXIV_API_BASE: &str = "https://export.arxiv.org/api/query";
const USER_AGENT: &str = concat!("paperwatch/", env!("CARGO_PKG_VERSION"));
const SOURCE_NAME: &str = "arXiv API";

/// Largest page requested from the API in one call.
pub const DEFAULT_PAGE_SIZE: usize = 100;
/// Minimum spacing between API requests, per arXiv's usage policy.
pub const REQUEST_INTERVAL: Duration = Duration::from_secs(3);
/// Attempts per page before the fetch is reported as failed.
pub const MAX_ATTEMPTS: usize = 3;

/// Results are always requested oldest first so pagination walks forward
/// from the watermark.
const SORT_BY: &str = "submittedDate";
const SORT_ORDER: &str = "ascending";

/// One page request against the query API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    pub search_query: String,
    pub start: usize,
    pub max_results: usize,
}

/// A raw record as returned by the API, before normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryRecord {
    pub entry_id: String,
    pub title: String,
    pub authors: Vec<String>,
    pub published: String,
    pub summary: String,
    pub pdf_url: Option<String>,
    pub journal_ref: Option<String>,
}

/// One page of API results.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryPage {
    pub records: Vec<QueryRecord>,
    pub total_results: usize,
}

/// The query collaborator.
#[async_trait]
pub trait ArxivApi: Send + Sync {
    async fn search(&self, request: &QueryRequest) -> Result<QueryPage, SourceError>;
}

/// HTTP client for the arXiv export API.
pub struct ArxivApiClient {
    client: reqwest::Client,
    base_url: String,
    interval: Duration,
    last_request: tokio::sync::Mutex<Option<Instant>>,
}

impl ArxivApiClient {
    pub fn new() -> Result<Self, SourceError> {
        Self::with_base_url(ARXIV_API_BASE)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| SourceError::Client {
                message: e.to_string(),
            })?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            interval: REQUEST_INTERVAL,
            last_request: tokio::sync::Mutex::new(None),
        })
    }

    /// Enforce the minimum spacing between consecutive requests.
    async fn rate_limit(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(instant) = *last {
            let elapsed = instant.elapsed();
            if elapsed < self.interval {
                tokio::time::sleep(self.interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn search_once(&self, url: &str) -> Result<QueryPage, SourceError> {
        self.rate_limit().await;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SourceError::Request {
                source_name: SOURCE_NAME.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::HttpStatus {
                source_name: SOURCE_NAME.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.text().await.map_err(|e| SourceError::Request {
            source_name: SOURCE_NAME.to_string(),
            message: format!("failed to read body: {e}"),
        })?;

        parse_atom_response(&body)
    }
}

fn is_retryable(err: &SourceError) -> bool {
    match err {
        SourceError::Request { .. } => true,
        SourceError::HttpStatus { status, .. } => *status >= 500 || *status == 429,
        _ => false,
    }
}

#[async_trait]
impl ArxivApi for ArxivApiClient {
    async fn search(&self, request: &QueryRequest) -> Result<QueryPage, SourceError> {
        let url = build_search_url(&self.base_url, request);
        tracing::debug!(url = %url, "arXiv API request");

        let mut attempt = 1;
        loop {
            match self.search_once(&url).await {
                Ok(page) => return Ok(page),
                Err(e) if attempt < MAX_ATTEMPTS && is_retryable(&e) => {
                    tracing::warn!(attempt, error = %e, "arXiv API request failed, retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

// ── Query building ────────────────────────────────────────────

/// Build the search expression: category, author disjunction and a
/// submission-date lower bound.
pub fn build_query(category: &str, authors: &[String], since: DateTime<Utc>) -> String {
    let authors_query = authors
        .iter()
        .map(|a| format!("au:\"{}\"", a))
        .collect::<Vec<_>>()
        .join(" OR ");
    format!(
        "cat:{} AND ({}) AND submittedDate:[{} TO 99999999]",
        category,
        authors_query,
        since.format("%Y%m%d%H%M%S")
    )
}

/// Build the API URL for one page request.
pub fn build_search_url(base_url: &str, request: &QueryRequest) -> String {
    format!(
        "{}?search_query={}&start={}&max_results={}&sortBy={}&sortOrder={}",
        base_url,
        urlencoding::encode(&request.search_query),
        request.start,
        request.max_results,
        SORT_BY,
        SORT_ORDER,
    )
}

// ── Atom parsing ──────────────────────────────────────────────

/// Parse the Atom XML response from the arXiv API.
pub fn parse_atom_response(xml: &str) -> Result<QueryPage, SourceError> {
    let doc = read_document(xml, "entry");
    let parse_error = |message: String| SourceError::Parse {
        source_name: SOURCE_NAME.to_string(),
        message,
    };

    if doc.root.as_deref() != Some("feed") {
        return Err(parse_error("response is not an Atom feed".to_string()));
    }
    if let Some(error) = doc.error {
        return Err(parse_error(error));
    }

    // The API reports malformed queries as a single entry titled "Error".
    if let [only] = doc.records.as_slice()
        && only.text("title") == Some("Error")
    {
        let message = only.text("summary").unwrap_or_default();
        return Err(parse_error(format!("API error: {}", message)));
    }

    let total_results = doc
        .top
        .text("feed/opensearch:totalResults")
        .and_then(|s| s.parse().ok())
        .unwrap_or(doc.records.len());

    let records = doc.records.iter().map(parse_entry).collect();
    Ok(QueryPage {
        records,
        total_results,
    })
}

fn parse_entry(entry: &Record) -> QueryRecord {
    let pdf_url = entry
        .elements("link")
        .find(|link| link.attr("title") == Some("pdf") || link.attr("type") == Some("application/pdf"))
        .and_then(|link| link.attr("href"))
        .map(str::to_string);

    QueryRecord {
        entry_id: entry.text("id").unwrap_or_default().to_string(),
        title: normalize_whitespace(entry.text("title").unwrap_or_default()),
        authors: entry.texts("author/name").map(normalize_whitespace).collect(),
        published: entry.text("published").unwrap_or_default().to_string(),
        summary: entry.text("summary").unwrap_or_default().to_string(),
        pdf_url,
        journal_ref: entry.text("arxiv:journal_ref").map(normalize_whitespace),
    }
}

/// Normalize a raw API record into a [`Paper`].
pub fn normalize_record(record: &QueryRecord) -> Result<Paper, DroppedEntry> {
    if record.entry_id.is_empty() {
        return Err(DroppedEntry::new(None, "missing entry id"));
    }
    let id = record.entry_id.clone();
    let published = DateTime::parse_from_rfc3339(record.published.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            DroppedEntry::new(
                Some(&id),
                format!("unparseable published date '{}': {}", record.published, e),
            )
        })?;

    let short_id = short_id_from_url(&id);
    Ok(Paper {
        title: record.title.trim().to_string(),
        authors: record.authors.clone(),
        published,
        summary: normalize_whitespace(&record.summary),
        link: id.clone(),
        pdf_link: record
            .pdf_url
            .clone()
            .unwrap_or_else(|| pdf_link_for(&short_id)),
        journal_ref: record.journal_ref.clone().filter(|j| !j.is_empty()),
        announce_type: Some(AnnounceType::ApiNew),
        id,
    })
}

// ── Adapter ───────────────────────────────────────────────────

/// Source adapter over the query API.
pub struct QueryAdapter {
    api: Arc<dyn ArxivApi>,
    category: String,
    authors: Vec<String>,
    max_results: usize,
    page_size: usize,
}

impl QueryAdapter {
    pub fn new(
        api: Arc<dyn ArxivApi>,
        category: impl Into<String>,
        authors: Vec<String>,
        max_results: usize,
    ) -> Self {
        Self {
            api,
            category: category.into(),
            authors,
            max_results,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    async fn collect_records(&self, query: &str) -> Result<Vec<QueryRecord>, SourceError> {
        let mut records = Vec::new();
        while records.len() < self.max_results {
            let request = QueryRequest {
                search_query: query.to_string(),
                start: records.len(),
                max_results: self.page_size.min(self.max_results - records.len()),
            };
            let page = self.api.search(&request).await?;
            let received = page.records.len();
            records.extend(page.records);
            if received < request.max_results || records.len() >= page.total_results {
                break;
            }
        }
        records.truncate(self.max_results);
        Ok(records)
    }
}

#[async_trait]
impl SourceAdapter for QueryAdapter {
    fn source(&self) -> Source {
        Source::Query
    }

    async fn fetch(&self, since: Option<DateTime<Utc>>) -> FetchBatch {
        let since = since.unwrap_or_else(|| Utc::now() - chrono::Duration::days(1));
        let query = build_query(&self.category, &self.authors, since);
        tracing::info!(query = %query, "Querying arXiv API");

        let records = match self.collect_records(&query).await {
            Ok(records) => records,
            Err(e) => {
                tracing::error!(error = %e, "arXiv API search failed");
                return FetchBatch::failed(e.to_string());
            }
        };
        tracing::info!(count = records.len(), "arXiv API returned results");

        let mut papers = Vec::new();
        let mut dropped = Vec::new();
        for record in &records {
            match normalize_record(record) {
                // The server-side bound is inclusive; keep the same rule locally.
                Ok(paper) if paper.published < since => {
                    tracing::debug!(id = %paper.id, "Skipping paper older than watermark");
                }
                Ok(paper) => papers.push(paper),
                Err(d) => {
                    tracing::warn!(entry = ?d.entry_id, reason = %d.reason, "Dropping API record");
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
    use std::sync::Mutex;

    const SAMPLE_FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom"
      xmlns:opensearch="http://a9.com/-/spec/opensearch/1.1/"
      xmlns:arxiv="http://arxiv.org/schemas/atom">
  <title>ArXiv Query</title>
  <opensearch:totalResults>2</opensearch:totalResults>
  <opensearch:startIndex>0</opensearch:startIndex>
  <opensearch:itemsPerPage>2</opensearch:itemsPerPage>
  <entry>
    <id>http://arxiv.org/abs/2410.01234v1</id>
    <updated>2024-10-02T17:57:34Z</updated>
    <published>2024-10-02T17:57:34Z</published>
    <title>Quantum Memories
      in Practice</title>
    <summary>  We study quantum
memories.  </summary>
    <author><name>Alice Smith</name></author>
    <author><name>Bob Jones</name></author>
    <arxiv:journal_ref xmlns:arxiv="http://arxiv.org/schemas/atom">Phys. Rev. A 110, 012345</arxiv:journal_ref>
    <link href="http://arxiv.org/abs/2410.01234v1" rel="alternate" type="text/html"/>
    <link href="http://arxiv.org/pdf/2410.01234v1" title="pdf" type="application/pdf"/>
    <category term="quant-ph"/>
  </entry>
  <entry>
    <id>http://arxiv.org/abs/2410.05678v2</id>
    <published>2024-10-03T08:00:00Z</published>
    <title>Second Paper</title>
    <summary>Another.</summary>
    <author><name>Alice Smith</name></author>
  </entry>
</feed>"#;

    fn record(id: &str, published: &str) -> QueryRecord {
        QueryRecord {
            entry_id: format!("http://arxiv.org/abs/{}", id),
            title: format!("Paper {}", id),
            authors: vec!["Alice Smith".into()],
            published: published.into(),
            summary: "Summary".into(),
            ..Default::default()
        }
    }

    /// Serves fixed records, honoring `start`/`max_results` like the real API.
    struct MockApi {
        records: Vec<QueryRecord>,
        requests: Mutex<Vec<QueryRequest>>,
        fail: bool,
    }

    impl MockApi {
        fn new(records: Vec<QueryRecord>) -> Self {
            Self {
                records,
                requests: Mutex::new(Vec::new()),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::new(Vec::new())
            }
        }
    }

    #[async_trait]
    impl ArxivApi for MockApi {
        async fn search(&self, request: &QueryRequest) -> Result<QueryPage, SourceError> {
            self.requests.lock().unwrap().push(request.clone());
            if self.fail {
                return Err(SourceError::HttpStatus {
                    source_name: SOURCE_NAME.into(),
                    status: 503,
                });
            }
            let records = self
                .records
                .iter()
                .skip(request.start)
                .take(request.max_results)
                .cloned()
                .collect();
            Ok(QueryPage {
                records,
                total_results: self.records.len(),
            })
        }
    }

    #[test]
    fn test_build_query() {
        let since = Utc.with_ymd_and_hms(2024, 10, 1, 12, 30, 5).unwrap();
        let q = build_query(
            "quant-ph",
            &["Alice Smith".to_string(), "Bob Jones".to_string()],
            since,
        );
        assert_eq!(
            q,
            "cat:quant-ph AND (au:\"Alice Smith\" OR au:\"Bob Jones\") AND submittedDate:[20241001123005 TO 99999999]"
        );
    }

    #[test]
    fn test_build_search_url_sorting() {
        let request = QueryRequest {
            search_query: "cat:quant-ph".into(),
            start: 100,
            max_results: 50,
        };
        let url = build_search_url(ARXIV_API_BASE, &request);
        assert!(url.starts_with(ARXIV_API_BASE));
        assert!(url.contains("search_query=cat%3Aquant-ph"));
        assert!(url.contains("start=100"));
        assert!(url.contains("max_results=50"));
        assert!(url.contains("sortBy=submittedDate"));
        assert!(url.contains("sortOrder=ascending"));
    }

    #[test]
    fn test_parse_atom_response() {
        let page = parse_atom_response(SAMPLE_FEED).unwrap();
        assert_eq!(page.total_results, 2);
        assert_eq!(page.records.len(), 2);
        let first = &page.records[0];
        assert_eq!(first.entry_id, "http://arxiv.org/abs/2410.01234v1");
        assert_eq!(first.title, "Quantum Memories in Practice");
        assert_eq!(first.authors, vec!["Alice Smith", "Bob Jones"]);
        assert_eq!(first.journal_ref.as_deref(), Some("Phys. Rev. A 110, 012345"));
        assert_eq!(
            first.pdf_url.as_deref(),
            Some("http://arxiv.org/pdf/2410.01234v1")
        );
        assert!(page.records[1].journal_ref.is_none());
    }

    #[test]
    fn test_parse_single_quoted_pdf_link_and_escaped_title() {
        let xml = r#"<feed xmlns="http://www.w3.org/2005/Atom">
  <entry>
    <id>http://arxiv.org/abs/2410.07777v1</id>
    <published>2024-10-02T00:00:00Z</published>
    <title>Bounds for 5 &lt; n</title>
    <summary><![CDATA[Shows 5 &lt; 6.]]></summary>
    <link href='http://arxiv.org/pdf/2410.07777v1' title='pdf' type='application/pdf'/>
  </entry>
</feed>"#;
        let page = parse_atom_response(xml).unwrap();
        let record = &page.records[0];
        assert_eq!(record.title, "Bounds for 5 < n");
        assert_eq!(record.summary, "Shows 5 &lt; 6.");
        assert_eq!(record.pdf_url.as_deref(), Some("http://arxiv.org/pdf/2410.07777v1"));
        assert_eq!(page.total_results, 1);
    }

    #[test]
    fn test_parse_truncated_response_is_error() {
        let xml = "<feed><entry><id>http://arxiv.org/abs/1</id></entry><entry><title>cut";
        assert!(parse_atom_response(xml).is_err());
    }

    #[test]
    fn test_parse_api_error_entry() {
        let xml = r#"<feed><entry><id>http://arxiv.org/api/errors</id>
            <title>Error</title><summary>malformed query</summary></entry></feed>"#;
        let err = parse_atom_response(xml).unwrap_err();
        assert!(err.to_string().contains("malformed query"));
    }

    #[test]
    fn test_parse_non_feed_is_error() {
        assert!(parse_atom_response("<html>rate limited</html>").is_err());
    }

    #[test]
    fn test_normalize_record() {
        let page = parse_atom_response(SAMPLE_FEED).unwrap();
        let paper = normalize_record(&page.records[0]).unwrap();
        assert_eq!(paper.id, "http://arxiv.org/abs/2410.01234v1");
        assert_eq!(paper.link, paper.id);
        assert_eq!(paper.pdf_link, "http://arxiv.org/pdf/2410.01234v1");
        assert_eq!(paper.summary, "We study quantum memories.");
        assert_eq!(paper.announce_type, Some(AnnounceType::ApiNew));
        assert_eq!(
            paper.published,
            Utc.with_ymd_and_hms(2024, 10, 2, 17, 57, 34).unwrap()
        );
    }

    #[test]
    fn test_normalize_record_derives_pdf_link() {
        let paper = normalize_record(&record("2410.00009v1", "2024-10-01T00:00:00Z")).unwrap();
        assert_eq!(paper.pdf_link, "https://arxiv.org/pdf/2410.00009v1");
    }

    #[test]
    fn test_normalize_record_bad_date_is_dropped() {
        let dropped = normalize_record(&record("2410.00001", "yesterday")).unwrap_err();
        assert_eq!(
            dropped.entry_id.as_deref(),
            Some("http://arxiv.org/abs/2410.00001")
        );
        assert!(dropped.reason.contains("yesterday"));
    }

    #[tokio::test]
    async fn test_adapter_paginates_up_to_max_results() {
        let records: Vec<_> = (0..7)
            .map(|i| record(&format!("2410.0000{i}"), &format!("2024-10-0{}T00:00:00Z", i + 1)))
            .collect();
        let api = Arc::new(MockApi::new(records));
        let adapter = QueryAdapter::new(api.clone(), "quant-ph", vec!["Alice Smith".into()], 5)
            .with_page_size(2);
        let since = Utc.with_ymd_and_hms(2024, 9, 1, 0, 0, 0).unwrap();

        let batch = adapter.fetch(Some(since)).await;
        assert!(!batch.is_failed());
        assert_eq!(batch.papers.len(), 5);

        let requests = api.requests.lock().unwrap();
        let starts: Vec<_> = requests.iter().map(|r| (r.start, r.max_results)).collect();
        assert_eq!(starts, vec![(0, 2), (2, 2), (4, 1)]);
    }

    #[tokio::test]
    async fn test_adapter_stops_on_short_page() {
        let records = vec![record("2410.00001", "2024-10-01T00:00:00Z")];
        let api = Arc::new(MockApi::new(records));
        let adapter = QueryAdapter::new(api.clone(), "quant-ph", vec!["Alice Smith".into()], 50);

        let batch = adapter.fetch(None).await;
        assert_eq!(api.requests.lock().unwrap().len(), 1);
        // Default watermark is "yesterday", so a 2024 paper is excluded.
        assert!(batch.papers.is_empty());
    }

    #[tokio::test]
    async fn test_adapter_failure_yields_failed_batch() {
        let adapter = QueryAdapter::new(Arc::new(MockApi::failing()), "quant-ph", vec![], 10);
        let batch = adapter.fetch(None).await;
        assert!(batch.is_failed());
        assert!(batch.papers.is_empty());
    }

    #[tokio::test]
    async fn test_adapter_excludes_papers_before_watermark() {
        let records = vec![
            record("2410.00001", "2024-10-01T00:00:00Z"),
            record("2410.00002", "2024-10-02T00:00:00Z"),
        ];
        let adapter = QueryAdapter::new(Arc::new(MockApi::new(records)), "quant-ph", vec![], 10);
        let since = Utc.with_ymd_and_hms(2024, 10, 1, 0, 0, 1).unwrap();
        let batch = adapter.fetch(Some(since)).await;
        assert_eq!(batch.papers.len(), 1);
        assert_eq!(batch.papers[0].id, "http://arxiv.org/abs/2410.00002");
    }

    #[tokio::test]
    #[ignore = "requires network access"]
    async fn test_real_query() {
        let client = Arc::new(ArxivApiClient::new().unwrap());
        let adapter = QueryAdapter::new(client, "quant-ph", vec!["Mauro Paternostro".into()], 5);
        let since = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        let batch = adapter.fetch(Some(since)).await;
        assert!(!batch.is_failed());
    }
}
