//! The normalized paper record shared by every source.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Announcement tag carried by a paper.
///
/// The feed distinguishes brand-new submissions from replacements of an
/// existing paper; query results are tagged `ApiNew`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnounceType {
    New,
    Replace,
    ApiNew,
    Other(String),
}

/// Marker used when a feed entry carries no announce type at all.
pub const UNKNOWN_FEED_ANNOUNCE_TYPE: &str = "rss_unknown";

impl AnnounceType {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "new" => Self::New,
            "replace" => Self::Replace,
            "api_new" => Self::ApiNew,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::New => "new",
            Self::Replace => "replace",
            Self::ApiNew => "api_new",
            Self::Other(s) => s,
        }
    }
}

impl std::fmt::Display for AnnounceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A paper normalized from either source.
///
/// `id` is the canonical abstract URL and the only deduplication key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paper {
    pub id: String,
    pub title: String,
    pub authors: Vec<String>,
    pub published: DateTime<Utc>,
    pub summary: String,
    pub link: String,
    pub pdf_link: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub journal_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub announce_type: Option<AnnounceType>,
}

impl Paper {
    pub fn first_author(&self) -> Option<&str> {
        self.authors.first().map(String::as_str)
    }
}

/// Extract the short arXiv identifier from an abstract or PDF URL,
/// e.g. `http://arxiv.org/abs/2401.01234v2` → `2401.01234v2`.
pub fn short_id_from_url(url: &str) -> String {
    if let Some(pos) = url.rfind("/abs/") {
        url[pos + 5..].to_string()
    } else if let Some(pos) = url.rfind("/pdf/") {
        url[pos + 5..].trim_end_matches(".pdf").to_string()
    } else if let Some(rest) = url.strip_prefix("oai:arXiv.org:") {
        rest.to_string()
    } else {
        url.to_string()
    }
}

/// Build the PDF link for a short arXiv identifier.
pub fn pdf_link_for(short_id: &str) -> String {
    format!("https://arxiv.org/pdf/{}", short_id)
}

/// Collapse runs of whitespace (including newlines) into single spaces.
pub fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_id_from_url() {
        assert_eq!(
            short_id_from_url("http://arxiv.org/abs/1706.03762v7"),
            "1706.03762v7"
        );
        assert_eq!(
            short_id_from_url("https://arxiv.org/pdf/2301.12345.pdf"),
            "2301.12345"
        );
        assert_eq!(short_id_from_url("oai:arXiv.org:2410.01234v1"), "2410.01234v1");
        assert_eq!(short_id_from_url("2301.12345"), "2301.12345");
    }

    #[test]
    fn test_short_id_old_style() {
        assert_eq!(
            short_id_from_url("http://arxiv.org/abs/quant-ph/0101001v1"),
            "quant-ph/0101001v1"
        );
    }

    #[test]
    fn test_announce_type_parse() {
        assert_eq!(AnnounceType::parse("new"), AnnounceType::New);
        assert_eq!(AnnounceType::parse(" Replace "), AnnounceType::Replace);
        assert_eq!(AnnounceType::parse("api_new"), AnnounceType::ApiNew);
        assert_eq!(
            AnnounceType::parse("cross"),
            AnnounceType::Other("cross".into())
        );
    }

    #[test]
    fn test_normalize_whitespace() {
        assert_eq!(
            normalize_whitespace("  Hello   World\n  Test  "),
            "Hello World Test"
        );
    }
}
