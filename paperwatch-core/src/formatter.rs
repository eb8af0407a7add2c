//! Renders a paper into Discord message text.
//!
//! The standard message is tried with a ladder of author renderings, most
//! detailed first. The first rendering that fits the length limit wins; if
//! none fits the paper is reported as unformattable.

use std::collections::HashMap;

use crate::error::FormatError;
use crate::matcher::NameMatcher;
use crate::paper::{AnnounceType, Paper};
use crate::sources::Source;

/// Abstracts longer than this many characters are cut.
pub const MAX_SUMMARY_LEN: usize = 1400;
pub const TRUNCATION_MARKER: &str = "... [truncated]";
/// Discord's per-message limit.
pub const MAX_MESSAGE_LEN: usize = 2000;

const NO_MATCH_LABEL: &str = "tracked authors";

/// How the full author list is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorRendering {
    FullAuthors,
    /// `<first author> et al.`
    EtAl,
}

/// Renderings tried in order.
pub const DEGRADATION_LADDER: [AuthorRendering; 2] =
    [AuthorRendering::FullAuthors, AuthorRendering::EtAl];

/// Join names as `A`, `A and B`, or `A, B, and C`.
pub fn join_names(names: &[String]) -> String {
    match names {
        [] => String::new(),
        [only] => only.clone(),
        [a, b] => format!("{a} and {b}"),
        [rest @ .., last] => format!("{}, and {}", rest.join(", "), last),
    }
}

/// Cut `summary` to [`MAX_SUMMARY_LEN`] characters, marking the cut.
pub fn truncate_summary(summary: &str) -> String {
    match summary.char_indices().nth(MAX_SUMMARY_LEN) {
        Some((byte_idx, _)) => format!("{}{}", &summary[..byte_idx], TRUNCATION_MARKER),
        None => summary.to_string(),
    }
}

pub struct MessageFormatter {
    matcher: NameMatcher,
    discord_ids: HashMap<String, u64>,
    source: Source,
    max_len: usize,
}

impl MessageFormatter {
    pub fn new(matcher: NameMatcher, source: Source) -> Self {
        Self {
            matcher,
            discord_ids: HashMap::new(),
            source,
            max_len: MAX_MESSAGE_LEN,
        }
    }

    /// Watch-list name → Discord user id, used to mention matched authors.
    pub fn with_discord_ids(mut self, ids: HashMap<String, u64>) -> Self {
        self.discord_ids = ids;
        self
    }

    pub fn with_max_length(mut self, max_len: usize) -> Self {
        self.max_len = max_len;
        self
    }

    /// Headline naming the watched authors on the paper, as mentions where
    /// an id is known. Lookup is by the exact watch-list spelling.
    pub fn target_authors(&self, paper: &Paper) -> String {
        let matched = self.matcher.ordered_matches(&paper.authors);
        if matched.is_empty() {
            return NO_MATCH_LABEL.to_string();
        }
        let tagged: Vec<String> = matched
            .into_iter()
            .map(|name| match self.discord_ids.get(&name) {
                Some(id) => format!("<@{id}>"),
                None => name,
            })
            .collect();
        join_names(&tagged)
    }

    pub fn format(&self, paper: &Paper) -> Result<String, FormatError> {
        let targets = self.target_authors(paper);

        if self.is_publication_notice(paper) {
            let message = self.render_publication_notice(paper, &targets);
            return self.check_length(message);
        }

        let summary = truncate_summary(&paper.summary);
        let mut shortest = 0;
        for rendering in DEGRADATION_LADDER {
            let message = self.render_standard(paper, &targets, &summary, rendering);
            let length = message.chars().count();
            if length <= self.max_len {
                return Ok(message);
            }
            tracing::info!(
                id = %paper.id,
                length,
                rendering = ?rendering,
                "Message too long, degrading"
            );
            shortest = length;
        }
        Err(FormatError::TooLong {
            length: shortest,
            limit: self.max_len,
        })
    }

    fn is_publication_notice(&self, paper: &Paper) -> bool {
        self.source == Source::Feed
            && paper.announce_type == Some(AnnounceType::Replace)
            && paper.journal_ref.is_some()
    }

    fn render_publication_notice(&self, paper: &Paper, targets: &str) -> String {
        format!(
            "📄 **Update to paper by {targets}**:\n\
             The arXiv paper <{link}> was published! Cheers! 🥂🍾\n\
             **New journal reference:** {journal}",
            link = paper.link,
            journal = paper.journal_ref.as_deref().unwrap_or_default(),
        )
    }

    fn render_standard(
        &self,
        paper: &Paper,
        targets: &str,
        summary: &str,
        rendering: AuthorRendering,
    ) -> String {
        let authors = match rendering {
            AuthorRendering::FullAuthors => paper.authors.join(", "),
            AuthorRendering::EtAl => {
                format!("{} et al.", paper.first_author().unwrap_or("Unknown"))
            }
        };
        let journal_line = paper
            .journal_ref
            .as_deref()
            .map(|j| format!("**Journal Reference:** {j}\n"))
            .unwrap_or_default();

        format!(
            "📄 **New paper by {targets}**:\n\
             **Title:** {title}\n\
             **Authors:** {authors}\n\
             **Announced:** {date}\n\
             **Abstract:** {summary}\n\
             {journal_line}\
             🔗 <{link}>",
            title = paper.title,
            date = paper.published.format("%Y-%m-%d"),
            link = paper.link,
        )
    }

    fn check_length(&self, message: String) -> Result<String, FormatError> {
        let length = message.chars().count();
        if length > self.max_len {
            return Err(FormatError::TooLong {
                length,
                limit: self.max_len,
            });
        }
        Ok(message)
    }
}
