//! Watch-list matching between a paper's authors and tracked names.
//!
//! Matching is exact and case-insensitive: `"alice smith"` matches
//! `"Alice Smith"`, but `"Smith"` never matches `"Alice Smith"`.

use std::collections::HashSet;

/// Matches paper author lists against a configured watch-list.
#[derive(Debug, Clone, Default)]
pub struct NameMatcher {
    watch_list: Vec<String>,
    folded: HashSet<String>,
}

fn fold(name: &str) -> String {
    name.trim().to_lowercase()
}

impl NameMatcher {
    pub fn new<I, S>(watch_list: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let watch_list: Vec<String> = watch_list.into_iter().map(Into::into).collect();
        let folded = watch_list.iter().map(|n| fold(n)).collect();
        Self { watch_list, folded }
    }

    /// True when at least one watch-list name equals one of `authors`.
    pub fn matches(&self, authors: &[String]) -> bool {
        authors.iter().any(|a| self.folded.contains(&fold(a)))
    }

    /// Watch-list names found in `authors`, in watch-list order, with a name
    /// matching the first author moved to the front.
    pub fn ordered_matches(&self, authors: &[String]) -> Vec<String> {
        let paper_authors: HashSet<String> = authors.iter().map(|a| fold(a)).collect();
        let mut matched: Vec<String> = self
            .watch_list
            .iter()
            .filter(|name| paper_authors.contains(&fold(name)))
            .cloned()
            .collect();

        if let Some(first) = authors.first() {
            let first = fold(first);
            if let Some(pos) = matched.iter().position(|m| fold(m) == first) {
                let lead = matched.remove(pos);
                matched.insert(0, lead);
            }
        }
        matched
    }
}

/// Free-function form of [`NameMatcher::matches`].
pub fn matches(authors: &[String], watch_list: &[String]) -> bool {
    NameMatcher::new(watch_list.iter().cloned()).matches(authors)
}
