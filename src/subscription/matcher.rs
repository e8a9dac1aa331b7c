//! Event-against-criteria matching.
//!
//! Pure functions: no locks, no I/O, safe to call from any number of
//! broadcast iterations at once.

use crate::domain::types::{CommitEvent, FilterOptions};
use serde_json::Value;
use std::collections::HashSet;

/// Decide whether an event is relevant to a filter.
pub fn matches(event: &CommitEvent, options: &FilterOptions) -> bool {
    // A filter with no criteria forwards nothing. Creation already rejects
    // these; this guards any other path that could clear the criteria.
    if options.is_empty() {
        return false;
    }

    if !options.repository.is_empty() && event.did != options.repository {
        return false;
    }

    if !options.path_prefix.is_empty()
        && !event
            .ops
            .iter()
            .any(|op| op.path.starts_with(&options.path_prefix))
    {
        return false;
    }

    if !options.keyword.is_empty()
        && !event
            .ops
            .iter()
            .any(|op| record_contains_keywords(op.record.as_ref(), &options.keyword))
    {
        return false;
    }

    true
}

/// Terms from the comma-separated `keywords` list that hit any op's
/// extractable text. Returned in list order, first occurrence only, in
/// their original (trimmed, case-preserved) form.
pub fn matching_terms<'a>(event: &CommitEvent, keywords: &'a str) -> Vec<&'a str> {
    let texts: Vec<String> = event
        .ops
        .iter()
        .filter_map(|op| op.record.as_ref())
        .filter_map(extract_text)
        .map(|t| t.to_lowercase())
        .collect();
    if texts.is_empty() {
        return Vec::new();
    }

    let mut seen = HashSet::new();
    let mut matched = Vec::new();
    for term in split_terms(keywords) {
        let lowered = term.to_lowercase();
        if seen.contains(&lowered) {
            continue;
        }
        if texts.iter().any(|t| t.contains(&lowered)) {
            seen.insert(lowered);
            matched.push(term);
        }
    }
    matched
}

/// The extractable text of a record: the first non-empty of `text`,
/// `message`, `content`. Non-structured records carry no text.
fn extract_text(record: &Value) -> Option<&str> {
    ["text", "message", "content"].iter().find_map(|field| {
        record
            .get(*field)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    })
}

fn record_contains_keywords(record: Option<&Value>, keywords: &str) -> bool {
    let Some(record) = record else {
        return false;
    };
    let Some(text) = extract_text(record) else {
        return false;
    };
    let text = text.to_lowercase();
    split_terms(keywords).any(|term| text.contains(&term.to_lowercase()))
}

/// Comma-split, whitespace-trimmed, empty terms discarded.
pub(crate) fn split_terms(keywords: &str) -> impl Iterator<Item = &str> {
    keywords.split(',').map(str::trim).filter(|t| !t.is_empty())
}
