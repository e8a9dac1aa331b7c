//! Filter criteria validation.
//!
//! Stateless gate in front of filter creation: a keyword list is mandatory,
//! and every non-empty field must carry at least three letters so a filter
//! can never select most of the firehose.

use super::matcher::split_terms;
use crate::domain::error::ValidationError;
use crate::domain::types::FilterOptions;

/// Minimum number of letters per non-empty field and per keyword term.
const MIN_LETTERS: usize = 3;

/// Check criteria against the creation rules.
pub fn validate_options(options: &FilterOptions) -> Result<(), ValidationError> {
    if options.keyword.is_empty() {
        return Err(ValidationError::KeywordRequired);
    }

    if !options.repository.is_empty() && count_letters(&options.repository) < MIN_LETTERS {
        return Err(ValidationError::RepositoryTooShort);
    }

    if !options.path_prefix.is_empty() && count_letters(&options.path_prefix) < MIN_LETTERS {
        return Err(ValidationError::PathPrefixTooShort);
    }

    for term in split_terms(&options.keyword) {
        if count_letters(term) < MIN_LETTERS {
            return Err(ValidationError::KeywordTooShort(term.to_string()));
        }
    }

    Ok(())
}

/// Unicode-letter code points in `s`. Digits, punctuation, and whitespace
/// don't count.
fn count_letters(s: &str) -> usize {
    s.chars().filter(|c| c.is_alphabetic()).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(repository: &str, path_prefix: &str, keyword: &str) -> FilterOptions {
        FilterOptions {
            repository: repository.into(),
            path_prefix: path_prefix.into(),
            keyword: keyword.into(),
        }
    }

    #[test]
    fn keyword_is_required() {
        assert_eq!(
            validate_options(&options("did:plc:abc", "", "")),
            Err(ValidationError::KeywordRequired)
        );
        assert_eq!(
            validate_options(&FilterOptions::default()),
            Err(ValidationError::KeywordRequired)
        );
    }

    #[test]
    fn valid_options_pass() {
        assert!(validate_options(&options("", "", "rust")).is_ok());
        assert!(validate_options(&options("did:plc:abc", "app.bsky.feed.post", "cats,dogs")).is_ok());
    }

    #[test]
    fn each_term_needs_three_letters() {
        assert_eq!(
            validate_options(&options("", "", "cats, ab ,dogs")),
            Err(ValidationError::KeywordTooShort("ab".into()))
        );
        // Digits and punctuation don't count as letters.
        assert_eq!(
            validate_options(&options("", "", "a1.2b")),
            Err(ValidationError::KeywordTooShort("a1.2b".into()))
        );
    }

    #[test]
    fn non_empty_fields_need_three_letters() {
        assert_eq!(
            validate_options(&options("d:1", "", "rust")),
            Err(ValidationError::RepositoryTooShort)
        );
        assert_eq!(
            validate_options(&options("", "a.b", "rust")),
            Err(ValidationError::PathPrefixTooShort)
        );
    }

    #[test]
    fn letters_are_unicode() {
        // Three Cyrillic letters qualify.
        assert!(validate_options(&options("", "", "мир")).is_ok());
    }
}
