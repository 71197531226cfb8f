use std::path::PathBuf;

use thiserror::Error;

/// Stable failure kinds surfaced to users and exit-code mapping.
///
/// Every user-visible failure carries one of these kinds, a one-sentence
/// message, and (where it helps) a remediation hint.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("failed to parse {path}: {reason}")]
    Parsing { path: PathBuf, reason: String },

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("storage operation failed: {0}")]
    Storage(String),

    #[error("project '{name}' not found")]
    ProjectNotFound {
        name: String,
        suggestions: Vec<String>,
    },

    #[error("query must not be empty")]
    EmptyQuery,

    #[error("search failed: {0}")]
    Search(String),

    #[error("indexing failed: {0}")]
    Indexing(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl CoreError {
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::Configuration(_) => "configuration",
            CoreError::Parsing { .. } => "parsing",
            CoreError::Embedding(_) => "embedding",
            CoreError::Storage(_) => "storage",
            CoreError::ProjectNotFound { .. } => "project_not_found",
            CoreError::EmptyQuery => "empty_query",
            CoreError::Search(_) => "search",
            CoreError::Indexing(_) => "indexing",
            CoreError::Cancelled => "cancelled",
            CoreError::Timeout { .. } => "timeout",
            CoreError::Unsupported(_) => "unsupported",
        }
    }

    /// CLI exit code: 1 for user errors, 2 for operational failures.
    pub fn exit_code(&self) -> u8 {
        match self {
            CoreError::Configuration(_)
            | CoreError::ProjectNotFound { .. }
            | CoreError::EmptyQuery
            | CoreError::Unsupported(_) => 1,
            _ => 2,
        }
    }

    pub fn remediation(&self) -> Option<String> {
        match self {
            CoreError::ProjectNotFound { suggestions, .. } if !suggestions.is_empty() => {
                Some(format!("did you mean: {}?", suggestions.join(", ")))
            }
            CoreError::ProjectNotFound { .. } => {
                Some("run `codecontext list-projects` to see indexed projects".to_string())
            }
            CoreError::EmptyQuery => Some("provide a non-empty search query".to_string()),
            CoreError::Configuration(_) => {
                Some("check .codecontext.toml and CODECONTEXT_* environment overrides".to_string())
            }
            _ => None,
        }
    }
}

/// Classic dynamic-programming edit distance, used for project-name hints.
pub fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(prev[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut prev, &mut current);
    }

    prev[b.len()]
}

/// Up to five closest candidates, ignoring far-off names.
pub fn closest_matches(name: &str, candidates: &[String]) -> Vec<String> {
    let mut scored: Vec<(usize, &String)> = candidates
        .iter()
        .map(|c| (edit_distance(name, c), c))
        .filter(|(d, c)| *d <= (c.len().max(name.len()) / 2).max(2))
        .collect();
    scored.sort_by_key(|(d, c)| (*d, (*c).clone()));
    scored.into_iter().take(5).map(|(_, c)| c.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_separate_user_and_operational_errors() {
        assert_eq!(CoreError::EmptyQuery.exit_code(), 1);
        assert_eq!(
            CoreError::Configuration("bad field".into()).exit_code(),
            1
        );
        assert_eq!(CoreError::Storage("io".into()).exit_code(), 2);
        assert_eq!(CoreError::Embedding("down".into()).exit_code(), 2);
        assert_eq!(CoreError::Cancelled.exit_code(), 2);
    }

    #[test]
    fn kinds_are_stable_strings() {
        assert_eq!(CoreError::EmptyQuery.kind(), "empty_query");
        assert_eq!(
            CoreError::ProjectNotFound {
                name: "x".into(),
                suggestions: vec![]
            }
            .kind(),
            "project_not_found"
        );
        assert_eq!(
            CoreError::Timeout {
                operation: "embed".into(),
                seconds: 30
            }
            .kind(),
            "timeout"
        );
    }

    #[test]
    fn edit_distance_basic_cases() {
        assert_eq!(edit_distance("", ""), 0);
        assert_eq!(edit_distance("abc", ""), 3);
        assert_eq!(edit_distance("kitten", "sitting"), 3);
        assert_eq!(edit_distance("order", "order"), 0);
    }

    #[test]
    fn closest_matches_returns_near_names_only() {
        let candidates = vec![
            "shop-backend".to_string(),
            "shop-frontend".to_string(),
            "totally-unrelated-name".to_string(),
        ];
        let matches = closest_matches("shop-backed", &candidates);
        assert!(matches.contains(&"shop-backend".to_string()));
        assert!(!matches.contains(&"totally-unrelated-name".to_string()));
    }

    #[test]
    fn closest_matches_caps_at_five() {
        let candidates: Vec<String> = (0..10).map(|i| format!("proj-{i}")).collect();
        let matches = closest_matches("proj-x", &candidates);
        assert!(matches.len() <= 5);
    }

    #[test]
    fn project_not_found_suggests_alternatives() {
        let err = CoreError::ProjectNotFound {
            name: "shoop".into(),
            suggestions: vec!["shop".into()],
        };
        let hint = err.remediation().unwrap();
        assert!(hint.contains("shop"));
    }
}
