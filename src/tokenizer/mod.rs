use std::collections::HashSet;
use std::sync::Arc;

use moka::sync::Cache;
use once_cell::sync::Lazy;

/// Words carrying no search signal, filtered from every token stream.
static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "the", "and", "for", "but", "with", "from", "this", "that", "into", "when", "what", "how",
        "why", "does", "are", "was", "our", "your", "their", "then", "where", "can", "will",
        "should", "would", "could", "is", "an", "of", "to", "in", "on", "at", "by", "it", "as",
        "be", "or", "not",
    ]
    .into_iter()
    .collect()
});

const IDENTIFIER_CACHE_SIZE: u64 = 10_000;

#[derive(Clone, Copy, PartialEq, Eq)]
enum CharClass {
    Ascii,
    Hangul,
    Kana,
    Han,
    Other,
}

fn classify(c: char) -> CharClass {
    match c {
        'a'..='z' | 'A'..='Z' | '0'..='9' | '_' | '-' => CharClass::Ascii,
        '\u{AC00}'..='\u{D7A3}' | '\u{1100}'..='\u{11FF}' | '\u{3130}'..='\u{318F}' => {
            CharClass::Hangul
        }
        '\u{3040}'..='\u{309F}' | '\u{30A0}'..='\u{30FF}' => CharClass::Kana,
        '\u{4E00}'..='\u{9FFF}' => CharClass::Han,
        _ => CharClass::Other,
    }
}

/// Split a bare identifier into its constituent words.
///
/// Handles snake_case, SCREAMING_SNAKE, kebab-case, camelCase and PascalCase,
/// including acronym runs: `HTTPServer` -> `["http", "server"]`. An acronym
/// run directly followed by a digit decomposes into single letters, which the
/// length filter then discards.
pub fn split_identifier(identifier: &str) -> Vec<String> {
    if identifier.is_empty() {
        return Vec::new();
    }

    if identifier.contains('_') {
        return identifier
            .split('_')
            .filter(|p| !p.is_empty())
            .map(|p| p.to_lowercase())
            .collect();
    }
    if identifier.contains('-') {
        return identifier
            .split('-')
            .filter(|p| !p.is_empty())
            .map(|p| p.to_lowercase())
            .collect();
    }

    split_camel(identifier)
}

fn split_camel(word: &str) -> Vec<String> {
    let chars: Vec<char> = word.chars().collect();
    let mut parts: Vec<String> = Vec::new();
    let mut i = 0usize;

    while i < chars.len() {
        let c = chars[i];

        if c.is_ascii_lowercase() {
            let start = i;
            while i < chars.len() && chars[i].is_ascii_lowercase() {
                i += 1;
            }
            parts.push(chars[start..i].iter().collect());
        } else if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
            parts.push(chars[start..i].iter().collect());
        } else if c.is_ascii_uppercase() {
            let start = i;
            while i < chars.len() && chars[i].is_ascii_uppercase() {
                i += 1;
            }
            let followed_by_lower = i < chars.len() && chars[i].is_ascii_lowercase();
            let followed_by_digit = i < chars.len() && chars[i].is_ascii_digit();

            if followed_by_lower && i - start > 1 {
                // HTTPServer: the trailing capital opens the next word.
                parts.push(chars[start..i - 1].iter().collect::<String>().to_lowercase());
                let word_start = i - 1;
                while i < chars.len() && chars[i].is_ascii_lowercase() {
                    i += 1;
                }
                parts.push(chars[word_start..i].iter().collect::<String>().to_lowercase());
            } else if followed_by_lower {
                let word_start = start;
                while i < chars.len() && chars[i].is_ascii_lowercase() {
                    i += 1;
                }
                parts.push(chars[word_start..i].iter().collect::<String>().to_lowercase());
            } else if followed_by_digit && i - start > 1 {
                for c in &chars[start..i] {
                    parts.push(c.to_lowercase().to_string());
                }
            } else {
                parts.push(chars[start..i].iter().collect::<String>().to_lowercase());
            }
        } else {
            i += 1;
        }
    }

    parts
}

/// Code-aware tokenizer with bounded memoization.
///
/// Owned by a project context rather than a process-wide singleton, so two
/// concurrently indexed projects never share mutable state.
#[derive(Clone)]
pub struct CodeTokenizer {
    cache: Cache<String, Arc<Vec<String>>>,
}

impl Default for CodeTokenizer {
    fn default() -> Self {
        Self::new()
    }
}

impl CodeTokenizer {
    pub fn new() -> Self {
        Self {
            cache: Cache::new(IDENTIFIER_CACHE_SIZE),
        }
    }

    /// Tokenize text into lowercase search tokens.
    ///
    /// ASCII identifier runs are split by format (camelCase, snake_case,
    /// kebab-case); CJK runs are preserved whole. Single-character ASCII
    /// tokens and stopwords are dropped; single CJK characters are kept.
    pub fn tokenize(&self, text: &str) -> Arc<Vec<String>> {
        if let Some(cached) = self.cache.get(text) {
            return cached;
        }
        let tokens = Arc::new(tokenize_uncached(text));
        self.cache.insert(text.to_string(), Arc::clone(&tokens));
        tokens
    }

    /// Token set for name/query comparison in boosting.
    pub fn token_set(&self, text: &str) -> HashSet<String> {
        self.tokenize(text).iter().cloned().collect()
    }
}

fn tokenize_uncached(text: &str) -> Vec<String> {
    let mut tokens: Vec<String> = Vec::new();
    let mut run = String::new();
    let mut run_class = CharClass::Other;

    let flush = |run: &mut String, class: CharClass, tokens: &mut Vec<String>| {
        if run.is_empty() {
            return;
        }
        match class {
            CharClass::Ascii => tokens.extend(split_identifier(run)),
            CharClass::Hangul | CharClass::Kana | CharClass::Han => tokens.push(run.clone()),
            CharClass::Other => {}
        }
        run.clear();
    };

    for c in text.chars() {
        let class = classify(c);
        if class == CharClass::Other {
            flush(&mut run, run_class, &mut tokens);
            run_class = CharClass::Other;
            continue;
        }
        if class != run_class {
            flush(&mut run, run_class, &mut tokens);
            run_class = class;
        }
        run.push(c);
    }
    flush(&mut run, run_class, &mut tokens);

    tokens
        .into_iter()
        .filter(|t| {
            let first = t.chars().next().map(|c| (c as u32) < 128).unwrap_or(true);
            if first {
                t.len() >= 2 && !STOPWORDS.contains(t.as_str())
            } else {
                true
            }
        })
        .collect()
}
