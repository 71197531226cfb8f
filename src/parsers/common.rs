use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::{AstMetadata, CodeObject, ObjectType, Relationship};
use crate::parsers::{PendingReference, ReferenceKind};

static CALL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([A-Za-z_][A-Za-z0-9_]*)\s*\(").unwrap());

const CALL_KEYWORDS: &[&str] = &[
    "if", "for", "while", "switch", "when", "catch", "return", "throw", "new", "super", "assert",
    "function", "def", "fun", "match", "print", "println", "sizeof", "typeof", "await", "yield",
    "in", "not", "and", "or", "else", "elif", "do", "try", "with", "lambda", "constructor",
];

/// Branch-point keywords shared by the supported curly/indent languages.
const BRANCH_KEYWORDS: &[&str] = &[
    "if ", "if(", "for ", "for(", "while ", "while(", "case ", "catch ", "catch(", "elif ",
    "when ", "when(", "else if",
];

/// Complexity figures from raw text, the same way for every language:
/// cyclomatic counts branch points and boolean operators, cognitive adds a
/// nesting surcharge, and the rating follows thresholds 5/10/20/30/40.
pub fn compute_ast_metadata(content: &str, indent_based: bool) -> AstMetadata {
    let mut cyclomatic = 1u32;
    let mut cognitive = 0u32;
    let mut max_depth = 0u32;
    let mut lines_of_code = 0u32;

    let base_indent = content
        .lines()
        .find(|l| !l.trim().is_empty())
        .map(|l| leading_spaces(l))
        .unwrap_or(0);

    let mut brace_depth: i32 = 0;

    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        lines_of_code += 1;

        let depth = if indent_based {
            let indent = leading_spaces(line).saturating_sub(base_indent);
            (indent / 4) as u32
        } else {
            brace_depth.max(0) as u32
        };
        max_depth = max_depth.max(depth);

        let mut branches = 0u32;
        for keyword in BRANCH_KEYWORDS {
            branches += count_occurrences(trimmed, keyword) as u32;
        }
        branches += count_occurrences(trimmed, "&&") as u32;
        branches += count_occurrences(trimmed, "||") as u32;
        // Python spells its boolean operators out.
        if indent_based {
            branches += count_word(trimmed, "and") as u32;
            branches += count_word(trimmed, "or") as u32;
        }
        branches += count_occurrences(trimmed, "?:") as u32;

        cyclomatic += branches;
        cognitive += branches * (1 + depth);

        if !indent_based {
            for c in line.chars() {
                match c {
                    '{' => brace_depth += 1,
                    '}' => brace_depth -= 1,
                    _ => {}
                }
            }
        }
    }

    AstMetadata {
        cyclomatic_complexity: cyclomatic,
        cognitive_complexity: cognitive,
        nesting_depth: max_depth,
        lines_of_code,
        complexity_rating: rating(cyclomatic),
    }
}

fn rating(cyclomatic: u32) -> char {
    match cyclomatic {
        0..=5 => 'A',
        6..=10 => 'B',
        11..=20 => 'C',
        21..=30 => 'D',
        31..=40 => 'E',
        _ => 'F',
    }
}

fn leading_spaces(line: &str) -> usize {
    line.chars()
        .take_while(|c| *c == ' ' || *c == '\t')
        .map(|c| if c == '\t' { 4 } else { 1 })
        .sum()
}

fn count_occurrences(haystack: &str, needle: &str) -> usize {
    haystack.matches(needle).count()
}

fn count_word(haystack: &str, word: &str) -> usize {
    haystack
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|w| *w == word)
        .count()
}

/// Call sites inside a body: identifiers directly followed by `(`,
/// excluding control keywords and the object's own name.
pub fn collect_call_references(
    source_id: &str,
    body: &str,
    own_name: &str,
    first_line: usize,
) -> Vec<PendingReference> {
    let mut seen = std::collections::HashSet::new();
    let mut references = Vec::new();

    for (offset, line) in body.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.starts_with("//") || trimmed.starts_with('#') || trimmed.starts_with('*') {
            continue;
        }
        for capture in CALL_PATTERN.captures_iter(line) {
            let name = capture.get(1).map(|m| m.as_str()).unwrap_or_default();
            if name == own_name || CALL_KEYWORDS.contains(&name) || name.len() < 2 {
                continue;
            }
            if seen.insert(name.to_string()) {
                references.push(PendingReference {
                    source_id: source_id.to_string(),
                    name: name.to_string(),
                    kind: ReferenceKind::Call,
                    line: first_line + offset,
                });
            }
        }
    }

    references
}

/// CONTAINS edge between a container object and one of its members.
pub fn contains_edge(parent: &CodeObject, child: &CodeObject) -> Relationship {
    Relationship {
        source_id: parent.id.clone(),
        source_name: parent.name.clone(),
        source_type: parent.object_type.label().to_string(),
        source_file: parent.relative_path.clone(),
        source_line: parent.start_line,
        target_id: child.id.clone(),
        target_name: child.name.clone(),
        target_type: child.object_type.label().to_string(),
        target_file: child.relative_path.clone(),
        target_line: child.start_line,
        relation_type: crate::model::RelationType::Contains,
        confidence: 1.0,
    }
}

/// Last line (1-based, inclusive) of the brace-delimited block opened at
/// `start`. Falls back to the declaration line for brace-less declarations
/// (abstract methods, expression bodies).
pub fn block_extent(lines: &[&str], start: usize) -> usize {
    let mut depth = 0i32;
    let mut opened = false;
    for (offset, line) in lines.iter().enumerate().skip(start) {
        for c in line.chars() {
            match c {
                '{' => {
                    depth += 1;
                    opened = true;
                }
                '}' => depth -= 1,
                _ => {}
            }
        }
        if opened && depth <= 0 {
            return offset + 1;
        }
        if !opened && (line.trim_end().ends_with(';') || line.trim_end().ends_with('=')) {
            return offset + 1;
        }
        if !opened && offset > start + 8 {
            break;
        }
    }
    start + 1
}

/// Declaration header: the lines from `start` up to the opening brace or
/// terminating semicolon, joined with single spaces.
pub fn collect_header(lines: &[&str], start: usize) -> String {
    let mut header = String::new();
    for line in lines.iter().skip(start).take(6) {
        if !header.is_empty() {
            header.push(' ');
        }
        header.push_str(line.trim());
        if line.contains('{') || line.trim_end().ends_with(';') {
            break;
        }
    }
    header
}

/// Read a `/* ... */` comment starting at `start`; returns the cleaned
/// text and the number of lines consumed.
pub fn read_block_comment(lines: &[&str], start: usize) -> (String, usize) {
    let mut text: Vec<String> = Vec::new();
    let mut consumed = 0usize;
    for line in lines.iter().skip(start) {
        consumed += 1;
        let cleaned = line
            .trim()
            .trim_start_matches("/**")
            .trim_start_matches("/*")
            .trim_end_matches("*/")
            .trim_start_matches('*')
            .trim()
            .to_string();
        if !cleaned.is_empty() {
            text.push(cleaned);
        }
        if line.contains("*/") {
            break;
        }
    }
    (text.join("\n"), consumed)
}

/// Shorthand for an import object covering a single import statement.
pub fn import_object(
    relative_path: &str,
    language: &str,
    target: &str,
    line: usize,
    statement: &str,
) -> CodeObject {
    let mut object = CodeObject::new(
        target.to_string(),
        format!("{relative_path}::{target}"),
        ObjectType::Import,
        language,
        relative_path,
        line,
        line,
        statement.to_string(),
    );
    object.signature = statement.trim().to_string();
    object
}
