use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::{CodeObject, ObjectType};
use crate::parsers::common::{
    block_extent, collect_call_references, collect_header, compute_ast_metadata, contains_edge,
    import_object, read_block_comment,
};
use crate::parsers::{ParsedFile, PendingReference, ReferenceKind, SourceParser};

static TYPE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\s*(?:@\w+\s+)*(?:(?:public|private|protected|internal|abstract|final|open|sealed|static|data)\s+)*(class|interface|enum(?:\s+class)?|object)\s+([A-Za-z_][A-Za-z0-9_]*)",
    )
    .unwrap()
});
static JAVA_METHOD_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\s*(?:(?:public|private|protected|static|final|abstract|synchronized|native|default)\s+)*(?:<[^>]+>\s+)?[\w.<>\[\],?\s]+?\s+([a-zA-Z_]\w*)\s*\([^;]*$|^\s*(?:(?:public|private|protected|static|final|abstract|synchronized|native|default)\s+)*(?:<[^>]+>\s+)?[\w.<>\[\],?\s]+?\s+([a-zA-Z_]\w*)\s*\([^)]*\)\s*(?:throws\s+[\w,\s.]+)?\s*[{;]",
    )
    .unwrap()
});
static KOTLIN_FUN_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\s*(?:(?:public|private|protected|internal|override|open|suspend|inline|operator|infix|tailrec)\s+)*fun\s+(?:<[^>]+>\s+)?(?:[\w.]+\.)?([A-Za-z_][A-Za-z0-9_]*)\s*\(",
    )
    .unwrap()
});
static JAVA_FIELD_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\s*(?:(?:public|private|protected|static|final|transient|volatile)\s+)+[\w.<>\[\],?\s]+?\s+([a-zA-Z_]\w*)\s*(?:=[^;]*)?;",
    )
    .unwrap()
});
static KOTLIN_PROPERTY_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\s*(?:(?:public|private|protected|internal|override|open|const|lateinit)\s+)*(val|var)\s+([A-Za-z_][A-Za-z0-9_]*)",
    )
    .unwrap()
});
static EXTENDS_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bextends\s+([\w.]+)").unwrap());
static IMPLEMENTS_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bimplements\s+([^{]+)").unwrap());

const JAVA_METHOD_KEYWORDS: &[&str] = &[
    "if", "for", "while", "switch", "catch", "return", "new", "throw", "super", "this", "else",
    "synchronized", "assert", "when", "do", "try",
];

/// Shared parser for the JVM languages. Braces define scope in both; the
/// Kotlin dialect swaps the method and property grammars.
pub struct JvmParser {
    language: &'static str,
}

impl JvmParser {
    pub fn java() -> Self {
        Self { language: "java" }
    }

    pub fn kotlin() -> Self {
        Self { language: "kotlin" }
    }

    fn is_kotlin(&self) -> bool {
        self.language == "kotlin"
    }
}

impl SourceParser for JvmParser {
    fn language(&self) -> &'static str {
        self.language
    }

    fn parse(&self, relative_path: &str, source: &str) -> Result<ParsedFile> {
        let lines: Vec<&str> = source.lines().collect();
        let mut parsed = ParsedFile::default();
        // Open containers: (closing line, object index).
        let mut containers: Vec<(usize, usize)> = Vec::new();
        let mut pending_annotations: Vec<(String, usize)> = Vec::new();
        let mut pending_doc = String::new();

        let mut i = 0usize;
        while i < lines.len() {
            let line = lines[i];
            let trimmed = line.trim();
            let line_no = i + 1;

            while let Some(&(end, _)) = containers.last() {
                if line_no > end {
                    containers.pop();
                } else {
                    break;
                }
            }

            if trimmed.is_empty() || trimmed.starts_with("//") {
                i += 1;
                continue;
            }

            if trimmed.starts_with("/**") || trimmed.starts_with("/*") {
                let (doc, consumed) = read_block_comment(&lines, i);
                pending_doc = doc;
                i += consumed;
                continue;
            }

            if let Some(rest) = trimmed.strip_prefix('@') {
                let name = rest
                    .split(|c: char| c == '(' || c.is_whitespace())
                    .next()
                    .unwrap_or("")
                    .to_string();
                if !name.is_empty() && trimmed.len() < 120 {
                    pending_annotations.push((name, line_no));
                    i += 1;
                    continue;
                }
            }

            if trimmed.starts_with("package ") {
                i += 1;
                continue;
            }

            if let Some(target) = parse_import(trimmed) {
                let object =
                    import_object(relative_path, self.language, &target, line_no, trimmed);
                parsed.references.push(PendingReference {
                    source_id: object.id.clone(),
                    name: target.rsplit('.').next().unwrap_or(&target).to_string(),
                    kind: ReferenceKind::Import,
                    line: line_no,
                });
                parsed.objects.push(object);
                i += 1;
                continue;
            }

            if let Some(caps) = TYPE_PATTERN.captures(trimmed) {
                let keyword = caps.get(1).unwrap().as_str();
                let name = caps.get(2).unwrap().as_str().to_string();
                let object_type = if keyword.starts_with("enum") {
                    ObjectType::Enum
                } else if keyword == "interface" {
                    ObjectType::Interface
                } else {
                    ObjectType::Class
                };

                let header = collect_header(&lines, i);
                let end = block_extent(&lines, i);
                let content = lines[i..end].join("\n");
                let qualified = qualify(&parsed, &containers, &name);

                let mut object = CodeObject::new(
                    name.clone(),
                    qualified,
                    object_type,
                    self.language,
                    relative_path,
                    line_no,
                    end,
                    content.clone(),
                );
                object.signature = header.split('{').next().unwrap_or("").trim().to_string();
                object.docstring = std::mem::take(&mut pending_doc);
                object.metadata = compute_ast_metadata(&content, false);

                self.collect_supertypes(&header, &object.id, line_no, &mut parsed);
                drain_annotations(&mut parsed, &object.id, &mut pending_annotations);
                if let Some(&(_, parent_idx)) = containers.last() {
                    let edge = contains_edge(&parsed.objects[parent_idx], &object);
                    parsed.relationships.push(edge);
                }

                let idx = parsed.objects.len();
                parsed.objects.push(object);
                containers.push((end, idx));
                i += 1;
                continue;
            }

            let method_name = if self.is_kotlin() {
                KOTLIN_FUN_PATTERN
                    .captures(trimmed)
                    .map(|c| c.get(1).unwrap().as_str().to_string())
            } else {
                self.match_java_method(trimmed)
            };

            if let Some(name) = method_name {
                let end = block_extent(&lines, i);
                let content = lines[i..end].join("\n");
                let qualified = qualify(&parsed, &containers, &name);
                let object_type = if containers.is_empty() {
                    ObjectType::Function
                } else {
                    ObjectType::Method
                };

                let mut object = CodeObject::new(
                    name.clone(),
                    qualified,
                    object_type,
                    self.language,
                    relative_path,
                    line_no,
                    end,
                    content.clone(),
                );
                object.signature = collect_header(&lines, i)
                    .split('{')
                    .next()
                    .unwrap_or("")
                    .trim()
                    .chars()
                    .take(200)
                    .collect();
                object.docstring = std::mem::take(&mut pending_doc);
                object.metadata = compute_ast_metadata(&content, false);

                parsed
                    .references
                    .extend(collect_call_references(&object.id, &content, &name, line_no));
                drain_annotations(&mut parsed, &object.id, &mut pending_annotations);
                if let Some(&(_, parent_idx)) = containers.last() {
                    let edge = contains_edge(&parsed.objects[parent_idx], &object);
                    parsed.relationships.push(edge);
                }

                parsed.objects.push(object);
                i = end.max(i + 1);
                continue;
            }

            if !containers.is_empty() {
                if let Some((object_type, name)) = self.match_field(trimmed) {
                    let qualified = qualify(&parsed, &containers, &name);
                    let mut object = CodeObject::new(
                        name,
                        qualified,
                        object_type,
                        self.language,
                        relative_path,
                        line_no,
                        line_no,
                        trimmed.to_string(),
                    );
                    object.signature = trimmed.trim_end_matches(';').chars().take(120).collect();
                    object.docstring = std::mem::take(&mut pending_doc);
                    if let Some(&(_, parent_idx)) = containers.last() {
                        let edge = contains_edge(&parsed.objects[parent_idx], &object);
                        parsed.relationships.push(edge);
                    }
                    parsed.objects.push(object);
                }
            }

            pending_doc.clear();
            pending_annotations.clear();
            i += 1;
        }

        Ok(parsed)
    }
}

impl JvmParser {
    fn match_java_method(&self, line: &str) -> Option<String> {
        if line.starts_with("if")
            || line.starts_with("for")
            || line.starts_with("while")
            || line.starts_with("switch")
            || line.starts_with("catch")
            || line.starts_with("return")
            || line.starts_with("new ")
            || line.starts_with("throw")
            || line.starts_with("else")
        {
            return None;
        }
        let caps = JAVA_METHOD_PATTERN.captures(line)?;
        let name = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str().to_string())?;
        if JAVA_METHOD_KEYWORDS.contains(&name.as_str()) {
            return None;
        }
        Some(name)
    }

    fn match_field(&self, line: &str) -> Option<(ObjectType, String)> {
        if self.is_kotlin() {
            let caps = KOTLIN_PROPERTY_PATTERN.captures(line)?;
            let keyword = caps.get(1).unwrap().as_str();
            let name = caps.get(2).unwrap().as_str().to_string();
            let object_type = if keyword == "val" && line.contains("const") {
                ObjectType::Constant
            } else {
                ObjectType::Property
            };
            Some((object_type, name))
        } else {
            let caps = JAVA_FIELD_PATTERN.captures(line)?;
            let name = caps.get(1).unwrap().as_str().to_string();
            let object_type = if line.contains("static") && line.contains("final") {
                ObjectType::Constant
            } else {
                ObjectType::Field
            };
            Some((object_type, name))
        }
    }

    fn collect_supertypes(
        &self,
        header: &str,
        source_id: &str,
        line: usize,
        parsed: &mut ParsedFile,
    ) {
        if self.is_kotlin() {
            // `class Foo(...) : Base(), Iface` - constructor call marks the
            // superclass, bare names mark interfaces.
            let Some(colon_idx) = header_supertype_clause(header) else {
                return;
            };
            let clause = &header[colon_idx + 1..];
            let clause = clause.split('{').next().unwrap_or(clause);
            for part in split_type_list(clause) {
                let is_constructor_call = part.contains('(');
                let name = part
                    .split(|c: char| c == '(' || c == '<')
                    .next()
                    .unwrap_or("")
                    .trim()
                    .to_string();
                if name.is_empty() {
                    continue;
                }
                parsed.references.push(PendingReference {
                    source_id: source_id.to_string(),
                    name,
                    kind: if is_constructor_call {
                        ReferenceKind::Extend
                    } else {
                        ReferenceKind::Implement
                    },
                    line,
                });
            }
        } else {
            if let Some(caps) = EXTENDS_PATTERN.captures(header) {
                parsed.references.push(PendingReference {
                    source_id: source_id.to_string(),
                    name: simple_type_name(caps.get(1).unwrap().as_str()),
                    kind: ReferenceKind::Extend,
                    line,
                });
            }
            if let Some(caps) = IMPLEMENTS_PATTERN.captures(header) {
                for part in split_type_list(caps.get(1).unwrap().as_str()) {
                    let name = simple_type_name(&part);
                    if !name.is_empty() {
                        parsed.references.push(PendingReference {
                            source_id: source_id.to_string(),
                            name,
                            kind: ReferenceKind::Implement,
                            line,
                        });
                    }
                }
            }
        }
    }
}

fn parse_import(line: &str) -> Option<String> {
    let rest = line.strip_prefix("import ")?;
    let rest = rest.trim_start_matches("static ");
    let target = rest.trim_end_matches(';').trim();
    if target.is_empty() {
        None
    } else {
        Some(target.to_string())
    }
}

fn header_supertype_clause(header: &str) -> Option<usize> {
    // The colon that opens the supertype list, not one inside parameters.
    let mut depth = 0i32;
    for (idx, c) in header.char_indices() {
        match c {
            '(' | '<' => depth += 1,
            ')' | '>' => depth -= 1,
            ':' if depth == 0 => return Some(idx),
            '{' => return None,
            _ => {}
        }
    }
    None
}

fn split_type_list(clause: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();
    for c in clause.chars() {
        match c {
            '(' | '<' => {
                depth += 1;
                current.push(c);
            }
            ')' | '>' => {
                depth -= 1;
                current.push(c);
            }
            ',' if depth == 0 => {
                parts.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }
    parts.into_iter().filter(|p| !p.is_empty()).collect()
}

fn simple_type_name(raw: &str) -> String {
    raw.trim()
        .split('<')
        .next()
        .unwrap_or("")
        .rsplit('.')
        .next()
        .unwrap_or("")
        .trim()
        .to_string()
}

fn qualify(parsed: &ParsedFile, containers: &[(usize, usize)], name: &str) -> String {
    let mut parts: Vec<&str> = containers
        .iter()
        .map(|&(_, idx)| parsed.objects[idx].name.as_str())
        .collect();
    parts.push(name);
    parts.join(".")
}

fn drain_annotations(
    parsed: &mut ParsedFile,
    object_id: &str,
    annotations: &mut Vec<(String, usize)>,
) {
    for (name, line) in annotations.drain(..) {
        parsed.references.push(PendingReference {
            source_id: object_id.to_string(),
            name,
            kind: ReferenceKind::Annotation,
            line,
        });
    }
}
