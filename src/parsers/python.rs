use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::{CodeObject, ObjectType};
use crate::parsers::common::{
    collect_call_references, compute_ast_metadata, contains_edge, import_object,
};
use crate::parsers::{ParsedFile, PendingReference, ReferenceKind, SourceParser};

static DEF_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\s*)(?:async\s+)?def\s+([A-Za-z_][A-Za-z0-9_]*)\s*\(").unwrap());
static CLASS_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\s*)class\s+([A-Za-z_][A-Za-z0-9_]*)\s*(?:\(([^)]*)\))?\s*:").unwrap()
});
static ASSIGN_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)\s*(?::[^=]+)?=[^=]").unwrap());
static IMPORT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:from\s+([A-Za-z_][A-Za-z0-9_.]*)\s+import|import\s+([A-Za-z_][A-Za-z0-9_.]*))")
        .unwrap()
});

/// Python parser: indentation defines scope, so object extents run until
/// the next non-blank line at or below the declaration's indent.
pub struct PythonParser;

impl SourceParser for PythonParser {
    fn language(&self) -> &'static str {
        "python"
    }

    fn parse(&self, relative_path: &str, source: &str) -> Result<ParsedFile> {
        let lines: Vec<&str> = source.lines().collect();
        let mut parsed = ParsedFile::default();
        // (indent, object index in parsed.objects) for scope qualification.
        let mut scope_stack: Vec<(usize, usize)> = Vec::new();
        let mut pending_decorators: Vec<(String, usize)> = Vec::new();

        let mut i = 0usize;
        while i < lines.len() {
            let line = lines[i];
            let trimmed = line.trim();
            let line_no = i + 1;

            if trimmed.is_empty() || trimmed.starts_with('#') {
                i += 1;
                continue;
            }

            let indent = indent_of(line);
            while let Some(&(scope_indent, _)) = scope_stack.last() {
                if indent <= scope_indent {
                    scope_stack.pop();
                } else {
                    break;
                }
            }

            if let Some(stripped) = trimmed.strip_prefix('@') {
                let name = stripped
                    .split(|c: char| c == '(' || c == '.' || c.is_whitespace())
                    .next()
                    .unwrap_or("")
                    .to_string();
                if !name.is_empty() {
                    pending_decorators.push((name, line_no));
                }
                i += 1;
                continue;
            }

            if indent == 0 {
                if let Some(caps) = IMPORT_PATTERN.captures(trimmed) {
                    let target = caps
                        .get(1)
                        .or_else(|| caps.get(2))
                        .map(|m| m.as_str())
                        .unwrap_or_default();
                    let object =
                        import_object(relative_path, "python", target, line_no, trimmed);
                    parsed.references.push(PendingReference {
                        source_id: object.id.clone(),
                        name: target.rsplit('.').next().unwrap_or(target).to_string(),
                        kind: ReferenceKind::Import,
                        line: line_no,
                    });
                    parsed.objects.push(object);
                    pending_decorators.clear();
                    i += 1;
                    continue;
                }
            }

            if let Some(caps) = CLASS_PATTERN.captures(line) {
                let name = caps.get(2).unwrap().as_str().to_string();
                let bases: Vec<String> = caps
                    .get(3)
                    .map(|m| {
                        m.as_str()
                            .split(',')
                            .map(|b| b.trim().trim_start_matches("metaclass=").to_string())
                            .filter(|b| !b.is_empty() && b != "object")
                            .collect()
                    })
                    .unwrap_or_default();

                let end = block_end(&lines, i, indent);
                let content = lines[i..end].join("\n");
                let qualified = qualify(&parsed, &scope_stack, &name);

                let mut object = CodeObject::new(
                    name.clone(),
                    qualified,
                    ObjectType::Class,
                    "python",
                    relative_path,
                    line_no,
                    end,
                    content.clone(),
                );
                object.signature = trimmed.trim_end_matches(':').to_string();
                object.docstring = extract_docstring(&lines, i + 1, end);
                object.metadata = compute_ast_metadata(&content, true);

                for base in bases {
                    parsed.references.push(PendingReference {
                        source_id: object.id.clone(),
                        name: base,
                        kind: ReferenceKind::Extend,
                        line: line_no,
                    });
                }
                attach_decorators(&mut parsed, &object.id, &mut pending_decorators);
                link_to_parent(&mut parsed, &scope_stack, &object);

                let idx = parsed.objects.len();
                parsed.objects.push(object);
                scope_stack.push((indent, idx));
                i += 1;
                continue;
            }

            if let Some(caps) = DEF_PATTERN.captures(line) {
                let name = caps.get(2).unwrap().as_str().to_string();
                let end = block_end(&lines, i, indent);
                let content = lines[i..end].join("\n");
                let qualified = qualify(&parsed, &scope_stack, &name);
                let inside_class = scope_stack
                    .iter()
                    .rev()
                    .map(|&(_, idx)| &parsed.objects[idx])
                    .next()
                    .map(|parent| parent.object_type.is_container())
                    .unwrap_or(false);
                let object_type = if inside_class {
                    ObjectType::Method
                } else {
                    ObjectType::Function
                };

                let mut object = CodeObject::new(
                    name.clone(),
                    qualified,
                    object_type,
                    "python",
                    relative_path,
                    line_no,
                    end,
                    content.clone(),
                );
                object.signature = signature_of(&lines, i);
                object.docstring = extract_docstring(&lines, i + 1, end);
                object.metadata = compute_ast_metadata(&content, true);

                parsed
                    .references
                    .extend(collect_call_references(&object.id, &content, &name, line_no));
                attach_decorators(&mut parsed, &object.id, &mut pending_decorators);
                link_to_parent(&mut parsed, &scope_stack, &object);

                let idx = parsed.objects.len();
                parsed.objects.push(object);
                scope_stack.push((indent, idx));
                i += 1;
                continue;
            }

            if indent == 0 {
                if let Some(caps) = ASSIGN_PATTERN.captures(trimmed) {
                    let name = caps.get(1).unwrap().as_str().to_string();
                    let object_type = if name.chars().all(|c| c.is_ascii_uppercase() || c == '_') {
                        ObjectType::Constant
                    } else {
                        ObjectType::Variable
                    };
                    let mut object = CodeObject::new(
                        name.clone(),
                        name,
                        object_type,
                        "python",
                        relative_path,
                        line_no,
                        line_no,
                        trimmed.to_string(),
                    );
                    object.signature = trimmed.chars().take(120).collect();
                    parsed.objects.push(object);
                }
            }

            pending_decorators.clear();
            i += 1;
        }

        Ok(parsed)
    }
}

fn indent_of(line: &str) -> usize {
    line.chars()
        .take_while(|c| *c == ' ' || *c == '\t')
        .map(|c| if c == '\t' { 4 } else { 1 })
        .sum()
}

/// End of the block opened at `start` (exclusive line index): the block
/// runs while lines are blank or indented deeper than the opener.
fn block_end(lines: &[&str], start: usize, indent: usize) -> usize {
    let mut end = start + 1;
    let mut last_content = start + 1;
    while end < lines.len() {
        let line = lines[end];
        if line.trim().is_empty() {
            end += 1;
            continue;
        }
        if indent_of(line) <= indent {
            break;
        }
        end += 1;
        last_content = end;
    }
    last_content
}

fn signature_of(lines: &[&str], start: usize) -> String {
    let mut signature = String::new();
    for line in lines.iter().skip(start).take(5) {
        let trimmed = line.trim();
        if !signature.is_empty() {
            signature.push(' ');
        }
        signature.push_str(trimmed);
        if trimmed.ends_with(':') {
            break;
        }
    }
    signature.trim_end_matches(':').chars().take(200).collect()
}

fn extract_docstring(lines: &[&str], body_start: usize, end: usize) -> String {
    let mut idx = body_start;
    while idx < end && lines[idx].trim().is_empty() {
        idx += 1;
    }
    if idx >= end {
        return String::new();
    }
    let trimmed = lines[idx].trim();
    for quote in ["\"\"\"", "'''"] {
        if let Some(rest) = trimmed.strip_prefix(quote) {
            if let Some(inner) = rest.strip_suffix(quote) {
                if !inner.is_empty() || rest.len() >= quote.len() {
                    return inner.trim().to_string();
                }
            }
            let mut parts = vec![rest.to_string()];
            for line in lines.iter().take(end).skip(idx + 1) {
                if let Some(before) = line.split(quote).next() {
                    if line.contains(quote) {
                        parts.push(before.trim_end().to_string());
                        return parts.join("\n").trim().to_string();
                    }
                }
                parts.push(line.trim_end().to_string());
            }
            return parts.join("\n").trim().to_string();
        }
    }
    String::new()
}

fn qualify(parsed: &ParsedFile, scope_stack: &[(usize, usize)], name: &str) -> String {
    let mut parts: Vec<&str> = scope_stack
        .iter()
        .map(|&(_, idx)| parsed.objects[idx].name.as_str())
        .collect();
    parts.push(name);
    parts.join(".")
}

fn link_to_parent(parsed: &mut ParsedFile, scope_stack: &[(usize, usize)], child: &CodeObject) {
    if let Some(&(_, parent_idx)) = scope_stack.last() {
        let edge = contains_edge(&parsed.objects[parent_idx], child);
        parsed.relationships.push(edge);
    }
}

fn attach_decorators(
    parsed: &mut ParsedFile,
    object_id: &str,
    decorators: &mut Vec<(String, usize)>,
) {
    for (name, line) in decorators.drain(..) {
        parsed.references.push(PendingReference {
            source_id: object_id.to_string(),
            name,
            kind: ReferenceKind::Annotation,
            line,
        });
    }
}
