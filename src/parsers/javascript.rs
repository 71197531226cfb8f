use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::{CodeObject, ObjectType};
use crate::parsers::common::{
    block_extent, collect_call_references, collect_header, compute_ast_metadata, contains_edge,
    import_object, read_block_comment,
};
use crate::parsers::{ParsedFile, PendingReference, ReferenceKind, SourceParser};

static CLASS_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?:export\s+)?(?:default\s+)?(?:abstract\s+)?class\s+([A-Za-z_$][\w$]*)",
    )
    .unwrap()
});
static FUNCTION_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:export\s+)?(?:default\s+)?(?:async\s+)?function\s*\*?\s*([A-Za-z_$][\w$]*)\s*\(")
        .unwrap()
});
static ARROW_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?:export\s+)?(?:const|let|var)\s+([A-Za-z_$][\w$]*)\s*(?::[^=]+)?=\s*(?:async\s+)?(?:\([^)]*\)|[A-Za-z_$][\w$]*)\s*(?::[^=]+)?=>",
    )
    .unwrap()
});
static VARIABLE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:export\s+)?(const|let|var)\s+([A-Za-z_$][\w$]*)").unwrap()
});
static INTERFACE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:export\s+)?interface\s+([A-Za-z_$][\w$]*)(?:\s+extends\s+([^{]+))?").unwrap()
});
static TYPE_ALIAS_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:export\s+)?type\s+([A-Za-z_$][\w$]*)\s*=").unwrap());
static ENUM_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:export\s+)?(?:const\s+)?enum\s+([A-Za-z_$][\w$]*)").unwrap()
});
static METHOD_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\s*(?:(?:static|async|public|private|protected|readonly|get|set|override)\s+)*\*?\s*([A-Za-z_$][\w$]*)\s*\([^)]*\)\s*(?::[^{;]+)?\{",
    )
    .unwrap()
});
static IMPORT_FROM_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^import\s+.*?from\s+['"]([^'"]+)['"]"#).unwrap());
static BARE_IMPORT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^import\s+['"]([^'"]+)['"]"#).unwrap());
static REQUIRE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"require\s*\(\s*['"]([^'"]+)['"]\s*\)"#).unwrap()
});
static EXTENDS_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bextends\s+([\w$.]+)").unwrap());
static IMPLEMENTS_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bimplements\s+([^{]+)").unwrap());

const METHOD_KEYWORDS: &[&str] = &[
    "if", "for", "while", "switch", "catch", "return", "function", "new", "do", "else", "try",
];

/// Parser shared by JavaScript and TypeScript; the TS dialect adds
/// interfaces, type aliases, and enums.
pub struct JsParser {
    language: &'static str,
}

impl JsParser {
    pub fn javascript() -> Self {
        Self {
            language: "javascript",
        }
    }

    pub fn typescript() -> Self {
        Self {
            language: "typescript",
        }
    }

    fn is_typescript(&self) -> bool {
        self.language == "typescript"
    }
}

impl SourceParser for JsParser {
    fn language(&self) -> &'static str {
        self.language
    }

    fn parse(&self, relative_path: &str, source: &str) -> Result<ParsedFile> {
        let lines: Vec<&str> = source.lines().collect();
        let mut parsed = ParsedFile::default();
        let mut containers: Vec<(usize, usize)> = Vec::new();
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

            if let Some(target) = match_import(trimmed) {
                let object =
                    import_object(relative_path, self.language, &target, line_no, trimmed);
                parsed.references.push(PendingReference {
                    source_id: object.id.clone(),
                    name: module_simple_name(&target),
                    kind: ReferenceKind::Import,
                    line: line_no,
                });
                parsed.objects.push(object);
                pending_doc.clear();
                i += 1;
                continue;
            }

            if let Some(caps) = CLASS_PATTERN.captures(trimmed) {
                let name = caps.get(1).unwrap().as_str().to_string();
                let header = collect_header(&lines, i);
                let end = block_extent(&lines, i);
                let content = lines[i..end].join("\n");

                let mut object = CodeObject::new(
                    name.clone(),
                    name,
                    ObjectType::Class,
                    self.language,
                    relative_path,
                    line_no,
                    end,
                    content.clone(),
                );
                object.signature = header.split('{').next().unwrap_or("").trim().to_string();
                object.docstring = std::mem::take(&mut pending_doc);
                object.metadata = compute_ast_metadata(&content, false);

                if let Some(ext) = EXTENDS_PATTERN.captures(&header) {
                    parsed.references.push(PendingReference {
                        source_id: object.id.clone(),
                        name: simple_name(ext.get(1).unwrap().as_str()),
                        kind: ReferenceKind::Extend,
                        line: line_no,
                    });
                }
                if let Some(imp) = IMPLEMENTS_PATTERN.captures(&header) {
                    for part in imp.get(1).unwrap().as_str().split(',') {
                        let name = simple_name(part);
                        if !name.is_empty() {
                            parsed.references.push(PendingReference {
                                source_id: object.id.clone(),
                                name,
                                kind: ReferenceKind::Implement,
                                line: line_no,
                            });
                        }
                    }
                }

                let idx = parsed.objects.len();
                parsed.objects.push(object);
                containers.push((end, idx));
                i += 1;
                continue;
            }

            if self.is_typescript() {
                if let Some(caps) = INTERFACE_PATTERN.captures(trimmed) {
                    let name = caps.get(1).unwrap().as_str().to_string();
                    let end = block_extent(&lines, i);
                    let content = lines[i..end].join("\n");
                    let mut object = CodeObject::new(
                        name.clone(),
                        name,
                        ObjectType::Interface,
                        self.language,
                        relative_path,
                        line_no,
                        end,
                        content,
                    );
                    object.signature = trimmed.split('{').next().unwrap_or("").trim().to_string();
                    object.docstring = std::mem::take(&mut pending_doc);
                    if let Some(bases) = caps.get(2) {
                        for part in bases.as_str().split(',') {
                            let base = simple_name(part);
                            if !base.is_empty() {
                                parsed.references.push(PendingReference {
                                    source_id: object.id.clone(),
                                    name: base,
                                    kind: ReferenceKind::Extend,
                                    line: line_no,
                                });
                            }
                        }
                    }
                    parsed.objects.push(object);
                    i = end.max(i + 1);
                    continue;
                }

                if let Some(caps) = ENUM_PATTERN.captures(trimmed) {
                    let name = caps.get(1).unwrap().as_str().to_string();
                    let end = block_extent(&lines, i);
                    let content = lines[i..end].join("\n");
                    let mut object = CodeObject::new(
                        name.clone(),
                        name,
                        ObjectType::Enum,
                        self.language,
                        relative_path,
                        line_no,
                        end,
                        content,
                    );
                    object.signature = trimmed.split('{').next().unwrap_or("").trim().to_string();
                    object.docstring = std::mem::take(&mut pending_doc);
                    parsed.objects.push(object);
                    i = end.max(i + 1);
                    continue;
                }

                if let Some(caps) = TYPE_ALIAS_PATTERN.captures(trimmed) {
                    let name = caps.get(1).unwrap().as_str().to_string();
                    let end = block_extent(&lines, i);
                    let content = lines[i..end].join("\n");
                    let mut object = CodeObject::new(
                        name.clone(),
                        name,
                        ObjectType::Type,
                        self.language,
                        relative_path,
                        line_no,
                        end,
                        content,
                    );
                    object.signature = trimmed.chars().take(200).collect();
                    object.docstring = std::mem::take(&mut pending_doc);
                    parsed.objects.push(object);
                    i = end.max(i + 1);
                    continue;
                }
            }

            let function_name = FUNCTION_PATTERN
                .captures(trimmed)
                .or_else(|| ARROW_PATTERN.captures(trimmed))
                .map(|c| c.get(1).unwrap().as_str().to_string());

            if let Some(name) = function_name {
                if containers.is_empty() {
                    let end = block_extent(&lines, i);
                    let content = lines[i..end].join("\n");
                    let mut object = CodeObject::new(
                        name.clone(),
                        name.clone(),
                        ObjectType::Function,
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
                    parsed.references.extend(collect_call_references(
                        &object.id, &content, &name, line_no,
                    ));
                    parsed.objects.push(object);
                    i = end.max(i + 1);
                    continue;
                }
            }

            if !containers.is_empty() {
                if let Some(caps) = METHOD_PATTERN.captures(line) {
                    let name = caps.get(1).unwrap().as_str().to_string();
                    if !METHOD_KEYWORDS.contains(&name.as_str()) {
                        let end = block_extent(&lines, i);
                        let content = lines[i..end].join("\n");
                        let qualified = {
                            let parent = &parsed.objects[containers.last().unwrap().1];
                            format!("{}.{}", parent.name, name)
                        };
                        let mut object = CodeObject::new(
                            name.clone(),
                            qualified,
                            ObjectType::Method,
                            self.language,
                            relative_path,
                            line_no,
                            end,
                            content.clone(),
                        );
                        object.signature = line.trim().split('{').next().unwrap_or("").trim().to_string();
                        object.docstring = std::mem::take(&mut pending_doc);
                        object.metadata = compute_ast_metadata(&content, false);
                        parsed.references.extend(collect_call_references(
                            &object.id, &content, &name, line_no,
                        ));
                        let parent_idx = containers.last().unwrap().1;
                        let edge = contains_edge(&parsed.objects[parent_idx], &object);
                        parsed.relationships.push(edge);
                        parsed.objects.push(object);
                        i = end.max(i + 1);
                        continue;
                    }
                }
            } else if let Some(caps) = VARIABLE_PATTERN.captures(trimmed) {
                let keyword = caps.get(1).unwrap().as_str();
                let name = caps.get(2).unwrap().as_str().to_string();
                let object_type = if keyword == "const"
                    && name.chars().all(|c| c.is_ascii_uppercase() || c == '_')
                {
                    ObjectType::Constant
                } else {
                    ObjectType::Variable
                };
                let mut object = CodeObject::new(
                    name.clone(),
                    name,
                    object_type,
                    self.language,
                    relative_path,
                    line_no,
                    line_no,
                    trimmed.to_string(),
                );
                object.signature = trimmed.trim_end_matches(';').chars().take(120).collect();
                object.docstring = std::mem::take(&mut pending_doc);
                parsed.objects.push(object);
            }

            pending_doc.clear();
            i += 1;
        }

        Ok(parsed)
    }
}

fn match_import(line: &str) -> Option<String> {
    IMPORT_FROM_PATTERN
        .captures(line)
        .or_else(|| BARE_IMPORT_PATTERN.captures(line))
        .or_else(|| {
            if line.starts_with("const") || line.starts_with("let") || line.starts_with("var") {
                REQUIRE_PATTERN.captures(line)
            } else {
                None
            }
        })
        .map(|c| c.get(1).unwrap().as_str().to_string())
}

fn module_simple_name(target: &str) -> String {
    target
        .rsplit('/')
        .next()
        .unwrap_or(target)
        .trim_start_matches('.')
        .to_string()
}

fn simple_name(raw: &str) -> String {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RelationType;

    const JS_SAMPLE: &str = r#"
const { round } = require('./math');

const FREE_SHIPPING_THRESHOLD = 50;

/**
 * Calculates shipping cost from weight and destination zone.
 */
function calculateShipping(order, zone) {
    if (order.total >= FREE_SHIPPING_THRESHOLD) {
        return 0;
    }
    const base = baseRate(zone);
    return round(base * order.weight);
}

const estimateDelivery = (zone) => {
    return zone === 'domestic' ? 2 : 10;
};

class ShippingCalculator extends BaseCalculator {
    /**
     * Quote for a full cart.
     */
    quote(cart) {
        return calculateShipping(cart.order, cart.zone);
    }
}
"#;

    const TS_SAMPLE: &str = r#"
import { Order } from './order';

export interface PricingRule extends Rule {
    apply(order: Order): number;
}

export enum Zone {
    Domestic,
    International,
}

export type Discount = { rate: number };

export class TierPricing implements PricingRule {
    apply(order: Order): number {
        return order.total * 0.9;
    }
}
"#;

    fn parse_js() -> ParsedFile {
        JsParser::javascript()
            .parse("src/calculateShipping.js", JS_SAMPLE)
            .unwrap()
    }

    fn parse_ts() -> ParsedFile {
        JsParser::typescript().parse("src/pricing.ts", TS_SAMPLE).unwrap()
    }

    #[test]
    fn extracts_functions_and_arrows() {
        let parsed = parse_js();
        let calc = parsed
            .objects
            .iter()
            .find(|o| o.name == "calculateShipping")
            .expect("function");
        assert_eq!(calc.object_type, ObjectType::Function);
        assert!(calc.docstring.contains("shipping cost"));
        assert!(calc.end_line > calc.start_line);

        let estimate = parsed
            .objects
            .iter()
            .find(|o| o.name == "estimateDelivery")
            .expect("arrow fn");
        assert_eq!(estimate.object_type, ObjectType::Function);
    }

    #[test]
    fn extracts_class_with_method_and_extends() {
        let parsed = parse_js();
        let class = parsed
            .objects
            .iter()
            .find(|o| o.name == "ShippingCalculator")
            .expect("class");
        assert_eq!(class.object_type, ObjectType::Class);

        let quote = parsed.objects.iter().find(|o| o.name == "quote").expect("method");
        assert_eq!(quote.object_type, ObjectType::Method);
        assert_eq!(quote.qualified_name, "ShippingCalculator.quote");
        assert!(quote.docstring.contains("full cart"));

        assert!(parsed
            .references
            .iter()
            .any(|r| r.kind == ReferenceKind::Extend && r.name == "BaseCalculator"));
        assert!(parsed
            .relationships
            .iter()
            .any(|r| r.relation_type == RelationType::Contains && r.target_name == "quote"));
    }

    #[test]
    fn extracts_constants_and_requires() {
        let parsed = parse_js();
        let threshold = parsed
            .objects
            .iter()
            .find(|o| o.name == "FREE_SHIPPING_THRESHOLD")
            .expect("constant");
        assert_eq!(threshold.object_type, ObjectType::Constant);

        assert!(parsed
            .references
            .iter()
            .any(|r| r.kind == ReferenceKind::Import && r.name == "math"));
    }

    #[test]
    fn collects_calls_inside_functions() {
        let parsed = parse_js();
        let calls: Vec<&str> = parsed
            .references
            .iter()
            .filter(|r| r.kind == ReferenceKind::Call)
            .map(|r| r.name.as_str())
            .collect();
        assert!(calls.contains(&"baseRate"));
        assert!(calls.contains(&"calculateShipping"));
    }

    #[test]
    fn typescript_extracts_interface_enum_type() {
        let parsed = parse_ts();
        let rule = parsed
            .objects
            .iter()
            .find(|o| o.name == "PricingRule")
            .expect("interface");
        assert_eq!(rule.object_type, ObjectType::Interface);

        let zone = parsed.objects.iter().find(|o| o.name == "Zone").expect("enum");
        assert_eq!(zone.object_type, ObjectType::Enum);

        let discount = parsed
            .objects
            .iter()
            .find(|o| o.name == "Discount")
            .expect("type alias");
        assert_eq!(discount.object_type, ObjectType::Type);
    }

    #[test]
    fn typescript_records_implements_reference() {
        let parsed = parse_ts();
        assert!(parsed
            .references
            .iter()
            .any(|r| r.kind == ReferenceKind::Implement && r.name == "PricingRule"));
        assert!(parsed
            .references
            .iter()
            .any(|r| r.kind == ReferenceKind::Extend && r.name == "Rule"));
    }

    #[test]
    fn javascript_ignores_typescript_only_syntax() {
        let parsed = JsParser::javascript()
            .parse("src/x.js", "interface Nope {}\ntype Also = {};\n")
            .unwrap();
        assert!(parsed
            .objects
            .iter()
            .all(|o| o.object_type != ObjectType::Interface && o.object_type != ObjectType::Type));
    }

    #[test]
    fn parse_is_deterministic() {
        let ids = |p: &ParsedFile| {
            let mut v: Vec<String> = p.objects.iter().map(|o| o.id.clone()).collect();
            v.sort();
            v
        };
        assert_eq!(ids(&parse_js()), ids(&parse_js()));
    }
}
