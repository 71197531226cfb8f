use std::time::Duration;

use serde::Serialize;

use crate::error::CoreError;
use crate::search::{RelationshipRecord, Retriever, SearchResult};

const SNIPPET_LINES: usize = 8;
const RELATIONSHIP_SAMPLE: usize = 10;

/// Payload keys a caller may request on top of the minimal record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpandField {
    Signature,
    Snippet,
    Content,
    Parent,
    Relationships,
    Complexity,
    Impact,
}

impl ExpandField {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "signature" => Some(ExpandField::Signature),
            "snippet" => Some(ExpandField::Snippet),
            "content" => Some(ExpandField::Content),
            "parent" => Some(ExpandField::Parent),
            "relationships" => Some(ExpandField::Relationships),
            "complexity" => Some(ExpandField::Complexity),
            "impact" => Some(ExpandField::Impact),
            _ => None,
        }
    }
}

/// Parse a comma-separated `--expand` list; unknown keys are a user error.
pub fn parse_expand_fields(raw: &str) -> anyhow::Result<Vec<ExpandField>> {
    let mut fields = Vec::new();
    for part in raw.split(',').filter(|p| !p.trim().is_empty()) {
        match ExpandField::parse(part) {
            Some(field) => {
                if !fields.contains(&field) {
                    fields.push(field);
                }
            }
            None => {
                return Err(CoreError::Configuration(format!(
                    "unknown expand field '{}'",
                    part.trim()
                ))
                .into())
            }
        }
    }
    Ok(fields)
}

#[derive(Debug, Clone, Serialize)]
pub struct RelationshipsView {
    pub items: Vec<RelationshipRecord>,
    pub total_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImpactView {
    pub direct_callers: Vec<String>,
}

/// The record both formatters share: minimal fields always present,
/// expanded fields only when requested.
#[derive(Debug, Clone, Serialize)]
pub struct ResultRecord {
    pub name: String,
    pub r#type: String,
    pub file: String,
    pub lines: String,
    pub language: String,
    pub score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relationships: Option<RelationshipsView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub complexity: Option<crate::search::ComplexityView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub impact: Option<ImpactView>,
}

pub fn build_record(
    result: &SearchResult,
    fields: &[ExpandField],
    retriever: &Retriever,
) -> ResultRecord {
    let mut record = ResultRecord {
        name: result.name.clone(),
        r#type: result.type_label.clone(),
        file: result.relative_path.clone(),
        lines: format!("{}-{}", result.start_line, result.end_line),
        language: result.language.clone(),
        score: result.score(),
        signature: None,
        snippet: None,
        content: None,
        parent: None,
        relationships: None,
        complexity: None,
        impact: None,
    };

    for field in fields {
        match field {
            ExpandField::Signature => record.signature = Some(result.signature.clone()),
            ExpandField::Snippet => record.snippet = Some(snippet_of(&result.content)),
            ExpandField::Content => record.content = Some(result.content.clone()),
            ExpandField::Parent => record.parent = result.parent_id.clone(),
            ExpandField::Relationships => {
                let (items, total_count) =
                    retriever.relationships_of(&result.id, RELATIONSHIP_SAMPLE);
                record.relationships = Some(RelationshipsView { items, total_count });
            }
            ExpandField::Complexity => record.complexity = result.complexity.clone(),
            ExpandField::Impact => {
                record.impact = Some(ImpactView {
                    direct_callers: retriever.direct_callers(&result.id),
                })
            }
        }
    }
    record
}

fn snippet_of(content: &str) -> String {
    content
        .lines()
        .take(SNIPPET_LINES)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Human-readable rendering, one block per result.
pub fn render_text(query: &str, records: &[ResultRecord], duration: Duration) -> String {
    let mut out = String::new();
    if records.is_empty() {
        out.push_str(&format!("No results for \"{query}\".\n"));
        return out;
    }

    for (rank, record) in records.iter().enumerate() {
        out.push_str(&format!(
            "{:>2}. {} [{}] {}:{} ({:.4})\n",
            rank + 1,
            record.name,
            record.r#type,
            record.file,
            record.lines,
            record.score,
        ));
        if let Some(signature) = &record.signature {
            if !signature.is_empty() {
                out.push_str(&format!("    {signature}\n"));
            }
        }
        if let Some(snippet) = &record.snippet {
            for line in snippet.lines() {
                out.push_str(&format!("    | {line}\n"));
            }
        }
        if let Some(relationships) = &record.relationships {
            for item in &relationships.items {
                out.push_str(&format!(
                    "    -> {} {} [{}] {}:{}\n",
                    item.relation, item.name, item.r#type, item.file, item.line
                ));
            }
            if relationships.total_count > relationships.items.len() {
                out.push_str(&format!(
                    "    ({} relationships total)\n",
                    relationships.total_count
                ));
            }
        }
        if let Some(complexity) = &record.complexity {
            out.push_str(&format!(
                "    complexity: {} (cyclomatic {}, nesting {}, {} loc)\n",
                complexity.rating,
                complexity.cyclomatic,
                complexity.nesting_depth,
                complexity.lines_of_code
            ));
        }
        if let Some(impact) = &record.impact {
            if !impact.direct_callers.is_empty() {
                out.push_str(&format!(
                    "    called by: {}\n",
                    impact.direct_callers.join(", ")
                ));
            }
        }
    }
    out.push_str(&format!(
        "\n{} results in {} ms\n",
        records.len(),
        duration.as_millis()
    ));
    out
}

#[derive(Serialize)]
pub struct JsonResponse<'a> {
    pub query: &'a str,
    pub duration_ms: u128,
    pub results: &'a [ResultRecord],
}

/// Machine rendering over the same records the text formatter uses.
pub fn render_json(query: &str, records: &[ResultRecord], duration: Duration) -> String {
    serde_json::to_string_pretty(&JsonResponse {
        query,
        duration_ms: duration.as_millis(),
        results: records,
    })
    .unwrap_or_else(|_| "{}".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str) -> ResultRecord {
        ResultRecord {
            name: name.into(),
            r#type: "method".into(),
            file: "src/OrderService.java".into(),
            lines: "10-30".into(),
            language: "java".into(),
            score: 0.0421,
            signature: None,
            snippet: None,
            content: None,
            parent: None,
            relationships: None,
            complexity: None,
            impact: None,
        }
    }

    #[test]
    fn parses_expand_field_lists() {
        let fields = parse_expand_fields("signature,snippet , relationships").unwrap();
        assert_eq!(
            fields,
            vec![
                ExpandField::Signature,
                ExpandField::Snippet,
                ExpandField::Relationships
            ]
        );
        assert!(parse_expand_fields("").unwrap().is_empty());
    }

    #[test]
    fn unknown_expand_field_is_a_user_error() {
        let err = parse_expand_fields("signature,bogus").unwrap_err();
        let core = err.downcast_ref::<CoreError>().unwrap();
        assert_eq!(core.kind(), "configuration");
        assert_eq!(core.exit_code(), 1);
    }

    #[test]
    fn text_rendering_includes_minimal_fields() {
        let text = render_text("order", &[record("processOrder")], Duration::from_millis(12));
        assert!(text.contains("processOrder"));
        assert!(text.contains("[method]"));
        assert!(text.contains("src/OrderService.java:10-30"));
        assert!(text.contains("1 results in 12 ms"));
    }

    #[test]
    fn empty_results_render_friendly_message() {
        let text = render_text("nothing", &[], Duration::from_millis(1));
        assert!(text.contains("No results"));
    }

    #[test]
    fn json_rendering_skips_absent_expanded_fields() {
        let json = render_json("order", &[record("processOrder")], Duration::from_millis(3));
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["query"], "order");
        let result = &value["results"][0];
        assert_eq!(result["name"], "processOrder");
        assert!(result.get("signature").is_none());
        assert!(result.get("content").is_none());
    }

    #[test]
    fn json_rendering_keeps_requested_fields() {
        let mut rec = record("processOrder");
        rec.signature = Some("public Receipt processOrder(Order order)".into());
        let json = render_json("order", &[rec], Duration::from_millis(3));
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(value["results"][0]["signature"]
            .as_str()
            .unwrap()
            .contains("processOrder"));
    }

    #[test]
    fn snippet_truncates_long_content() {
        let content: String = (0..20).map(|i| format!("line {i}\n")).collect();
        let snippet = snippet_of(&content);
        assert_eq!(snippet.lines().count(), SNIPPET_LINES);
    }
}
