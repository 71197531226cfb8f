use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::{DocumentNode, NodeType};
use crate::parsers::{ParsedFile, SourceParser};

static ENV_REFERENCE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap());
static YAML_KEY_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\s*)([A-Za-z_][\w.-]*)\s*:(.*)$").unwrap());
static PROPERTIES_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z_][\w.-]*)\s*[=:]\s*(.*)$").unwrap());

/// Config parser: emits one `config_key` node per top-level section, with
/// flattened dotted keys and `${VAR}` references in metadata.
pub struct ConfigParser {
    format: &'static str,
}

impl ConfigParser {
    pub fn new(format: &str) -> Self {
        let format = match format {
            "yaml" => "yaml",
            "json" => "json",
            _ => "properties",
        };
        Self { format }
    }
}

impl SourceParser for ConfigParser {
    fn language(&self) -> &'static str {
        self.format
    }

    fn parse(&self, relative_path: &str, source: &str) -> Result<ParsedFile> {
        let sections = match self.format {
            "yaml" => parse_yaml_sections(source),
            "json" => parse_json_sections(source),
            _ => parse_properties_sections(source),
        };

        let mut parsed = ParsedFile::default();
        let total = sections.len();
        for (chunk_index, section) in sections.into_iter().enumerate() {
            let mut node = DocumentNode::new(
                NodeType::ConfigKey,
                relative_path,
                chunk_index,
                section.start_line,
                section.end_line,
                section.content.clone(),
            );
            node.title = Some(section.name.clone());
            node.total_chunks = total;
            node.metadata.config_format = Some(self.format.to_string());
            node.metadata.config_keys = section.keys;
            node.metadata.section_depth = Some(section.depth);
            node.metadata.env_references = extract_env_references(&section.content);
            parsed.documents.push(node);
        }

        Ok(parsed)
    }
}

struct ConfigSection {
    name: String,
    keys: Vec<String>,
    depth: usize,
    start_line: usize,
    end_line: usize,
    content: String,
}

fn parse_yaml_sections(source: &str) -> Vec<ConfigSection> {
    let lines: Vec<&str> = source.lines().collect();
    let mut sections: Vec<ConfigSection> = Vec::new();
    // (indent, key) path to the current position.
    let mut key_stack: Vec<(usize, String)> = Vec::new();

    for (i, line) in lines.iter().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed == "---" {
            continue;
        }
        let Some(caps) = YAML_KEY_PATTERN.captures(line) else {
            continue;
        };
        let indent = caps.get(1).unwrap().as_str().len();
        let key = caps.get(2).unwrap().as_str().to_string();
        let value = caps.get(3).unwrap().as_str().trim();

        while let Some(&(top_indent, _)) = key_stack.last() {
            if indent <= top_indent {
                key_stack.pop();
            } else {
                break;
            }
        }

        if indent == 0 {
            sections.push(ConfigSection {
                name: key.clone(),
                keys: Vec::new(),
                depth: 1,
                start_line: i + 1,
                end_line: i + 1,
                content: String::new(),
            });
        }
        key_stack.push((indent, key));

        if let Some(section) = sections.last_mut() {
            let dotted: Vec<String> = key_stack.iter().map(|(_, k)| k.clone()).collect();
            let depth = dotted.len();
            if !value.is_empty() || depth > 1 {
                section.keys.push(dotted.join("."));
            }
            section.depth = section.depth.max(depth);
            section.end_line = i + 1;
        }
    }

    for section in &mut sections {
        section.content = lines[section.start_line - 1..section.end_line].join("\n");
        section.keys.dedup();
    }
    sections
}

fn parse_json_sections(source: &str) -> Vec<ConfigSection> {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(source) else {
        return Vec::new();
    };
    let Some(object) = value.as_object() else {
        return Vec::new();
    };

    object
        .iter()
        .map(|(name, subtree)| {
            let mut keys = Vec::new();
            flatten_json(name, subtree, &mut keys);
            let depth = keys
                .iter()
                .map(|k| k.matches('.').count() + 1)
                .max()
                .unwrap_or(1);
            let (start_line, end_line) = locate_key(source, name);
            ConfigSection {
                name: name.clone(),
                keys,
                depth,
                start_line,
                end_line,
                content: serde_json::to_string_pretty(&serde_json::json!({ name: subtree }))
                    .unwrap_or_default(),
            }
        })
        .collect()
}

fn flatten_json(prefix: &str, value: &serde_json::Value, keys: &mut Vec<String>) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, child) in map {
                flatten_json(&format!("{prefix}.{key}"), child, keys);
            }
        }
        _ => keys.push(prefix.to_string()),
    }
}

fn locate_key(source: &str, key: &str) -> (usize, usize) {
    let needle = format!("\"{key}\"");
    for (i, line) in source.lines().enumerate() {
        if line.contains(&needle) {
            return (i + 1, i + 1);
        }
    }
    (1, 1)
}

fn parse_properties_sections(source: &str) -> Vec<ConfigSection> {
    let mut keys = Vec::new();
    let mut first_line = 0usize;
    let mut last_line = 0usize;

    for (i, line) in source.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with('!') {
            continue;
        }
        if let Some(caps) = PROPERTIES_PATTERN.captures(trimmed) {
            keys.push(caps.get(1).unwrap().as_str().to_string());
            if first_line == 0 {
                first_line = i + 1;
            }
            last_line = i + 1;
        }
    }

    if keys.is_empty() {
        return Vec::new();
    }
    let depth = keys.iter().map(|k| k.matches('.').count() + 1).max().unwrap_or(1);
    vec![ConfigSection {
        name: "properties".to_string(),
        keys,
        depth,
        start_line: first_line.max(1),
        end_line: last_line.max(1),
        content: source.to_string(),
    }]
}

fn extract_env_references(content: &str) -> Vec<String> {
    let mut refs: Vec<String> = Vec::new();
    for caps in ENV_REFERENCE_PATTERN.captures_iter(content) {
        let name = caps.get(1).unwrap().as_str().to_string();
        if !refs.contains(&name) {
            refs.push(name);
        }
    }
    refs
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML_SAMPLE: &str = r#"
server:
  host: 0.0.0.0
  port: 8080
  tls:
    enabled: true

database:
  url: ${DATABASE_URL}
  pool_size: 10
"#;

    #[test]
    fn yaml_sections_become_config_nodes() {
        let parsed = ConfigParser::new("yaml")
            .parse("config/app.yaml", YAML_SAMPLE)
            .unwrap();
        assert_eq!(parsed.documents.len(), 2);

        let server = &parsed.documents[0];
        assert_eq!(server.node_type, NodeType::ConfigKey);
        assert_eq!(server.title.as_deref(), Some("server"));
        assert!(server.metadata.config_keys.contains(&"server.host".to_string()));
        assert!(server
            .metadata
            .config_keys
            .contains(&"server.tls.enabled".to_string()));
        assert_eq!(server.metadata.section_depth, Some(3));
        assert_eq!(server.metadata.config_format.as_deref(), Some("yaml"));
    }

    #[test]
    fn yaml_env_references_are_recorded() {
        let parsed = ConfigParser::new("yaml")
            .parse("config/app.yaml", YAML_SAMPLE)
            .unwrap();
        let database = &parsed.documents[1];
        assert_eq!(database.metadata.env_references, vec!["DATABASE_URL"]);
    }

    #[test]
    fn json_sections_flatten_keys() {
        let source = r#"{
  "auth": { "enabled": true, "provider": "oauth" },
  "limits": { "rate": { "per_minute": 60 } }
}"#;
        let parsed = ConfigParser::new("json")
            .parse("config/settings.json", source)
            .unwrap();
        assert_eq!(parsed.documents.len(), 2);
        let auth = parsed
            .documents
            .iter()
            .find(|d| d.title.as_deref() == Some("auth"))
            .unwrap();
        assert!(auth.metadata.config_keys.contains(&"auth.enabled".to_string()));
        let limits = parsed
            .documents
            .iter()
            .find(|d| d.title.as_deref() == Some("limits"))
            .unwrap();
        assert!(limits
            .metadata
            .config_keys
            .contains(&"limits.rate.per_minute".to_string()));
        assert_eq!(limits.metadata.section_depth, Some(3));
    }

    #[test]
    fn invalid_json_produces_no_nodes() {
        let parsed = ConfigParser::new("json")
            .parse("config/broken.json", "{ nope")
            .unwrap();
        assert!(parsed.documents.is_empty());
    }

    #[test]
    fn properties_become_single_node() {
        let source = "db.url=${DB_URL}\ndb.pool=5\napp.name=shop\n";
        let parsed = ConfigParser::new("properties")
            .parse("config/app.properties", source)
            .unwrap();
        assert_eq!(parsed.documents.len(), 1);
        let node = &parsed.documents[0];
        assert_eq!(node.metadata.config_keys.len(), 3);
        assert!(node.metadata.config_keys.contains(&"db.url".to_string()));
        assert_eq!(node.metadata.env_references, vec!["DB_URL"]);
        assert_eq!(node.metadata.section_depth, Some(2));
    }

    #[test]
    fn node_ids_are_deterministic() {
        let a = ConfigParser::new("yaml")
            .parse("config/app.yaml", YAML_SAMPLE)
            .unwrap();
        let b = ConfigParser::new("yaml")
            .parse("config/app.yaml", YAML_SAMPLE)
            .unwrap();
        let ids = |p: &ParsedFile| -> Vec<String> {
            p.documents.iter().map(|d| d.id.clone()).collect()
        };
        assert_eq!(ids(&a), ids(&b));
    }
}
