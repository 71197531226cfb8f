mod relations;
mod state;

pub use relations::{relationship_key, RelationType, Relationship};
pub use state::{FileChecksum, IndexState, IndexSummary};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Semantic kinds of extracted code fragments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectType {
    Class,
    Interface,
    Enum,
    Method,
    Function,
    Field,
    Variable,
    Constant,
    Property,
    Type,
    Import,
}

impl ObjectType {
    pub fn label(&self) -> &'static str {
        match self {
            ObjectType::Class => "class",
            ObjectType::Interface => "interface",
            ObjectType::Enum => "enum",
            ObjectType::Method => "method",
            ObjectType::Function => "function",
            ObjectType::Field => "field",
            ObjectType::Variable => "variable",
            ObjectType::Constant => "constant",
            ObjectType::Property => "property",
            ObjectType::Type => "type",
            ObjectType::Import => "import",
        }
    }

    pub fn parse(label: &str) -> Option<Self> {
        match label.to_ascii_lowercase().as_str() {
            "class" => Some(ObjectType::Class),
            "interface" => Some(ObjectType::Interface),
            "enum" => Some(ObjectType::Enum),
            "method" => Some(ObjectType::Method),
            "function" => Some(ObjectType::Function),
            "field" => Some(ObjectType::Field),
            "variable" => Some(ObjectType::Variable),
            "constant" => Some(ObjectType::Constant),
            "property" => Some(ObjectType::Property),
            "type" => Some(ObjectType::Type),
            "import" => Some(ObjectType::Import),
            _ => None,
        }
    }

    /// Container kinds keep collecting nested members during parsing.
    pub fn is_container(&self) -> bool {
        matches!(self, ObjectType::Class | ObjectType::Interface | ObjectType::Enum)
    }
}

/// Kinds of document chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Heading,
    Paragraph,
    CodeBlock,
    ConfigKey,
}

impl NodeType {
    pub fn label(&self) -> &'static str {
        match self {
            NodeType::Heading => "heading",
            NodeType::Paragraph => "paragraph",
            NodeType::CodeBlock => "code_block",
            NodeType::ConfigKey => "config_key",
        }
    }
}

/// Complexity figures computed by the AST parsers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AstMetadata {
    pub cyclomatic_complexity: u32,
    pub cognitive_complexity: u32,
    pub nesting_depth: u32,
    pub lines_of_code: u32,
    pub complexity_rating: char,
}

/// A semantic code fragment extracted from a source file.
///
/// The id is a deterministic function of where the fragment lives and what
/// it is, so re-parsing unchanged input always reproduces the same ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeObject {
    pub id: String,
    pub name: String,
    pub qualified_name: String,
    pub object_type: ObjectType,
    pub language: String,
    pub file_path: String,
    pub relative_path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub content: String,
    pub signature: String,
    pub docstring: String,
    pub checksum: String,
    pub parent_id: Option<String>,
    pub score_weight: f32,
    pub token_count: usize,
    pub metadata: AstMetadata,
}

impl CodeObject {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: String,
        qualified_name: String,
        object_type: ObjectType,
        language: &str,
        relative_path: &str,
        start_line: usize,
        end_line: usize,
        content: String,
    ) -> Self {
        let relative_path = normalize_path(relative_path);
        let id = deterministic_id(&[
            &relative_path,
            &qualified_name,
            object_type.label(),
            &start_line.to_string(),
        ]);
        let checksum = content_checksum(&content);
        Self {
            id,
            name,
            qualified_name,
            object_type,
            language: language.to_string(),
            file_path: relative_path.clone(),
            relative_path,
            start_line,
            end_line,
            content,
            signature: String::new(),
            docstring: String::new(),
            checksum,
            parent_id: None,
            score_weight: 1.0,
            token_count: 0,
            metadata: AstMetadata::default(),
        }
    }
}

/// A chunk of documentation or configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentNode {
    pub id: String,
    pub node_type: NodeType,
    pub title: Option<String>,
    pub content: String,
    pub file_path: String,
    pub relative_path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub level: Option<usize>,
    pub parent_id: Option<String>,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub checksum: String,
    pub metadata: DocMetadata,
}

/// Chunk metadata: code back-references and config intelligence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocMetadata {
    pub related_code: Vec<String>,
    pub config_keys: Vec<String>,
    pub config_format: Option<String>,
    pub env_references: Vec<String>,
    pub section_depth: Option<usize>,
}

impl DocumentNode {
    pub fn new(
        node_type: NodeType,
        relative_path: &str,
        chunk_index: usize,
        start_line: usize,
        end_line: usize,
        content: String,
    ) -> Self {
        let relative_path = normalize_path(relative_path);
        let id = deterministic_id(&[
            &relative_path,
            node_type.label(),
            &start_line.to_string(),
            &chunk_index.to_string(),
        ]);
        let checksum = content_checksum(&content);
        Self {
            id,
            node_type,
            title: None,
            content,
            file_path: relative_path.clone(),
            relative_path,
            start_line,
            end_line,
            level: None,
            parent_id: None,
            chunk_index,
            total_chunks: 1,
            checksum,
            metadata: DocMetadata::default(),
        }
    }

    pub fn display_name(&self) -> String {
        if let Some(title) = &self.title {
            return title.clone();
        }
        self.relative_path
            .rsplit('/')
            .next()
            .unwrap_or(&self.relative_path)
            .to_string()
    }
}

/// Deterministic entity id: the first 32 hex digits of SHA-256 over the
/// colon-joined identity parts. Bit-exact across platforms and processes.
pub fn deterministic_id(parts: &[&str]) -> String {
    let joined = parts.join(":");
    let digest = Sha256::digest(joined.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex[..32].to_string()
}

/// Fast content checksum for change detection; not used for identity.
pub fn content_checksum(content: &str) -> String {
    blake3::hash(content.as_bytes()).to_hex().to_string()
}

/// Project-relative forward-slash form used everywhere paths are compared.
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
        .trim_start_matches("./")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_object() -> CodeObject {
        CodeObject::new(
            "processOrder".into(),
            "OrderService.processOrder".into(),
            ObjectType::Method,
            "java",
            "src/main/java/OrderService.java",
            42,
            80,
            "public void processOrder(Order order) { validate(order); }".into(),
        )
    }

    #[test]
    fn code_object_ids_are_deterministic() {
        let a = sample_object();
        let b = sample_object();
        assert_eq!(a.id, b.id);
        assert_eq!(a.checksum, b.checksum);
        assert_eq!(a.id.len(), 32);
    }

    #[test]
    fn code_object_id_changes_with_location() {
        let a = sample_object();
        let mut moved = sample_object();
        moved = CodeObject::new(
            moved.name,
            moved.qualified_name,
            moved.object_type,
            &moved.language,
            &moved.relative_path,
            43,
            81,
            moved.content,
        );
        assert_ne!(a.id, moved.id);
    }

    #[test]
    fn code_object_id_changes_with_type() {
        let method = sample_object();
        let function = CodeObject::new(
            method.name.clone(),
            method.qualified_name.clone(),
            ObjectType::Function,
            &method.language,
            &method.relative_path,
            method.start_line,
            method.end_line,
            method.content.clone(),
        );
        assert_ne!(method.id, function.id);
    }

    #[test]
    fn paths_are_normalized_to_forward_slashes() {
        let object = CodeObject::new(
            "f".into(),
            "f".into(),
            ObjectType::Function,
            "python",
            "src\\module\\util.py",
            1,
            2,
            "def f(): pass".into(),
        );
        assert_eq!(object.relative_path, "src/module/util.py");
    }

    #[test]
    fn document_node_ids_depend_on_chunk_index() {
        let a = DocumentNode::new(NodeType::Paragraph, "docs/guide.md", 0, 1, 10, "text".into());
        let b = DocumentNode::new(NodeType::Paragraph, "docs/guide.md", 1, 1, 10, "text".into());
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn document_display_name_prefers_title() {
        let mut node =
            DocumentNode::new(NodeType::Heading, "docs/api-design.md", 0, 1, 5, "# API".into());
        assert_eq!(node.display_name(), "api-design.md");
        node.title = Some("API Design".into());
        assert_eq!(node.display_name(), "API Design");
    }

    #[test]
    fn object_type_labels_round_trip() {
        for ty in [
            ObjectType::Class,
            ObjectType::Interface,
            ObjectType::Enum,
            ObjectType::Method,
            ObjectType::Function,
            ObjectType::Field,
            ObjectType::Variable,
            ObjectType::Constant,
            ObjectType::Property,
            ObjectType::Type,
            ObjectType::Import,
        ] {
            assert_eq!(ObjectType::parse(ty.label()), Some(ty));
        }
        assert_eq!(ObjectType::parse("widget"), None);
    }

    #[test]
    fn container_kinds_are_flagged() {
        assert!(ObjectType::Class.is_container());
        assert!(ObjectType::Interface.is_container());
        assert!(!ObjectType::Function.is_container());
    }

    #[test]
    fn checksum_ignores_nothing() {
        assert_ne!(content_checksum("a"), content_checksum("b"));
        assert_eq!(content_checksum("same"), content_checksum("same"));
    }
}
