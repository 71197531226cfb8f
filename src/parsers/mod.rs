mod common;
mod config_files;
mod javascript;
mod jvm;
mod markdown;
mod python;

pub use common::{compute_ast_metadata, contains_edge};
pub use config_files::ConfigParser;
pub use javascript::JsParser;
pub use jvm::JvmParser;
pub use markdown::MarkdownParser;
pub use python::PythonParser;

use std::path::Path;

use anyhow::Result;

use crate::model::{CodeObject, DocumentNode, Relationship};

/// An unresolved reference collected during parsing, resolved against the
/// project-wide object index by the relationship extractor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingReference {
    pub source_id: String,
    pub name: String,
    pub kind: ReferenceKind,
    pub line: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceKind {
    Call,
    Reference,
    Extend,
    Implement,
    Import,
    Annotation,
    TypeDependency,
}

/// Everything a parser can produce for one file.
#[derive(Debug, Default)]
pub struct ParsedFile {
    pub objects: Vec<CodeObject>,
    pub documents: Vec<DocumentNode>,
    /// Intra-file edges where both endpoints are already known (CONTAINS).
    pub relationships: Vec<Relationship>,
    /// Name-based references for cross-file resolution.
    pub references: Vec<PendingReference>,
}

/// Parser contract: given source text, produce code objects, document
/// chunks, and intra-file relationships. A parser may fail for an
/// individual file; indexing logs the failure and continues.
pub trait SourceParser: Send + Sync {
    fn language(&self) -> &'static str;
    fn parse(&self, relative_path: &str, source: &str) -> Result<ParsedFile>;
}

/// Map a file extension to its language label.
pub fn detect_language(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_string_lossy().to_ascii_lowercase();
    match ext.as_str() {
        "py" => Some("python"),
        "java" => Some("java"),
        "kt" | "kts" => Some("kotlin"),
        "js" | "jsx" | "mjs" | "cjs" => Some("javascript"),
        "ts" | "tsx" => Some("typescript"),
        "md" | "markdown" => Some("markdown"),
        "yaml" | "yml" => Some("yaml"),
        "json" => Some("json"),
        "properties" => Some("properties"),
        _ => None,
    }
}

/// Closed parser registry, selected at composition time. No open-world
/// plugin loading: adding a language means adding an arm here.
pub fn parser_for(language: &str) -> Option<Box<dyn SourceParser>> {
    match language {
        "python" => Some(Box::new(PythonParser)),
        "java" => Some(Box::new(JvmParser::java())),
        "kotlin" => Some(Box::new(JvmParser::kotlin())),
        "javascript" => Some(Box::new(JsParser::javascript())),
        "typescript" => Some(Box::new(JsParser::typescript())),
        "markdown" => Some(Box::new(MarkdownParser::default())),
        "yaml" | "json" | "properties" => Some(Box::new(ConfigParser::new(language))),
        _ => None,
    }
}
