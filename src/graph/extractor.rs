use std::collections::HashMap;

use tracing::debug;

use crate::graph::RelationshipGraph;
use crate::model::{CodeObject, DocumentNode, NodeType, ObjectType, RelationType, Relationship};
use crate::parsers::{PendingReference, ReferenceKind};

/// Cross-file resolution outcome, reported with the index summary.
#[derive(Debug, Clone, Default)]
pub struct ExtractionReport {
    pub resolved: usize,
    pub unresolved: usize,
    pub ambiguous: usize,
}

/// Resolves name-based references against the project-wide object index
/// and writes every resolved edge bidirectionally.
///
/// Resolution prefers an exact qualified-name match, then a unique
/// simple-name match; ambiguous or unknown names are dropped and counted,
/// never fatal.
pub struct RelationshipExtractor<'a> {
    objects: &'a [CodeObject],
    by_id: HashMap<&'a str, usize>,
    by_name: HashMap<&'a str, Vec<usize>>,
    by_qualified: HashMap<&'a str, usize>,
}

impl<'a> RelationshipExtractor<'a> {
    pub fn new(objects: &'a [CodeObject]) -> Self {
        let mut by_id = HashMap::new();
        let mut by_name: HashMap<&str, Vec<usize>> = HashMap::new();
        let mut by_qualified = HashMap::new();

        for (idx, object) in objects.iter().enumerate() {
            by_id.insert(object.id.as_str(), idx);
            if object.object_type != ObjectType::Import {
                by_name.entry(object.name.as_str()).or_default().push(idx);
                by_qualified.insert(object.qualified_name.as_str(), idx);
            }
        }

        Self {
            objects,
            by_id,
            by_name,
            by_qualified,
        }
    }

    /// Build the full graph: intra-file edges first, then cross-file
    /// resolution, then document back-references.
    pub fn extract(
        &self,
        intra_file: &[Relationship],
        references: &[PendingReference],
        documents: &[DocumentNode],
    ) -> (RelationshipGraph, ExtractionReport) {
        let mut graph = RelationshipGraph::new();
        let mut report = ExtractionReport::default();

        for rel in intra_file {
            graph.add_bidirectional(rel.clone());
            report.resolved += 1;
        }

        for reference in references {
            match self.resolve(reference) {
                Resolution::Edge(rel) => {
                    graph.add_bidirectional(rel);
                    report.resolved += 1;
                }
                Resolution::Ambiguous => report.ambiguous += 1,
                Resolution::Unknown => report.unresolved += 1,
            }
        }

        for document in documents {
            for code_ref in &document.metadata.related_code {
                match self.lookup(code_ref) {
                    Some(target) => {
                        let relation_type = if document.node_type == NodeType::Heading {
                            RelationType::Documents
                        } else {
                            RelationType::Mentions
                        };
                        graph.add_bidirectional(document_edge(document, target, relation_type));
                        report.resolved += 1;
                    }
                    None => report.unresolved += 1,
                }
            }
        }

        debug!(
            "resolved" = report.resolved,
            "unresolved" = report.unresolved,
            "ambiguous" = report.ambiguous,
            "msg" = "relationship extraction complete"
        );
        (graph, report)
    }

    fn resolve(&self, reference: &PendingReference) -> Resolution {
        let Some(&source_idx) = self.by_id.get(reference.source_id.as_str()) else {
            return Resolution::Unknown;
        };
        let source = &self.objects[source_idx];

        let (relation_type, confidence, candidate_filter): (
            RelationType,
            f32,
            fn(&CodeObject) -> bool,
        ) = match reference.kind {
            ReferenceKind::Call => (RelationType::Calls, 0.8, |o| {
                matches!(o.object_type, ObjectType::Method | ObjectType::Function)
            }),
            ReferenceKind::Reference | ReferenceKind::TypeDependency => {
                (RelationType::References, 0.6, |o| {
                    !matches!(o.object_type, ObjectType::Import)
                })
            }
            ReferenceKind::Extend => (RelationType::Extends, 0.8, |o| {
                matches!(
                    o.object_type,
                    ObjectType::Class | ObjectType::Interface | ObjectType::Enum
                )
            }),
            ReferenceKind::Implement => (RelationType::Implements, 0.8, |o| {
                matches!(o.object_type, ObjectType::Interface | ObjectType::Class)
            }),
            ReferenceKind::Import => (RelationType::Imports, 0.7, |o| {
                !matches!(o.object_type, ObjectType::Import)
            }),
            ReferenceKind::Annotation => (RelationType::Annotates, 0.6, |o| {
                matches!(o.object_type, ObjectType::Class | ObjectType::Interface)
            }),
        };

        let same_language_required = matches!(
            reference.kind,
            ReferenceKind::Extend | ReferenceKind::Implement
        );

        let target_idx = match self.by_qualified.get(reference.name.as_str()) {
            Some(&idx) => Some(idx),
            None => {
                let candidates: Vec<usize> = self
                    .by_name
                    .get(reference.name.as_str())
                    .map(|indices| {
                        indices
                            .iter()
                            .copied()
                            .filter(|&idx| {
                                let object = &self.objects[idx];
                                object.id != source.id && candidate_filter(object)
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                match candidates.len() {
                    0 => return Resolution::Unknown,
                    1 => Some(candidates[0]),
                    _ => return Resolution::Ambiguous,
                }
            }
        };

        let Some(target_idx) = target_idx else {
            return Resolution::Unknown;
        };
        let target = &self.objects[target_idx];
        if target.id == source.id {
            return Resolution::Unknown;
        }
        if same_language_required && target.language != source.language {
            // Cross-language inheritance is noise from name collisions.
            return Resolution::Unknown;
        }

        // Annotations point from the annotation type at the annotated
        // object, so the resolved edge runs target-to-source.
        let rel = if reference.kind == ReferenceKind::Annotation {
            object_edge(target, source, RelationType::Annotates, confidence)
        } else {
            object_edge(source, target, relation_type, confidence)
        };
        Resolution::Edge(rel)
    }

    fn lookup(&self, name: &str) -> Option<&CodeObject> {
        if let Some(&idx) = self.by_qualified.get(name) {
            return Some(&self.objects[idx]);
        }
        let candidates = self.by_name.get(name)?;
        if candidates.len() == 1 {
            return Some(&self.objects[candidates[0]]);
        }
        None
    }
}

enum Resolution {
    Edge(Relationship),
    Ambiguous,
    Unknown,
}

fn object_edge(
    source: &CodeObject,
    target: &CodeObject,
    relation_type: RelationType,
    confidence: f32,
) -> Relationship {
    Relationship {
        source_id: source.id.clone(),
        source_name: source.name.clone(),
        source_type: source.object_type.label().to_string(),
        source_file: source.relative_path.clone(),
        source_line: source.start_line,
        target_id: target.id.clone(),
        target_name: target.name.clone(),
        target_type: target.object_type.label().to_string(),
        target_file: target.relative_path.clone(),
        target_line: target.start_line,
        relation_type,
        confidence,
    }
}

fn document_edge(
    document: &DocumentNode,
    target: &CodeObject,
    relation_type: RelationType,
) -> Relationship {
    Relationship {
        source_id: document.id.clone(),
        source_name: document.display_name(),
        source_type: document.node_type.label().to_string(),
        source_file: document.relative_path.clone(),
        source_line: document.start_line,
        target_id: target.id.clone(),
        target_name: target.name.clone(),
        target_type: target.object_type.label().to_string(),
        target_file: target.relative_path.clone(),
        target_line: target.start_line,
        relation_type,
        confidence: 0.7,
    }
}
