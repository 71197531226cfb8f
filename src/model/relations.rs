use serde::{Deserialize, Serialize};

/// Directed relation kinds: eleven forward/reverse pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    Calls,
    CalledBy,
    References,
    ReferencedBy,
    Extends,
    ExtendedBy,
    Implements,
    ImplementedBy,
    Contains,
    ContainedBy,
    Imports,
    ImportedBy,
    DependsOn,
    DependedBy,
    Annotates,
    AnnotatedBy,
    Documents,
    DocumentedBy,
    Mentions,
    MentionedIn,
    ImplementsSpec,
    ImplementedIn,
}

impl RelationType {
    pub fn label(&self) -> &'static str {
        match self {
            RelationType::Calls => "calls",
            RelationType::CalledBy => "called_by",
            RelationType::References => "references",
            RelationType::ReferencedBy => "referenced_by",
            RelationType::Extends => "extends",
            RelationType::ExtendedBy => "extended_by",
            RelationType::Implements => "implements",
            RelationType::ImplementedBy => "implemented_by",
            RelationType::Contains => "contains",
            RelationType::ContainedBy => "contained_by",
            RelationType::Imports => "imports",
            RelationType::ImportedBy => "imported_by",
            RelationType::DependsOn => "depends_on",
            RelationType::DependedBy => "depended_by",
            RelationType::Annotates => "annotates",
            RelationType::AnnotatedBy => "annotated_by",
            RelationType::Documents => "documents",
            RelationType::DocumentedBy => "documented_by",
            RelationType::Mentions => "mentions",
            RelationType::MentionedIn => "mentioned_in",
            RelationType::ImplementsSpec => "implements_spec",
            RelationType::ImplementedIn => "implemented_in",
        }
    }

    /// The paired reverse type. Total: every stored forward edge has a
    /// well-defined inverse, and `reverse` is an involution.
    pub fn reverse(&self) -> RelationType {
        match self {
            RelationType::Calls => RelationType::CalledBy,
            RelationType::CalledBy => RelationType::Calls,
            RelationType::References => RelationType::ReferencedBy,
            RelationType::ReferencedBy => RelationType::References,
            RelationType::Extends => RelationType::ExtendedBy,
            RelationType::ExtendedBy => RelationType::Extends,
            RelationType::Implements => RelationType::ImplementedBy,
            RelationType::ImplementedBy => RelationType::Implements,
            RelationType::Contains => RelationType::ContainedBy,
            RelationType::ContainedBy => RelationType::Contains,
            RelationType::Imports => RelationType::ImportedBy,
            RelationType::ImportedBy => RelationType::Imports,
            RelationType::DependsOn => RelationType::DependedBy,
            RelationType::DependedBy => RelationType::DependsOn,
            RelationType::Annotates => RelationType::AnnotatedBy,
            RelationType::AnnotatedBy => RelationType::Annotates,
            RelationType::Documents => RelationType::DocumentedBy,
            RelationType::DocumentedBy => RelationType::Documents,
            RelationType::Mentions => RelationType::MentionedIn,
            RelationType::MentionedIn => RelationType::Mentions,
            RelationType::ImplementsSpec => RelationType::ImplementedIn,
            RelationType::ImplementedIn => RelationType::ImplementsSpec,
        }
    }

    pub const ALL: [RelationType; 22] = [
        RelationType::Calls,
        RelationType::CalledBy,
        RelationType::References,
        RelationType::ReferencedBy,
        RelationType::Extends,
        RelationType::ExtendedBy,
        RelationType::Implements,
        RelationType::ImplementedBy,
        RelationType::Contains,
        RelationType::ContainedBy,
        RelationType::Imports,
        RelationType::ImportedBy,
        RelationType::DependsOn,
        RelationType::DependedBy,
        RelationType::Annotates,
        RelationType::AnnotatedBy,
        RelationType::Documents,
        RelationType::DocumentedBy,
        RelationType::Mentions,
        RelationType::MentionedIn,
        RelationType::ImplementsSpec,
        RelationType::ImplementedIn,
    ];
}

/// A directed edge between two indexed entities.
///
/// Endpoint identity is denormalized so that rendering a relationship
/// never needs a second store round-trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub source_id: String,
    pub source_name: String,
    pub source_type: String,
    pub source_file: String,
    pub source_line: usize,
    pub target_id: String,
    pub target_name: String,
    pub target_type: String,
    pub target_file: String,
    pub target_line: usize,
    pub relation_type: RelationType,
    pub confidence: f32,
}

impl Relationship {
    /// The mirrored edge with the paired reverse type.
    pub fn reversed(&self) -> Relationship {
        Relationship {
            source_id: self.target_id.clone(),
            source_name: self.target_name.clone(),
            source_type: self.target_type.clone(),
            source_file: self.target_file.clone(),
            source_line: self.target_line,
            target_id: self.source_id.clone(),
            target_name: self.source_name.clone(),
            target_type: self.source_type.clone(),
            target_file: self.source_file.clone(),
            target_line: self.source_line,
            relation_type: self.relation_type.reverse(),
            confidence: self.confidence,
        }
    }
}

/// Deduplication key: edges are identical when endpoints and type agree.
pub fn relationship_key(rel: &Relationship) -> (String, String, RelationType) {
    (rel.source_id.clone(), rel.target_id.clone(), rel.relation_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn twenty_two_types_in_eleven_pairs() {
        assert_eq!(RelationType::ALL.len(), 22);
        for ty in RelationType::ALL {
            assert_eq!(ty.reverse().reverse(), ty);
            assert_ne!(ty.reverse(), ty);
        }
    }

    #[test]
    fn labels_are_unique() {
        let mut labels: Vec<&str> = RelationType::ALL.iter().map(|t| t.label()).collect();
        labels.sort_unstable();
        labels.dedup();
        assert_eq!(labels.len(), 22);
    }

    #[test]
    fn reversed_swaps_endpoints_and_type() {
        let rel = Relationship {
            source_id: "a".into(),
            source_name: "caller".into(),
            source_type: "method".into(),
            source_file: "src/a.java".into(),
            source_line: 10,
            target_id: "b".into(),
            target_name: "callee".into(),
            target_type: "function".into(),
            target_file: "src/b.java".into(),
            target_line: 20,
            relation_type: RelationType::Calls,
            confidence: 0.8,
        };
        let rev = rel.reversed();
        assert_eq!(rev.source_id, "b");
        assert_eq!(rev.target_id, "a");
        assert_eq!(rev.relation_type, RelationType::CalledBy);
        assert_eq!(rev.source_line, 20);
        assert_eq!(rev.reversed().relation_type, RelationType::Calls);
    }

    #[test]
    fn dedup_key_ignores_denormalized_fields() {
        let rel = Relationship {
            source_id: "a".into(),
            source_name: "x".into(),
            source_type: "method".into(),
            source_file: "f".into(),
            source_line: 1,
            target_id: "b".into(),
            target_name: "y".into(),
            target_type: "method".into(),
            target_file: "g".into(),
            target_line: 2,
            relation_type: RelationType::References,
            confidence: 0.5,
        };
        let mut other = rel.clone();
        other.source_name = "renamed".into();
        other.confidence = 0.9;
        assert_eq!(relationship_key(&rel), relationship_key(&other));
    }
}
