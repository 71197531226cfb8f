pub mod extractor;

pub use extractor::{ExtractionReport, RelationshipExtractor};

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::model::{relationship_key, RelationType, Relationship};

/// Bidirectional relationship graph.
///
/// Two parallel adjacency maps keyed by entity id; cross-entity links are
/// ids, never pointers, so the graph serializes as a flat blob. For every
/// forward edge the paired reverse edge is stored too, which makes
/// `relationships_for` a plain union without on-the-fly mirroring.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelationshipGraph {
    edges: Vec<Relationship>,
    outgoing: HashMap<String, Vec<usize>>,
    incoming: HashMap<String, Vec<usize>>,
    seen: HashSet<(String, String, RelationType)>,
}

impl RelationshipGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert one directed edge; duplicates by (source, target, type) are
    /// silently ignored.
    pub fn add(&mut self, rel: Relationship) -> bool {
        let key = relationship_key(&rel);
        if !self.seen.insert(key) {
            return false;
        }
        let idx = self.edges.len();
        self.outgoing.entry(rel.source_id.clone()).or_default().push(idx);
        self.incoming.entry(rel.target_id.clone()).or_default().push(idx);
        self.edges.push(rel);
        true
    }

    /// Insert the forward edge and its reverse-typed mirror.
    pub fn add_bidirectional(&mut self, rel: Relationship) {
        let reverse = rel.reversed();
        self.add(rel);
        self.add(reverse);
    }

    pub fn outgoing_of(&self, id: &str) -> Vec<&Relationship> {
        self.outgoing
            .get(id)
            .map(|indices| indices.iter().map(|&i| &self.edges[i]).collect())
            .unwrap_or_default()
    }

    pub fn incoming_of(&self, id: &str) -> Vec<&Relationship> {
        self.incoming
            .get(id)
            .map(|indices| indices.iter().map(|&i| &self.edges[i]).collect())
            .unwrap_or_default()
    }

    /// Union of outgoing and incoming edges, de-duplicated by
    /// (source, target, type).
    pub fn relationships_for(&self, id: &str) -> Vec<&Relationship> {
        let mut seen: HashSet<(String, String, RelationType)> = HashSet::new();
        let mut result = Vec::new();
        for rel in self.outgoing_of(id).into_iter().chain(self.incoming_of(id)) {
            if seen.insert(relationship_key(rel)) {
                result.push(rel);
            }
        }
        result
    }

    pub fn edges(&self) -> &[Relationship] {
        &self.edges
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Drop every edge touching the given file and reindex.
    pub fn remove_file(&mut self, relative_path: &str) {
        let retained: Vec<Relationship> = self
            .edges
            .drain(..)
            .filter(|e| e.source_file != relative_path && e.target_file != relative_path)
            .collect();
        self.rebuild(retained);
    }

    /// Keep only edges whose endpoints are both in the live id set.
    pub fn retain_entities(&mut self, live: &HashSet<String>) {
        let retained: Vec<Relationship> = self
            .edges
            .drain(..)
            .filter(|e| live.contains(&e.source_id) && live.contains(&e.target_id))
            .collect();
        self.rebuild(retained);
    }

    fn rebuild(&mut self, edges: Vec<Relationship>) {
        self.outgoing.clear();
        self.incoming.clear();
        self.seen.clear();
        self.edges = Vec::with_capacity(edges.len());
        for rel in edges {
            self.add(rel);
        }
    }

    pub fn merge(&mut self, other: RelationshipGraph) {
        for rel in other.edges {
            self.add(rel);
        }
    }

    pub fn counts_by_type(&self) -> HashMap<RelationType, usize> {
        let mut counts: HashMap<RelationType, usize> = HashMap::new();
        for edge in &self.edges {
            *counts.entry(edge.relation_type).or_default() += 1;
        }
        counts
    }
}
