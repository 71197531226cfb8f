use std::collections::{BTreeMap, HashSet};

use anyhow::Result;
use tracing::debug;

use crate::config::SearchConfig;
use crate::graph::RelationshipGraph;
use crate::model::RelationType;
use crate::search::SearchResult;
use crate::store::VectorStore;

/// Seeds taken from the head of the hybrid ranking.
const EXPANSION_SEEDS: usize = 5;

/// Per-type edge weights for the single personalized-PageRank step.
/// Structural containment propagates the most; imports the least.
pub fn edge_weight(relation_type: RelationType) -> f32 {
    match relation_type {
        RelationType::Contains | RelationType::ContainedBy => 0.8,
        RelationType::Calls | RelationType::CalledBy => 0.7,
        RelationType::References | RelationType::ReferencedBy => 0.6,
        RelationType::Extends | RelationType::ExtendedBy => 0.5,
        RelationType::Implements | RelationType::ImplementedBy => 0.5,
        RelationType::Imports | RelationType::ImportedBy => 0.4,
        RelationType::Documents
        | RelationType::DocumentedBy
        | RelationType::Mentions
        | RelationType::MentionedIn
        | RelationType::Annotates
        | RelationType::AnnotatedBy
        | RelationType::DependsOn
        | RelationType::DependedBy
        | RelationType::ImplementsSpec
        | RelationType::ImplementedIn => 0.6,
    }
}

/// One-hop graph expansion over the stored relationship set.
///
/// For each seed, every neighbor receives `seed_score * alpha * w(R)`.
/// Neighbor scores are normalized against the best candidate score and
/// thresholded before the neighbor's payload is fetched.
pub struct GraphExpander<'a> {
    graph: &'a RelationshipGraph,
    config: &'a SearchConfig,
}

impl<'a> GraphExpander<'a> {
    pub fn new(graph: &'a RelationshipGraph, config: &'a SearchConfig) -> Self {
        Self { graph, config }
    }

    pub fn expand(
        &self,
        candidates: &mut Vec<SearchResult>,
        store: &dyn VectorStore,
    ) -> Result<usize> {
        if candidates.is_empty() || self.config.graph_max_hops == 0 {
            return Ok(0);
        }

        let known: HashSet<String> = candidates.iter().map(|c| c.id.clone()).collect();
        let max_score = candidates
            .iter()
            .map(|c| c.score())
            .fold(f32::MIN, f32::max)
            .max(f32::EPSILON);

        // BTreeMap keeps neighbor ordering deterministic.
        let mut neighbor_scores: BTreeMap<String, f32> = BTreeMap::new();
        for seed in candidates.iter().take(EXPANSION_SEEDS) {
            for rel in self.graph.relationships_for(&seed.id) {
                let neighbor_id = if rel.source_id == seed.id {
                    &rel.target_id
                } else {
                    &rel.source_id
                };
                if known.contains(neighbor_id) {
                    continue;
                }
                let contribution =
                    seed.score() * self.config.graph_score_weight * edge_weight(rel.relation_type);
                let entry = neighbor_scores.entry(neighbor_id.clone()).or_insert(0.0);
                if contribution > *entry {
                    *entry = contribution;
                }
            }
        }

        // Normalize into [0, 1] before thresholding: dividing by
        // `alpha * max_candidate_score` leaves `w(R) * (seed/max)`, so a
        // top-seed CONTAINS neighbor scores 0.8 and weak combinations
        // fall away.
        let norm = (self.config.graph_score_weight * max_score).max(f32::EPSILON);
        let admitted: Vec<(String, f32)> = neighbor_scores
            .into_iter()
            .filter(|(_, score)| score / norm >= self.config.graph_ppr_threshold)
            .collect();

        if admitted.is_empty() {
            return Ok(0);
        }

        let ids: Vec<String> = admitted.iter().map(|(id, _)| id.clone()).collect();
        let points = store.retrieve(&ids)?;
        let scores: BTreeMap<&String, f32> = admitted.iter().map(|(id, s)| (id, *s)).collect();

        let mut added = 0usize;
        for point in points {
            let Some(&score) = scores.get(&point.id) else {
                continue;
            };
            let mut result = SearchResult::from_point(&point);
            result.graph_expanded = true;
            result.scoring.base_score = score;
            result.scoring.graph_score = Some(score);
            result.scoring.final_score = score;
            candidates.push(result);
            added += 1;
        }

        debug!(
            "expanded" = added,
            "threshold" = self.config.graph_ppr_threshold,
            "msg" = "graph expansion complete"
        );
        Ok(added)
    }
}
