mod expand;
mod retriever;
mod scoring;

pub use expand::{edge_weight, GraphExpander};
pub use retriever::{RelationshipRecord, Retriever};
pub use scoring::{apply_boosting, diversity_filter, name_boost, sort_by_score};

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use serde::Serialize;

use crate::store::ScoredPoint;

/// Cooperative cancellation: set once, observed at every stage boundary.
pub type CancelFlag = Arc<AtomicBool>;

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub limit: usize,
    pub language: Option<String>,
    pub object_type: Option<String>,
    pub file_path: Option<String>,
    pub min_score: f32,
}

impl SearchRequest {
    pub fn new(query: &str, limit: usize) -> Self {
        Self {
            query: query.to_string(),
            limit,
            language: None,
            object_type: None,
            file_path: None,
            min_score: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultKind {
    Code,
    Document,
}

/// Score components kept separate so the ranking stages stay auditable.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Scoring {
    pub base_score: f32,
    pub graph_score: Option<f32>,
    pub type_boost: f32,
    pub name_boost: f32,
    pub score_weight: f32,
    pub final_score: f32,
}

/// Complexity figures surfaced in expanded output.
#[derive(Debug, Clone, Serialize)]
pub struct ComplexityView {
    pub cyclomatic: u32,
    pub cognitive: u32,
    pub nesting_depth: u32,
    pub lines_of_code: u32,
    pub rating: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub id: String,
    pub result_type: ResultKind,
    pub name: String,
    pub qualified_name: String,
    pub type_label: String,
    pub language: String,
    pub relative_path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub content: String,
    pub signature: String,
    pub docstring: String,
    pub parent_id: Option<String>,
    pub graph_expanded: bool,
    pub complexity: Option<ComplexityView>,
    pub scoring: Scoring,
}

impl SearchResult {
    pub fn score(&self) -> f32 {
        self.scoring.final_score
    }

    /// Build a result from a stored payload and its fused score.
    pub fn from_point(point: &ScoredPoint) -> Self {
        let result_type = if point.payload_str("type") == "document" {
            ResultKind::Document
        } else {
            ResultKind::Code
        };
        let type_label = match result_type {
            ResultKind::Code => point.payload_str("object_type"),
            ResultKind::Document => point.payload_str("node_type"),
        };
        let name = match result_type {
            ResultKind::Code => {
                let name = point.payload_str("name");
                if name.is_empty() {
                    point.payload_str("qualified_name")
                } else {
                    name
                }
            }
            ResultKind::Document => {
                let title = point.payload_str("title");
                if title.is_empty() {
                    point
                        .payload_str("relative_path")
                        .rsplit('/')
                        .next()
                        .unwrap_or_default()
                        .to_string()
                } else {
                    title
                }
            }
        };
        let parent_id = {
            let value = point.payload_str("parent_id");
            if value.is_empty() {
                None
            } else {
                Some(value)
            }
        };

        let complexity = point
            .payload
            .get("cyclomatic_complexity")
            .and_then(|v| v.as_u64())
            .map(|cyclomatic| ComplexityView {
                cyclomatic: cyclomatic as u32,
                cognitive: point.payload_usize("cognitive_complexity") as u32,
                nesting_depth: point.payload_usize("nesting_depth") as u32,
                lines_of_code: point.payload_usize("lines_of_code") as u32,
                rating: point.payload_str("complexity_rating"),
            });

        SearchResult {
            id: point.id.clone(),
            result_type,
            name,
            qualified_name: point.payload_str("qualified_name"),
            type_label,
            language: point.payload_str("language"),
            relative_path: point.payload_str("relative_path"),
            start_line: point.payload_usize("start_line"),
            end_line: point.payload_usize("end_line"),
            content: point.payload_str("content"),
            signature: point.payload_str("signature"),
            docstring: point.payload_str("docstring"),
            parent_id,
            graph_expanded: false,
            complexity,
            scoring: Scoring {
                base_score: point.score,
                graph_score: None,
                type_boost: 0.0,
                name_boost: 0.0,
                score_weight: point.payload_f32("score_weight", 1.0),
                final_score: point.score,
            },
        }
    }
}
