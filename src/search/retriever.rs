use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

use crate::config::SearchConfig;
use crate::embedding::{EmbeddingProvider, InstructionType};
use crate::encoder::Bm25fEncoder;
use crate::error::CoreError;
use crate::graph::RelationshipGraph;
use crate::search::{
    apply_boosting, diversity_filter, sort_by_score, CancelFlag, GraphExpander, SearchRequest,
    SearchResult,
};
use crate::store::{FusionMethod, SearchFilters, VectorStore};

/// Relationship line rendered in expanded results.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RelationshipRecord {
    pub relation: String,
    pub name: String,
    pub r#type: String,
    pub file: String,
    pub line: usize,
}

/// The five-stage search pipeline: embed, hybrid fuse, expand, boost,
/// diversify.
pub struct Retriever {
    store: Arc<dyn VectorStore>,
    provider: Arc<dyn EmbeddingProvider>,
    encoder: Bm25fEncoder,
    config: SearchConfig,
    graph: RelationshipGraph,
}

impl Retriever {
    pub fn new(
        store: Arc<dyn VectorStore>,
        provider: Arc<dyn EmbeddingProvider>,
        encoder: Bm25fEncoder,
        config: SearchConfig,
    ) -> Result<Self> {
        let graph = store.load_graph()?.unwrap_or_default();
        Ok(Self {
            store,
            provider,
            encoder,
            config,
            graph,
        })
    }

    pub fn search(&self, request: &SearchRequest, cancel: &CancelFlag) -> Result<Vec<SearchResult>> {
        let query = request.query.trim();
        if query.is_empty() {
            return Err(CoreError::EmptyQuery.into());
        }
        let limit = if request.limit == 0 {
            self.config.default_limit
        } else {
            request.limit
        };

        // Stage 1: query encoding, dense and sparse.
        let q_dense = self
            .provider
            .embed_one(query, InstructionType::Nl2CodeQuery)
            .map_err(|e| CoreError::Embedding(e.to_string()))?;
        let q_sparse = self.encoder.encode_query(query);

        if cancel.load(Ordering::SeqCst) {
            return Err(CoreError::Cancelled.into());
        }

        // Stage 2: hybrid search with rank fusion in the store.
        let filters = SearchFilters {
            language: request.language.clone(),
            object_type: request.object_type.clone(),
            file_path: request.file_path.clone(),
        };
        let hits = self
            .store
            .search(&q_dense, &q_sparse, limit, &filters, FusionMethod::Rrf)
            .map_err(|e| CoreError::Search(e.to_string()))?;
        let mut results: Vec<SearchResult> = hits.iter().map(SearchResult::from_point).collect();
        debug!("candidates" = results.len(), "msg" = "hybrid search complete");

        if cancel.load(Ordering::SeqCst) {
            return Err(CoreError::Cancelled.into());
        }

        // Stage 3: one-hop graph expansion.
        if self.config.enable_graph_expansion && !self.graph.is_empty() {
            GraphExpander::new(&self.graph, &self.config)
                .expand(&mut results, self.store.as_ref())?;
        }

        // Stage 4: type/name boosts and the pre-computed score weight.
        apply_boosting(
            &mut results,
            query,
            self.encoder.tokenizer(),
            &self.config.type_boosting,
        );
        sort_by_score(&mut results);

        // Stage 5: per-file diversity with a preserved head.
        let mut results = diversity_filter(results, &self.config);

        if request.min_score > 0.0 {
            results.retain(|r| r.score() >= request.min_score);
        }
        results.truncate(limit);

        if cancel.load(Ordering::SeqCst) {
            return Err(CoreError::Cancelled.into());
        }
        Ok(results)
    }

    /// Relationship rendering for expanded output: outgoing and incoming
    /// edges of the entity, with a total count for truncated display.
    pub fn relationships_of(&self, id: &str, sample: usize) -> (Vec<RelationshipRecord>, usize) {
        let rels = self.graph.relationships_for(id);
        let total = rels.len();
        let records = rels
            .into_iter()
            .take(sample)
            .map(|rel| {
                if rel.source_id == id {
                    RelationshipRecord {
                        relation: rel.relation_type.label().to_string(),
                        name: rel.target_name.clone(),
                        r#type: rel.target_type.clone(),
                        file: rel.target_file.clone(),
                        line: rel.target_line,
                    }
                } else {
                    RelationshipRecord {
                        relation: rel.relation_type.reverse().label().to_string(),
                        name: rel.source_name.clone(),
                        r#type: rel.source_type.clone(),
                        file: rel.source_file.clone(),
                        line: rel.source_line,
                    }
                }
            })
            .collect();
        (records, total)
    }

    /// Direct callers of an entity, for impact rendering.
    pub fn direct_callers(&self, id: &str) -> Vec<String> {
        self.graph
            .incoming_of(id)
            .into_iter()
            .filter(|rel| rel.relation_type == crate::model::RelationType::Calls)
            .map(|rel| rel.source_name.clone())
            .collect()
    }
}
