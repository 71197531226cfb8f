pub mod embedded;

pub use embedded::EmbeddedStore;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::encoder::SparseVector;
use crate::error::CoreError;
use crate::graph::RelationshipGraph;
use crate::model::IndexState;

/// Reciprocal-rank-fusion constant: fused score is `sum(1 / (K + rank))`
/// with ranks starting at 1 in each prefetched list.
pub const RRF_K: f32 = 60.0;
/// Per-channel prefetch multipliers applied to the requested limit.
pub const PREFETCH_RATIO_DENSE: f32 = 7.0;
pub const PREFETCH_RATIO_SPARSE: f32 = 3.0;

/// One stored entity: named dense and sparse vectors plus a JSON payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Point {
    pub id: String,
    pub dense: Vec<f32>,
    pub sparse: SparseVector,
    pub payload: Value,
}

/// A search hit: id, fused score, payload.
#[derive(Debug, Clone)]
pub struct ScoredPoint {
    pub id: String,
    pub score: f32,
    pub payload: Value,
}

impl ScoredPoint {
    pub fn payload_str(&self, key: &str) -> String {
        self.payload
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    }

    pub fn payload_f32(&self, key: &str, default: f32) -> f32 {
        self.payload
            .get(key)
            .and_then(|v| v.as_f64())
            .map(|v| v as f32)
            .unwrap_or(default)
    }

    pub fn payload_usize(&self, key: &str) -> usize {
        self.payload
            .get(key)
            .and_then(|v| v.as_u64())
            .unwrap_or_default() as usize
    }
}

/// Payload filters applied before fusion.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub language: Option<String>,
    pub object_type: Option<String>,
    pub file_path: Option<String>,
}

impl SearchFilters {
    pub fn is_empty(&self) -> bool {
        self.language.is_none() && self.object_type.is_none() && self.file_path.is_none()
    }

    pub fn matches(&self, payload: &Value) -> bool {
        if let Some(language) = &self.language {
            let value = payload.get("language").and_then(|v| v.as_str()).unwrap_or("");
            if !value.eq_ignore_ascii_case(language) {
                return false;
            }
        }
        if let Some(object_type) = &self.object_type {
            let value = payload
                .get("object_type")
                .and_then(|v| v.as_str())
                .unwrap_or("");
            if !value.eq_ignore_ascii_case(object_type) {
                return false;
            }
        }
        if let Some(pattern) = &self.file_path {
            let value = payload
                .get("relative_path")
                .and_then(|v| v.as_str())
                .unwrap_or("");
            if !value.to_lowercase().contains(&pattern.to_lowercase()) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FusionMethod {
    #[default]
    Rrf,
    Dbsf,
    Weighted,
}

/// Collection contract: named dense + sparse vectors per point, payload
/// filtering, rank fusion. One collection per project; the core never
/// reads across collections.
pub trait VectorStore: Send + Sync {
    fn upsert(&self, points: Vec<Point>) -> Result<()>;

    fn delete(&self, ids: &[String]) -> Result<()>;

    /// Remove every point whose payload `relative_path` equals the given
    /// path. Incremental sync uses this before re-upserting a file.
    fn delete_by_file(&self, relative_path: &str) -> Result<()>;

    fn search(
        &self,
        dense: &[f32],
        sparse: &SparseVector,
        limit: usize,
        filters: &SearchFilters,
        fusion: FusionMethod,
    ) -> Result<Vec<ScoredPoint>>;

    /// Batch payload fetch by id; order follows the input ids, missing ids
    /// are skipped.
    fn retrieve(&self, ids: &[String]) -> Result<Vec<ScoredPoint>>;

    fn count(&self) -> Result<usize>;

    /// Persist the index state and relationships blob. Atomic: readers
    /// see either the previous state or the new one.
    fn save_state(&self, state: &IndexState, graph: &RelationshipGraph) -> Result<()>;

    fn load_state(&self) -> Result<Option<IndexState>>;

    fn load_graph(&self) -> Result<Option<RelationshipGraph>>;

    /// Flush points to durable storage.
    fn persist(&self) -> Result<()>;

    /// Drop the whole collection, all-or-nothing.
    fn destroy(&self) -> Result<()>;
}

/// Collection naming scheme shared by every store implementation.
pub fn collection_name(project_id: &str) -> String {
    format!("codecontext_{project_id}")
}

/// Root directory holding embedded collections. `CODECONTEXT_DATA_DIR`
/// overrides the platform default.
pub fn collections_root() -> PathBuf {
    if let Ok(dir) = std::env::var("CODECONTEXT_DATA_DIR") {
        return PathBuf::from(dir).join("collections");
    }
    if let Some(dirs) = directories::ProjectDirs::from("", "", "codecontext") {
        return dirs.data_dir().join("collections");
    }
    PathBuf::from(".codecontext").join("collections")
}

/// Closed store registry. Remote Qdrant is intentionally absent: the core
/// only depends on the `VectorStore` contract, and the embedded store is
/// the one registered implementation.
pub fn store_for_project(provider: &str, project_id: &str) -> Result<Arc<dyn VectorStore>> {
    match provider {
        "embedded" => Ok(Arc::new(EmbeddedStore::open(project_id)?)),
        other => Err(CoreError::Unsupported(format!(
            "storage provider '{other}' is not built into this binary"
        ))
        .into()),
    }
}
