use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::RwLock;

use anyhow::{Context, Result};

use crate::encoder::SparseVector;
use crate::graph::RelationshipGraph;
use crate::model::IndexState;
use crate::store::{
    collection_name, collections_root, FusionMethod, Point, ScoredPoint, SearchFilters,
    VectorStore, PREFETCH_RATIO_DENSE, PREFETCH_RATIO_SPARSE, RRF_K,
};

const POINTS_FILE: &str = "points.bin.zst";
const STATE_FILE: &str = "state.bin.zst";
const GRAPH_FILE: &str = "graph.bin.zst";
const ZSTD_LEVEL: i32 = 3;

/// Embedded `VectorStore`: points live in memory and flush to a
/// zstd-compressed blob under the user data dir. Writes go through a
/// temp-file rename so a crash never leaves a torn file behind.
pub struct EmbeddedStore {
    root: PathBuf,
    points: RwLock<BTreeMap<String, Point>>,
}

impl EmbeddedStore {
    pub fn open(project_id: &str) -> Result<Self> {
        let root = collections_root().join(collection_name(project_id));
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create {}", root.display()))?;

        let points_path = root.join(POINTS_FILE);
        let points = if points_path.exists() {
            let bytes = fs::read(&points_path)
                .with_context(|| format!("failed to read {}", points_path.display()))?;
            let decompressed = zstd::stream::decode_all(bytes.as_slice())?;
            let stored: Vec<Point> = bincode::deserialize(&decompressed)?;
            stored.into_iter().map(|p| (p.id.clone(), p)).collect()
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            root,
            points: RwLock::new(points),
        })
    }

    pub fn exists(project_id: &str) -> bool {
        collections_root()
            .join(collection_name(project_id))
            .join(POINTS_FILE)
            .exists()
    }

    fn write_atomic(&self, file: &str, bytes: &[u8]) -> Result<()> {
        let compressed = zstd::stream::encode_all(bytes, ZSTD_LEVEL)?;
        let target = self.root.join(file);
        let temp = self.root.join(format!("{file}.tmp"));
        fs::write(&temp, compressed)
            .with_context(|| format!("failed to write {}", temp.display()))?;
        fs::rename(&temp, &target)
            .with_context(|| format!("failed to commit {}", target.display()))?;
        Ok(())
    }

    fn read_blob(&self, file: &str) -> Result<Option<Vec<u8>>> {
        let path = self.root.join(file);
        if !path.exists() {
            return Ok(None);
        }
        let bytes =
            fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;
        Ok(Some(zstd::stream::decode_all(bytes.as_slice())?))
    }
}

fn cosine(lhs: &[f32], rhs: &[f32]) -> f32 {
    let dot: f32 = lhs.iter().zip(rhs).map(|(a, b)| a * b).sum();
    let norm_l: f32 = lhs.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm_r: f32 = rhs.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm_l == 0.0 || norm_r == 0.0 {
        return 0.0;
    }
    (dot / (norm_l * norm_r)).clamp(-1.0, 1.0)
}

/// Rank one channel: (id, raw score) sorted descending, truncated to the
/// prefetch depth, ties broken by id so results are stable across runs.
fn ranked_channel(mut scores: Vec<(String, f32)>, prefetch: usize) -> Vec<(String, f32)> {
    scores.retain(|(_, s)| *s > 0.0);
    scores.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    scores.truncate(prefetch);
    scores
}

fn min_max_normalize(scores: &[(String, f32)]) -> Vec<(String, f32)> {
    let min = scores.iter().map(|(_, s)| *s).fold(f32::INFINITY, f32::min);
    let max = scores
        .iter()
        .map(|(_, s)| *s)
        .fold(f32::NEG_INFINITY, f32::max);
    let range = max - min;
    scores
        .iter()
        .map(|(id, s)| {
            let normalized = if range < f32::EPSILON {
                0.5
            } else {
                (s - min) / range
            };
            (id.clone(), normalized)
        })
        .collect()
}

fn dbsf_normalize(scores: &[(String, f32)]) -> Vec<(String, f32)> {
    if scores.is_empty() {
        return Vec::new();
    }
    let n = scores.len() as f32;
    let mean: f32 = scores.iter().map(|(_, s)| s).sum::<f32>() / n;
    let variance: f32 = scores.iter().map(|(_, s)| (s - mean).powi(2)).sum::<f32>() / n;
    let sigma = variance.sqrt();
    let low = mean - 3.0 * sigma;
    let high = mean + 3.0 * sigma;
    let range = (high - low).max(f32::EPSILON);
    scores
        .iter()
        .map(|(id, s)| (id.clone(), ((s - low) / range).clamp(0.0, 1.0)))
        .collect()
}

impl VectorStore for EmbeddedStore {
    fn upsert(&self, points: Vec<Point>) -> Result<()> {
        let mut guard = self.points.write().expect("store lock poisoned");
        for point in points {
            guard.insert(point.id.clone(), point);
        }
        Ok(())
    }

    fn delete(&self, ids: &[String]) -> Result<()> {
        let mut guard = self.points.write().expect("store lock poisoned");
        for id in ids {
            guard.remove(id);
        }
        Ok(())
    }

    fn delete_by_file(&self, relative_path: &str) -> Result<()> {
        let mut guard = self.points.write().expect("store lock poisoned");
        guard.retain(|_, point| {
            point
                .payload
                .get("relative_path")
                .and_then(|v| v.as_str())
                .map(|p| p != relative_path)
                .unwrap_or(true)
        });
        Ok(())
    }

    fn search(
        &self,
        dense: &[f32],
        sparse: &SparseVector,
        limit: usize,
        filters: &SearchFilters,
        fusion: FusionMethod,
    ) -> Result<Vec<ScoredPoint>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let guard = self.points.read().expect("store lock poisoned");

        let prefetch_dense = ((limit as f32) * PREFETCH_RATIO_DENSE).ceil() as usize;
        let prefetch_sparse = ((limit as f32) * PREFETCH_RATIO_SPARSE).ceil() as usize;

        let mut dense_scores: Vec<(String, f32)> = Vec::new();
        let mut sparse_scores: Vec<(String, f32)> = Vec::new();

        for point in guard.values() {
            if !filters.matches(&point.payload) {
                continue;
            }
            if !dense.is_empty() && !point.dense.is_empty() {
                dense_scores.push((point.id.clone(), cosine(dense, &point.dense)));
            }
            if !sparse.is_empty() {
                sparse_scores.push((point.id.clone(), point.sparse.dot(sparse)));
            }
        }

        let dense_ranked = ranked_channel(dense_scores, prefetch_dense);
        let sparse_ranked = ranked_channel(sparse_scores, prefetch_sparse);

        let mut fused: BTreeMap<String, f32> = BTreeMap::new();
        match fusion {
            FusionMethod::Rrf => {
                for (rank, (id, _)) in dense_ranked.iter().enumerate() {
                    *fused.entry(id.clone()).or_insert(0.0) += 1.0 / (RRF_K + rank as f32 + 1.0);
                }
                for (rank, (id, _)) in sparse_ranked.iter().enumerate() {
                    *fused.entry(id.clone()).or_insert(0.0) += 1.0 / (RRF_K + rank as f32 + 1.0);
                }
            }
            FusionMethod::Dbsf => {
                for (id, score) in dbsf_normalize(&dense_ranked) {
                    *fused.entry(id).or_insert(0.0) += score;
                }
                for (id, score) in dbsf_normalize(&sparse_ranked) {
                    *fused.entry(id).or_insert(0.0) += score;
                }
            }
            FusionMethod::Weighted => {
                for (id, score) in min_max_normalize(&dense_ranked) {
                    *fused.entry(id).or_insert(0.0) += 0.7 * score;
                }
                for (id, score) in min_max_normalize(&sparse_ranked) {
                    *fused.entry(id).or_insert(0.0) += 0.3 * score;
                }
            }
        }

        let mut hits: Vec<(String, f32)> = fused.into_iter().collect();
        hits.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        hits.truncate(limit);

        Ok(hits
            .into_iter()
            .filter_map(|(id, score)| {
                guard.get(&id).map(|point| ScoredPoint {
                    id,
                    score,
                    payload: point.payload.clone(),
                })
            })
            .collect())
    }

    fn retrieve(&self, ids: &[String]) -> Result<Vec<ScoredPoint>> {
        let guard = self.points.read().expect("store lock poisoned");
        Ok(ids
            .iter()
            .filter_map(|id| {
                guard.get(id).map(|point| ScoredPoint {
                    id: id.clone(),
                    score: 0.0,
                    payload: point.payload.clone(),
                })
            })
            .collect())
    }

    fn count(&self) -> Result<usize> {
        Ok(self.points.read().expect("store lock poisoned").len())
    }

    fn save_state(&self, state: &IndexState, graph: &RelationshipGraph) -> Result<()> {
        self.write_atomic(GRAPH_FILE, &bincode::serialize(graph)?)?;
        self.write_atomic(STATE_FILE, &bincode::serialize(state)?)?;
        Ok(())
    }

    fn load_state(&self) -> Result<Option<IndexState>> {
        match self.read_blob(STATE_FILE)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn load_graph(&self) -> Result<Option<RelationshipGraph>> {
        match self.read_blob(GRAPH_FILE)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn persist(&self) -> Result<()> {
        let guard = self.points.read().expect("store lock poisoned");
        let points: Vec<&Point> = guard.values().collect();
        self.write_atomic(POINTS_FILE, &bincode::serialize(&points)?)
    }

    fn destroy(&self) -> Result<()> {
        self.points.write().expect("store lock poisoned").clear();
        if self.root.exists() {
            fs::remove_dir_all(&self.root)
                .with_context(|| format!("failed to remove {}", self.root.display()))?;
        }
        Ok(())
    }
}
