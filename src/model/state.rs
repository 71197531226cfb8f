use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// File-level checksum used to classify files during incremental sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileChecksum {
    pub file_path: String,
    pub checksum: String,
    pub last_indexed: DateTime<Utc>,
}

/// Per-project summary persisted next to the points.
///
/// Written once, atomically, at the end of each sync run. A crash before
/// the write leaves a consistent collection and a stale state; the next
/// run re-validates files by checksum.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexState {
    pub project_id: String,
    pub project_path: String,
    pub total_files: usize,
    pub total_objects: usize,
    pub total_documents: usize,
    pub languages: Vec<String>,
    pub index_version: String,
    pub last_indexed: DateTime<Utc>,
    pub file_checksums: BTreeMap<String, FileChecksum>,
}

impl IndexState {
    pub fn empty(project_id: &str, project_path: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            project_path: project_path.to_string(),
            total_files: 0,
            total_objects: 0,
            total_documents: 0,
            languages: Vec::new(),
            index_version: env!("CARGO_PKG_VERSION").to_string(),
            last_indexed: Utc::now(),
            file_checksums: BTreeMap::new(),
        }
    }
}

/// Outcome report returned by a sync run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexSummary {
    pub files_indexed: usize,
    pub files_skipped: usize,
    pub files_deleted: usize,
    pub objects: usize,
    pub documents: usize,
    pub relationships: usize,
    pub duration_ms: u128,
    pub errors: Vec<String>,
}
