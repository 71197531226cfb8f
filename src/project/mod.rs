use std::fs;
use std::path::Path;
use std::process::Command;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::{closest_matches, CoreError};
use crate::model::IndexState;
use crate::store::{collections_root, EmbeddedStore, VectorStore};

const COLLECTION_PREFIX: &str = "codecontext_";
const MAX_ID_LENGTH: usize = 63;

/// Stable project id, by priority: explicit flag, git remote origin,
/// directory name, path hash.
pub fn detect_project_id(path: &Path, explicit: Option<&str>) -> String {
    if let Some(name) = explicit {
        return normalize_project_id(name);
    }
    if let Some(origin) = git_origin_segment(path) {
        return normalize_project_id(&origin);
    }
    if let Some(name) = path
        .canonicalize()
        .ok()
        .as_deref()
        .unwrap_or(path)
        .file_name()
        .and_then(|n| n.to_str())
    {
        let normalized = normalize_project_id(name);
        if !normalized.is_empty() {
            return normalized;
        }
    }
    path_hash_id(path)
}

/// Last path segment of `remote.origin.url`, without the `.git` suffix.
fn git_origin_segment(path: &Path) -> Option<String> {
    let output = Command::new("git")
        .args(["-C"])
        .arg(path)
        .args(["config", "remote.origin.url"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let url = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if url.is_empty() {
        return None;
    }
    let trimmed = url.trim_end_matches('/').trim_end_matches(".git");
    let segment = trimmed
        .rsplit(|c| c == '/' || c == ':')
        .next()
        .unwrap_or(trimmed);
    if segment.is_empty() {
        None
    } else {
        Some(segment.to_string())
    }
}

fn path_hash_id(path: &Path) -> String {
    let absolute = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let digest = Sha256::digest(absolute.to_string_lossy().as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    format!("project-{}", &hex[..16])
}

/// Lowercase, non-alphanumeric to hyphen, trimmed, DNS-label length.
pub fn normalize_project_id(raw: &str) -> String {
    let mut normalized: String = raw
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_lowercase() || c.is_ascii_digit() { c } else { '-' })
        .collect();
    normalized = normalized.trim_matches('-').to_string();
    if normalized.len() > MAX_ID_LENGTH {
        normalized.truncate(MAX_ID_LENGTH);
        normalized = normalized.trim_matches('-').to_string();
    }
    normalized
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectInfo {
    pub project_id: String,
    pub project_path: Option<String>,
    pub total_files: usize,
    pub total_objects: usize,
    pub total_documents: usize,
    pub languages: Vec<String>,
    pub last_indexed: Option<DateTime<Utc>>,
}

impl ProjectInfo {
    fn from_state(project_id: &str, state: Option<IndexState>) -> Self {
        match state {
            Some(state) => Self {
                project_id: project_id.to_string(),
                project_path: Some(state.project_path),
                total_files: state.total_files,
                total_objects: state.total_objects,
                total_documents: state.total_documents,
                languages: state.languages,
                last_indexed: Some(state.last_indexed),
            },
            None => Self {
                project_id: project_id.to_string(),
                project_path: None,
                total_files: 0,
                total_objects: 0,
                total_documents: 0,
                languages: Vec::new(),
                last_indexed: None,
            },
        }
    }
}

/// All known project ids, from the collection directory names.
pub fn list_projects() -> Result<Vec<ProjectInfo>> {
    let root = collections_root();
    if !root.exists() {
        return Ok(Vec::new());
    }

    let mut ids: Vec<String> = Vec::new();
    for entry in fs::read_dir(&root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if let Some(project_id) = name.strip_prefix(COLLECTION_PREFIX) {
            ids.push(project_id.to_string());
        }
    }
    ids.sort();

    ids.iter()
        .map(|id| {
            let store = EmbeddedStore::open(id)?;
            Ok(ProjectInfo::from_state(id, store.load_state()?))
        })
        .collect()
}

/// Status for one project; unknown ids get edit-distance suggestions.
pub fn project_status(project_id: &str) -> Result<ProjectInfo> {
    ensure_known(project_id)?;
    let store = EmbeddedStore::open(project_id)?;
    Ok(ProjectInfo::from_state(project_id, store.load_state()?))
}

/// Drop the collection and its state, all-or-nothing.
pub fn delete_project(project_id: &str) -> Result<()> {
    ensure_known(project_id)?;
    let store = EmbeddedStore::open(project_id)?;
    store.destroy()
}

fn ensure_known(project_id: &str) -> Result<()> {
    let known: Vec<String> = list_projects()?
        .into_iter()
        .map(|info| info.project_id)
        .collect();
    if known.iter().any(|id| id == project_id) {
        return Ok(());
    }
    Err(CoreError::ProjectNotFound {
        name: project_id.to_string(),
        suggestions: closest_matches(project_id, &known),
    }
    .into())
}
