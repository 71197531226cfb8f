use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use ignore::overrides::OverrideBuilder;
use ignore::{WalkBuilder, WalkState};

use crate::config::IndexingConfig;
use crate::parsers::detect_language;

const DEFAULT_IGNORE: &str = include_str!("../../default-ignore.txt");

/// Discovery policy for one sync run.
///
/// A file is a candidate when a registered parser claims its extension,
/// it stays under the configured size cap, and no path component sits on
/// the built-in exclude list. Binary assets need no special handling:
/// nothing in the parser registry claims them.
pub struct DiscoveryFilter {
    max_bytes: u64,
    excluded_dirs: HashSet<&'static str>,
    excluded_files: HashSet<&'static str>,
}

impl DiscoveryFilter {
    pub fn new(config: &IndexingConfig) -> Self {
        let mut excluded_dirs = HashSet::new();
        let mut excluded_files = HashSet::new();
        // The bundled ignore list holds directory entries (trailing
        // slash) and exact file names, one per line.
        for line in DEFAULT_IGNORE.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match line.strip_suffix('/') {
                Some(dir) => excluded_dirs.insert(dir),
                None => excluded_files.insert(line),
            };
        }
        Self {
            max_bytes: config.max_file_size_mb * 1024 * 1024,
            excluded_dirs,
            excluded_files,
        }
    }

    /// Candidate check for a regular file under `root`.
    pub fn admits(&self, path: &Path, root: &Path) -> bool {
        if detect_language(path).is_none() {
            return false;
        }
        let relative = path.strip_prefix(root).unwrap_or(path);
        let mut components = relative.components().peekable();
        while let Some(component) = components.next() {
            let name = component.as_os_str().to_string_lossy();
            let is_last = components.peek().is_none();
            if is_last {
                if self.excluded_files.contains(name.as_ref()) {
                    return false;
                }
            } else if self.excluded_dirs.contains(name.as_ref()) {
                return false;
            }
        }
        true
    }

    pub fn within_size(&self, len: u64) -> bool {
        len <= self.max_bytes
    }
}

/// Walk the project tree honoring .gitignore, the discovery policy, and
/// the configured include/exclude globs (gitignore-style, negation via
/// the override rules). Results are sorted so runs are reproducible.
pub fn collect_files(root: &Path, config: &IndexingConfig) -> Vec<PathBuf> {
    let filter = Arc::new(DiscoveryFilter::new(config));
    let found = Arc::new(Mutex::new(Vec::new()));
    let root_owned = Arc::new(root.to_path_buf());

    let mut builder = WalkBuilder::new(root);
    builder
        .hidden(true)
        .git_ignore(true)
        .git_exclude(true)
        .require_git(false)
        .follow_links(false);
    if let Some(overrides) = config_overrides(root, config) {
        builder.overrides(overrides);
    }
    if config.parallel_workers > 0 {
        builder.threads(config.parallel_workers);
    }

    builder.build_parallel().run(|| {
        let filter = Arc::clone(&filter);
        let found = Arc::clone(&found);
        let root = Arc::clone(&root_owned);

        Box::new(move |entry| {
            let Ok(entry) = entry else {
                return WalkState::Continue;
            };
            let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
            if !is_file {
                return WalkState::Continue;
            }
            let size_ok = entry
                .metadata()
                .map(|m| filter.within_size(m.len()))
                .unwrap_or(false);
            if size_ok && filter.admits(entry.path(), &root) {
                found.lock().unwrap().push(entry.into_path());
            }
            WalkState::Continue
        })
    });

    let mut files = Arc::try_unwrap(found)
        .expect("walker callbacks dropped")
        .into_inner()
        .unwrap();
    files.sort();
    files
}

fn config_overrides(root: &Path, config: &IndexingConfig) -> Option<ignore::overrides::Override> {
    let mut builder = OverrideBuilder::new(root);
    let mut any = false;
    for pattern in &config.include {
        if pattern != "**" && builder.add(pattern).is_ok() {
            any = true;
        }
    }
    for pattern in &config.exclude {
        // Override semantics invert exclusion with a leading bang.
        if builder.add(&format!("!{pattern}")).is_ok() {
            any = true;
        }
    }
    if !any {
        return None;
    }
    builder.build().ok()
}

/// Absolute project root; falls back to the given path when it cannot be
/// resolved (status calls may name a directory that is gone).
pub fn project_root(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// Project-relative, forward-slash form of `path` under `root`.
pub fn relative_key(path: &Path, root: &Path) -> String {
    let stripped = path.strip_prefix(root).unwrap_or(path);
    crate::model::normalize_path(&stripped.to_string_lossy())
}
