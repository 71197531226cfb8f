use std::path::{Path, PathBuf};
use std::{env, fs};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::encoder::FieldWeights;
use crate::store::FusionMethod;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: String,
    pub dimension: usize,
    pub batch_size: usize,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "hash".to_string(),
            dimension: 384,
            batch_size: 64,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub provider: String,
    pub fusion_method: FusionMethod,
    pub timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            provider: "embedded".to_string(),
            fusion_method: FusionMethod::Rrf,
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndexingConfig {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub max_file_size_mb: u64,
    pub parallel_workers: usize,
    pub max_retries: usize,
    pub retry_base_secs: u64,
    pub retry_cap_secs: u64,
    pub field_weights: FieldWeights,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            include: vec!["**".to_string()],
            exclude: Vec::new(),
            max_file_size_mb: 10,
            parallel_workers: 0,
            max_retries: 3,
            retry_base_secs: 2,
            retry_cap_secs: 30,
            field_weights: FieldWeights::default(),
        }
    }
}

/// Additive per-type boosts applied after fusion.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TypeBoosting {
    pub class: f32,
    pub method: f32,
    pub function: f32,
    pub r#enum: f32,
    pub interface: f32,
    pub markdown: f32,
    pub config: f32,
    pub r#type: f32,
    pub field: f32,
    pub variable: f32,
}

impl Default for TypeBoosting {
    fn default() -> Self {
        Self {
            class: 0.12,
            method: 0.10,
            function: 0.10,
            r#enum: 0.08,
            interface: 0.06,
            markdown: 0.07,
            config: 0.05,
            r#type: 0.04,
            field: 0.02,
            variable: 0.0,
        }
    }
}

impl TypeBoosting {
    /// Boost for a payload type label. Document chunks map onto the
    /// markdown/config buckets.
    pub fn boost_for(&self, label: &str) -> f32 {
        match label {
            "class" => self.class,
            "method" => self.method,
            "function" => self.function,
            "enum" => self.r#enum,
            "interface" => self.interface,
            "heading" | "paragraph" | "code_block" | "markdown" => self.markdown,
            "config_key" | "config" => self.config,
            "type" => self.r#type,
            "field" => self.field,
            "variable" => self.variable,
            _ => 0.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub default_limit: usize,
    pub enable_graph_expansion: bool,
    pub graph_max_hops: usize,
    pub graph_ppr_threshold: f32,
    pub graph_score_weight: f32,
    pub max_chunks_per_file: usize,
    pub diversity_preserve_top_n: usize,
    pub type_boosting: TypeBoosting,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: 10,
            enable_graph_expansion: true,
            graph_max_hops: 1,
            graph_ppr_threshold: 0.4,
            graph_score_weight: 0.3,
            max_chunks_per_file: 2,
            diversity_preserve_top_n: 1,
            type_boosting: TypeBoosting::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProjectSection {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub embeddings: EmbeddingConfig,
    pub storage: StorageConfig,
    pub indexing: IndexingConfig,
    pub search: SearchConfig,
    pub logging: LoggingConfig,
    pub project: ProjectSection,
}

impl Config {
    /// Layered load: built-in defaults, then the user global file, then
    /// the project file, then `CODECONTEXT_*` environment overrides.
    pub fn load(project_root: Option<&Path>) -> Result<Self> {
        let mut config = Config::default();

        if let Some(global) = global_config_path() {
            if global.exists() {
                config = read_config_file(&global)?;
            }
        }

        if let Some(root) = project_root {
            let project_file = root.join(".codecontext.toml");
            if project_file.exists() {
                config = merge_file_over(config, &project_file)?;
            }
        }

        config.apply_env_overrides();
        Ok(config)
    }

    /// `CODECONTEXT_<SECTION>__<KEY>` overrides beat every file layer.
    fn apply_env_overrides(&mut self) {
        if let Ok(value) = env::var("CODECONTEXT_EMBEDDINGS__PROVIDER") {
            self.embeddings.provider = value;
        }
        if let Ok(value) = env::var("CODECONTEXT_EMBEDDINGS__DIMENSION") {
            if let Ok(parsed) = value.parse() {
                self.embeddings.dimension = parsed;
            }
        }
        if let Ok(value) = env::var("CODECONTEXT_EMBEDDINGS__BATCH_SIZE") {
            if let Ok(parsed) = value.parse() {
                self.embeddings.batch_size = parsed;
            }
        }
        if let Ok(value) = env::var("CODECONTEXT_STORAGE__PROVIDER") {
            self.storage.provider = value;
        }
        if let Ok(value) = env::var("CODECONTEXT_SEARCH__DEFAULT_LIMIT") {
            if let Ok(parsed) = value.parse() {
                self.search.default_limit = parsed;
            }
        }
        if let Ok(value) = env::var("CODECONTEXT_SEARCH__ENABLE_GRAPH_EXPANSION") {
            self.search.enable_graph_expansion =
                matches!(value.to_lowercase().as_str(), "1" | "true" | "yes" | "on");
        }
        if let Ok(value) = env::var("CODECONTEXT_INDEXING__PARALLEL_WORKERS") {
            if let Ok(parsed) = value.parse() {
                self.indexing.parallel_workers = parsed;
            }
        }
        if let Ok(value) = env::var("CODECONTEXT_LOGGING__LEVEL") {
            self.logging.level = value;
        }
    }
}

fn global_config_path() -> Option<PathBuf> {
    if let Ok(path) = env::var("CODECONTEXT_CONFIG") {
        return Some(PathBuf::from(path));
    }
    if let Some(home) = env::var_os("HOME") {
        return Some(PathBuf::from(home).join(".codecontext").join("config.toml"));
    }
    None
}

fn read_config_file(path: &Path) -> Result<Config> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file: {}", path.display()))
}

/// Project-file values win over the base config, section by section: a
/// section present in the project file replaces that section.
fn merge_file_over(base: Config, path: &Path) -> Result<Config> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    let table: toml::Table = contents
        .parse()
        .with_context(|| format!("failed to parse config file: {}", path.display()))?;
    let overlay: Config = toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?;

    let mut merged = base;
    if table.contains_key("embeddings") {
        merged.embeddings = overlay.embeddings;
    }
    if table.contains_key("storage") {
        merged.storage = overlay.storage;
    }
    if table.contains_key("indexing") {
        merged.indexing = overlay.indexing;
    }
    if table.contains_key("search") {
        merged.search = overlay.search;
    }
    if table.contains_key("logging") {
        merged.logging = overlay.logging;
    }
    if table.contains_key("project") {
        merged.project = overlay.project;
    }
    Ok(merged)
}
