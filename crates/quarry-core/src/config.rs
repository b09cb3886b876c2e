use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::QuarryError;

/// Top-level configuration loaded from `.quarry.toml`.
///
/// All fields have sensible defaults; an empty file is a valid config.
/// Layered resolution (env vars, CLI flags) is the embedding process's
/// concern — this type only parses and validates.
///
/// # Examples
///
/// ```
/// use quarry_core::QuarryConfig;
///
/// let config = QuarryConfig::default();
/// assert_eq!(config.chunking.chunk_size, 50);
/// assert!(config.cache.enabled);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuarryConfig {
    /// Workspace paths.
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    /// Embedding model settings.
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    /// Chunking behavior.
    #[serde(default)]
    pub chunking: ChunkingConfig,
    /// Search ranking weights.
    #[serde(default)]
    pub search: SearchConfig,
    /// Vector cache settings.
    #[serde(default)]
    pub cache: CacheConfig,
}

impl QuarryConfig {
    /// Load configuration from a TOML file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`QuarryError::Io`] if the file cannot be read, or
    /// [`QuarryError::Toml`] if the content is not valid TOML.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use quarry_core::QuarryConfig;
    /// use std::path::Path;
    ///
    /// let config = QuarryConfig::from_file(Path::new(".quarry.toml")).unwrap();
    /// ```
    pub fn from_file(path: &Path) -> Result<Self, QuarryError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`QuarryError::Toml`] if parsing fails, or
    /// [`QuarryError::Config`] if a value is out of range.
    ///
    /// # Examples
    ///
    /// ```
    /// use quarry_core::QuarryConfig;
    ///
    /// let toml = r#"
    /// [search]
    /// max_results = 20
    /// "#;
    /// let config = QuarryConfig::from_toml(toml).unwrap();
    /// assert_eq!(config.search.max_results, 20);
    /// ```
    pub fn from_toml(content: &str) -> Result<Self, QuarryError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`QuarryError::Config`] naming the offending field.
    pub fn validate(&self) -> Result<(), QuarryError> {
        if !(0.0..=1.0).contains(&self.search.semantic_weight) {
            return Err(QuarryError::Config(format!(
                "search.semantic_weight must be in 0..=1, got {}",
                self.search.semantic_weight
            )));
        }
        if self.search.exact_match_boost < 0.0 {
            return Err(QuarryError::Config(format!(
                "search.exact_match_boost must be >= 0, got {}",
                self.search.exact_match_boost
            )));
        }
        if self.chunking.chunk_size == 0 {
            return Err(QuarryError::Config(
                "chunking.chunk_size must be at least 1".into(),
            ));
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return Err(QuarryError::Config(format!(
                "chunking.chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunking.chunk_overlap, self.chunking.chunk_size
            )));
        }
        if self.embedding.worker_threads == 0 {
            return Err(QuarryError::Config(
                "embedding.worker_threads must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Workspace paths: what to index and where the cache lives.
///
/// # Examples
///
/// ```
/// use quarry_core::WorkspaceConfig;
///
/// let config = WorkspaceConfig::default();
/// assert_eq!(config.cache_directory.to_str(), Some(".quarry"));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Root directory to index (default: current directory).
    #[serde(default = "default_search_directory")]
    pub search_directory: PathBuf,
    /// Directory for the persisted vector cache (default: `.quarry`).
    #[serde(default = "default_cache_directory")]
    pub cache_directory: PathBuf,
}

fn default_search_directory() -> PathBuf {
    PathBuf::from(".")
}

fn default_cache_directory() -> PathBuf {
    PathBuf::from(".quarry")
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            search_directory: default_search_directory(),
            cache_directory: default_cache_directory(),
        }
    }
}

/// Embedding model configuration.
///
/// # Examples
///
/// ```
/// use quarry_core::EmbeddingConfig;
///
/// let config = EmbeddingConfig::default();
/// assert_eq!(config.model, "nomic-ai/nomic-embed-text-v1.5");
/// assert_eq!(config.dimension, Some(256));
/// assert_eq!(config.worker_threads, 2);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Model identifier (default: `"nomic-ai/nomic-embed-text-v1.5"`).
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Target dimension for Matryoshka-capable models. Clamped to the
    /// nearest supported value; ignored by fixed-dimension models.
    #[serde(default = "default_embedding_dimension")]
    pub dimension: Option<usize>,
    /// Number of embedding worker units (default: 2).
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    /// Inference device hint (default: `"cpu"`).
    #[serde(default = "default_device")]
    pub device: String,
}

fn default_embedding_model() -> String {
    "nomic-ai/nomic-embed-text-v1.5".into()
}

fn default_embedding_dimension() -> Option<usize> {
    Some(256)
}

fn default_worker_threads() -> usize {
    2
}

fn default_device() -> String {
    "cpu".into()
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            worker_threads: default_worker_threads(),
            device: default_device(),
        }
    }
}

/// Chunking behavior configuration. Sizes are in lines.
///
/// # Examples
///
/// ```
/// use quarry_core::{ChunkingConfig, ChunkingMode};
///
/// let config = ChunkingConfig::default();
/// assert_eq!(config.mode, ChunkingMode::Smart);
/// assert_eq!(config.chunk_overlap, 5);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Boundary-aware (`smart`) or size-only (`fixed`) splitting.
    #[serde(default)]
    pub mode: ChunkingMode,
    /// Soft chunk size in lines (default: 50).
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Lines of overlap carried between consecutive chunks (default: 5).
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

fn default_chunk_size() -> usize {
    50
}

fn default_chunk_overlap() -> usize {
    5
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            mode: ChunkingMode::default(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

/// How files are split into chunks.
///
/// # Examples
///
/// ```
/// use quarry_core::ChunkingMode;
///
/// assert_eq!(format!("{}", ChunkingMode::Smart), "smart");
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkingMode {
    /// Split at declaration-like boundaries where possible.
    #[default]
    Smart,
    /// Split purely by size; boundary patterns are ignored.
    Fixed,
}

impl std::fmt::Display for ChunkingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChunkingMode::Smart => write!(f, "smart"),
            ChunkingMode::Fixed => write!(f, "fixed"),
        }
    }
}

/// Search ranking configuration.
///
/// # Examples
///
/// ```
/// use quarry_core::SearchConfig;
///
/// let config = SearchConfig::default();
/// assert_eq!(config.max_results, 10);
/// assert!((config.semantic_weight - 0.7).abs() < f64::EPSILON);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Maximum results returned per query (default: 10).
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    /// Weight of cosine similarity in the combined score, 0..=1
    /// (default: 0.7). The lexical score gets `1 - semantic_weight`.
    #[serde(default = "default_semantic_weight")]
    pub semantic_weight: f64,
    /// Multiplier applied to the lexical exact-match signal (default: 2.0).
    #[serde(default = "default_exact_match_boost")]
    pub exact_match_boost: f64,
}

fn default_max_results() -> usize {
    10
}

fn default_semantic_weight() -> f64 {
    0.7
}

fn default_exact_match_boost() -> f64 {
    2.0
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_results: default_max_results(),
            semantic_weight: default_semantic_weight(),
            exact_match_boost: default_exact_match_boost(),
        }
    }
}

/// Vector cache configuration.
///
/// # Examples
///
/// ```
/// use quarry_core::CacheConfig;
///
/// assert!(CacheConfig::default().enabled);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// When `false`, nothing is persisted to disk (default: true).
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,
}

fn default_cache_enabled() -> bool {
    true
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let config = QuarryConfig::default();
        assert_eq!(config.workspace.search_directory, PathBuf::from("."));
        assert_eq!(config.workspace.cache_directory, PathBuf::from(".quarry"));
        assert_eq!(config.embedding.model, "nomic-ai/nomic-embed-text-v1.5");
        assert_eq!(config.embedding.dimension, Some(256));
        assert_eq!(config.embedding.worker_threads, 2);
        assert_eq!(config.embedding.device, "cpu");
        assert_eq!(config.chunking.mode, ChunkingMode::Smart);
        assert_eq!(config.chunking.chunk_size, 50);
        assert_eq!(config.chunking.chunk_overlap, 5);
        assert_eq!(config.search.max_results, 10);
        assert!(config.cache.enabled);
    }

    #[test]
    fn empty_toml_gives_defaults() {
        let config = QuarryConfig::from_toml("").unwrap();
        assert_eq!(config.chunking.chunk_size, 50);
        assert_eq!(config.search.max_results, 10);
    }

    #[test]
    fn parse_full_toml() {
        let toml = r#"
[workspace]
search_directory = "/srv/project"
cache_directory = "/srv/project/.quarry"

[embedding]
model = "all-MiniLM-L6-v2"
dimension = 128
worker_threads = 4
device = "cpu"

[chunking]
mode = "fixed"
chunk_size = 80
chunk_overlap = 10

[search]
max_results = 25
semantic_weight = 0.5
exact_match_boost = 10.0

[cache]
enabled = false
"#;
        let config = QuarryConfig::from_toml(toml).unwrap();
        assert_eq!(config.embedding.model, "all-MiniLM-L6-v2");
        assert_eq!(config.embedding.dimension, Some(128));
        assert_eq!(config.embedding.worker_threads, 4);
        assert_eq!(config.chunking.mode, ChunkingMode::Fixed);
        assert_eq!(config.chunking.chunk_size, 80);
        assert_eq!(config.search.max_results, 25);
        assert!((config.search.semantic_weight - 0.5).abs() < f64::EPSILON);
        assert!(!config.cache.enabled);
    }

    #[test]
    fn invalid_toml_returns_error() {
        let result = QuarryConfig::from_toml("{{invalid}}");
        assert!(result.is_err());
    }

    #[test]
    fn semantic_weight_out_of_range_is_rejected() {
        let toml = r#"
[search]
semantic_weight = 1.5
"#;
        let err = QuarryConfig::from_toml(toml).unwrap_err();
        assert!(err.to_string().contains("semantic_weight"));
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk_size() {
        let toml = r#"
[chunking]
chunk_size = 10
chunk_overlap = 10
"#;
        let err = QuarryConfig::from_toml(toml).unwrap_err();
        assert!(err.to_string().contains("chunk_overlap"));
    }

    #[test]
    fn zero_workers_is_rejected() {
        let toml = r#"
[embedding]
worker_threads = 0
"#;
        let err = QuarryConfig::from_toml(toml).unwrap_err();
        assert!(err.to_string().contains("worker_threads"));
    }
}
