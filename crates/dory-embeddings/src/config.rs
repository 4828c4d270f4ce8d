use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{EmbeddingsError, EmbeddingsResult};

pub const DEFAULT_EMBEDDING_MODEL: &str = "all-MiniLM-L6-v2";
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 384;
pub const DEFAULT_COLLECTION_NAME: &str = "dory_memories";
pub const DEFAULT_SEARCH_LIMIT: usize = 10;
pub const DEFAULT_MEMORY_THRESHOLD_SCORE: f64 = 0.7;

/// Which [`Embedder`](crate::Embedder) turns text into vectors.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EmbedderKind {
    /// Offline feature hashing, always available.
    #[default]
    Hash,
    /// Local ONNX model; needs the `local-embeddings` feature.
    Fastembed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingsConfig {
    #[serde(default)]
    pub embedder: EmbedderKind,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_embedding_dimension")]
    pub embedding_dimension: usize,
    /// Also the SQLite table (and file) name, so restricted to `[A-Za-z0-9_]`.
    #[serde(default = "default_collection_name")]
    pub collection_name: String,
    #[serde(default = "default_search_limit")]
    pub search_limit: usize,
    #[serde(default = "default_true")]
    pub enable_auto_memories: bool,
    #[serde(default = "default_memory_threshold_score")]
    pub memory_threshold_score: f64,
    /// Backend options merged over the adapter defaults.
    #[serde(default)]
    pub advanced_config: Map<String, Value>,
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            embedder: EmbedderKind::default(),
            embedding_model: default_embedding_model(),
            embedding_dimension: DEFAULT_EMBEDDING_DIMENSION,
            collection_name: default_collection_name(),
            search_limit: DEFAULT_SEARCH_LIMIT,
            enable_auto_memories: true,
            memory_threshold_score: DEFAULT_MEMORY_THRESHOLD_SCORE,
            advanced_config: Map::new(),
        }
    }
}

fn default_embedding_model() -> String {
    DEFAULT_EMBEDDING_MODEL.to_string()
}

fn default_embedding_dimension() -> usize {
    DEFAULT_EMBEDDING_DIMENSION
}

fn default_collection_name() -> String {
    DEFAULT_COLLECTION_NAME.to_string()
}

fn default_search_limit() -> usize {
    DEFAULT_SEARCH_LIMIT
}

fn default_true() -> bool {
    true
}

fn default_memory_threshold_score() -> f64 {
    DEFAULT_MEMORY_THRESHOLD_SCORE
}

impl EmbeddingsConfig {
    /// Build from the `"embeddings"` section of the layered config.
    /// `null` means all defaults.
    pub fn from_section(section: Value) -> EmbeddingsResult<Self> {
        if section.is_null() {
            return Ok(Self::default());
        }
        let config: Self = serde_json::from_value(section)
            .map_err(|e| EmbeddingsError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> EmbeddingsResult<()> {
        if self.embedding_dimension == 0 {
            return Err(EmbeddingsError::InvalidConfig(
                "embedding_dimension must be at least 1".to_string(),
            ));
        }
        if self.collection_name.is_empty()
            || !self
                .collection_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(EmbeddingsError::InvalidConfig(format!(
                "collection_name '{}' may only contain letters, digits and '_'",
                self.collection_name
            )));
        }
        if !(1..=100).contains(&self.search_limit) {
            return Err(EmbeddingsError::InvalidConfig(format!(
                "search_limit must be within 1..=100, got {}",
                self.search_limit
            )));
        }
        if !(0.0..=1.0).contains(&self.memory_threshold_score) {
            return Err(EmbeddingsError::InvalidConfig(format!(
                "memory_threshold_score must be within 0..=1, got {}",
                self.memory_threshold_score
            )));
        }
        if self.embedding_model.trim().is_empty() {
            return Err(EmbeddingsError::InvalidConfig(
                "embedding_model must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
