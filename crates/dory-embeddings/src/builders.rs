use std::path::Path;
use std::sync::Arc;

use crate::adapter::MemoryAdapter;
use crate::config::{EmbedderKind, EmbeddingsConfig};
use crate::embedder::{Embedder, HashEmbedder};
use crate::error::{EmbeddingsError, EmbeddingsResult};
use crate::service::Embeddings;
use crate::sqlite::SqliteMemoryAdapter;

/// Service over a caller-supplied adapter.
pub fn build_with_adapter(
    adapter: Arc<dyn MemoryAdapter>,
    config: EmbeddingsConfig,
) -> EmbeddingsResult<Embeddings> {
    config.validate()?;
    Ok(Embeddings::new(adapter, config))
}

/// The embedder named by `config.embedder`.
pub fn build_embedder(config: &EmbeddingsConfig) -> EmbeddingsResult<Arc<dyn Embedder>> {
    match config.embedder {
        EmbedderKind::Hash => Ok(Arc::new(HashEmbedder::new(config.embedding_dimension)?)),
        #[cfg(feature = "local-embeddings")]
        EmbedderKind::Fastembed => Ok(Arc::new(crate::embedder::FastEmbedder::new(
            &config.embedding_model,
            config.embedding_dimension,
        )?)),
        #[cfg(not(feature = "local-embeddings"))]
        EmbedderKind::Fastembed => Err(EmbeddingsError::InvalidConfig(
            "embedder 'fastembed' requires the local-embeddings feature".to_string(),
        )),
    }
}

/// Persistent store at `{dir}/{collection_name}.db`.
pub async fn build_local_embeddings(
    dir: &Path,
    config: EmbeddingsConfig,
) -> EmbeddingsResult<Embeddings> {
    config.validate()?;
    let embedder = build_embedder(&config)?;
    let path = dir.join(format!("{}.db", config.collection_name));
    let adapter = SqliteMemoryAdapter::open(&path, &config, embedder).await?;
    build_with_adapter(Arc::new(adapter), config)
}

/// Throwaway store for tests and one-off sessions.
pub fn build_in_memory_embeddings(config: EmbeddingsConfig) -> EmbeddingsResult<Embeddings> {
    config.validate()?;
    let embedder = build_embedder(&config)?;
    let adapter = SqliteMemoryAdapter::open_in_memory(&config, embedder)?;
    build_with_adapter(Arc::new(adapter), config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_config_fails_early() {
        let config = EmbeddingsConfig {
            search_limit: 0,
            ..Default::default()
        };
        assert!(matches!(
            build_in_memory_embeddings(config),
            Err(EmbeddingsError::InvalidConfig(_))
        ));
    }

    #[cfg(not(feature = "local-embeddings"))]
    #[test]
    fn fastembed_needs_feature() {
        let config = EmbeddingsConfig {
            embedder: EmbedderKind::Fastembed,
            ..Default::default()
        };
        assert!(matches!(
            build_embedder(&config),
            Err(EmbeddingsError::InvalidConfig(_))
        ));
    }

    #[test]
    fn hash_embedder_uses_configured_dimension() {
        let config = EmbeddingsConfig {
            embedding_dimension: 32,
            ..Default::default()
        };
        let embedder = build_embedder(&config).unwrap();
        assert_eq!(embedder.dimension(), 32);
        assert_eq!(embedder.model_name(), "hash");
    }
}
