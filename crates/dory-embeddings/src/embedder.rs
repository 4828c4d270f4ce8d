// Text to vector conversion.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::{EmbeddingsError, EmbeddingsResult};

#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimension(&self) -> usize;

    fn model_name(&self) -> &str;

    async fn embed(&self, text: &str) -> EmbeddingsResult<Vec<f32>>;
}

/// Signed feature hashing over lowercase word tokens.
///
/// Deterministic and offline. Texts sharing words land close together, which
/// is enough for recall over a user's own notes; it has no notion of synonyms.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> EmbeddingsResult<Self> {
        if dimension == 0 {
            return Err(EmbeddingsError::InvalidConfig(
                "embedding dimension must be at least 1".to_string(),
            ));
        }
        Ok(Self { dimension })
    }

    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let lowered = text.to_lowercase();
        let mut tokens = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .peekable();

        let mut vector = vec![0.0f32; self.dimension];
        if tokens.peek().is_none() {
            // Punctuation-only input still needs a non-zero vector.
            self.accumulate(&mut vector, lowered.trim());
        } else {
            for token in tokens {
                self.accumulate(&mut vector, token);
            }
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        vector
    }

    fn accumulate(&self, vector: &mut [f32], token: &str) {
        let digest = Sha256::digest(token.as_bytes());
        let mut bucket = [0u8; 8];
        bucket.copy_from_slice(&digest[..8]);
        let index = (u64::from_le_bytes(bucket) % self.dimension as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        vector[index] += sign;
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "hash"
    }

    async fn embed(&self, text: &str) -> EmbeddingsResult<Vec<f32>> {
        Ok(self.embed_sync(text))
    }
}

#[cfg(feature = "local-embeddings")]
pub use local::FastEmbedder;

#[cfg(feature = "local-embeddings")]
mod local {
    use super::*;
    use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
    use tokio::sync::Mutex;

    /// Local ONNX sentence embeddings via fastembed.
    pub struct FastEmbedder {
        model_name: String,
        dimension: usize,
        model: Mutex<TextEmbedding>,
    }

    impl FastEmbedder {
        pub fn new(model_name: &str, dimension: usize) -> EmbeddingsResult<Self> {
            let parsed = parse_model_id(model_name).ok_or_else(|| {
                EmbeddingsError::InvalidConfig(format!(
                    "unsupported embedding model id '{model_name}'; supported: all-MiniLM-L6-v2"
                ))
            })?;
            let model = TextEmbedding::try_new(InitOptions::new(parsed)).map_err(|e| {
                EmbeddingsError::Embedding(format!(
                    "failed to initialize embedding model '{model_name}': {e}"
                ))
            })?;
            tracing::info!(
                target: "dory.embeddings",
                "Embeddings enabled: model={} dimension={}",
                model_name,
                dimension
            );
            Ok(Self {
                model_name: model_name.to_string(),
                dimension,
                model: Mutex::new(model),
            })
        }
    }

    fn parse_model_id(model_name: &str) -> Option<EmbeddingModel> {
        match model_name.trim().to_ascii_lowercase().as_str() {
            "all-minilm-l6-v2" | "all_minilm_l6_v2" => Some(EmbeddingModel::AllMiniLML6V2),
            _ => None,
        }
    }

    #[async_trait]
    impl Embedder for FastEmbedder {
        fn dimension(&self) -> usize {
            self.dimension
        }

        fn model_name(&self) -> &str {
            &self.model_name
        }

        async fn embed(&self, text: &str) -> EmbeddingsResult<Vec<f32>> {
            let model = self.model.lock().await;
            let mut embeddings = model
                .embed(vec![text.to_string()], None)
                .map_err(|e| EmbeddingsError::Embedding(e.to_string()))?;
            let embedding = embeddings
                .pop()
                .ok_or_else(|| EmbeddingsError::Embedding("no embedding generated".to_string()))?;
            if embedding.len() != self.dimension {
                return Err(EmbeddingsError::Embedding(format!(
                    "embedding dimension mismatch: expected {}, got {}",
                    self.dimension,
                    embedding.len()
                )));
            }
            Ok(embedding)
        }
    }
}
