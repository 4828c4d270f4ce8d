use std::sync::Arc;

use serde_json::{Map, Value};

use crate::adapter::{MemoryAdapter, MemoryRecord};
use crate::config::EmbeddingsConfig;
use crate::error::{EmbeddingsError, EmbeddingsResult};

pub const DEFAULT_EMBEDDING_SEARCH_LIMIT: usize = 10;

/// Memories and vector search for a user.
#[derive(Clone)]
pub struct Embeddings {
    adapter: Arc<dyn MemoryAdapter>,
    config: EmbeddingsConfig,
}

fn require_text(field: &str, value: &str) -> EmbeddingsResult<()> {
    if value.trim().is_empty() {
        return Err(EmbeddingsError::InvalidInput(format!(
            "{field} must not be empty"
        )));
    }
    Ok(())
}

impl Embeddings {
    pub fn new(adapter: Arc<dyn MemoryAdapter>, config: EmbeddingsConfig) -> Self {
        Self { adapter, config }
    }

    pub fn config(&self) -> &EmbeddingsConfig {
        &self.config
    }

    /// Whether callers should embed chat messages as they are stored.
    pub fn auto_memories_enabled(&self) -> bool {
        self.config.enable_auto_memories
    }

    pub async fn remember(
        &self,
        content: &str,
        user_id: &str,
        conversation_id: Option<&str>,
        metadata: Option<Map<String, Value>>,
    ) -> EmbeddingsResult<String> {
        require_text("content", content)?;
        require_text("user_id", user_id)?;
        let id = self
            .adapter
            .add_memory(content, user_id, conversation_id, metadata)
            .await?;
        tracing::debug!(
            target: "dory.embeddings",
            user_id,
            memory_id = %id,
            content_len = content.len(),
            "memory stored"
        );
        Ok(id)
    }

    pub async fn store_embedding(
        &self,
        content: &str,
        user_id: &str,
        conversation_id: Option<&str>,
        message_id: Option<&str>,
        metadata: Option<Map<String, Value>>,
    ) -> EmbeddingsResult<String> {
        require_text("content", content)?;
        require_text("user_id", user_id)?;
        let id = self
            .adapter
            .add_embedding(content, user_id, conversation_id, message_id, metadata)
            .await?;
        tracing::debug!(
            target: "dory.embeddings",
            user_id,
            embedding_id = %id,
            message_id = message_id.unwrap_or("-"),
            "embedding stored"
        );
        Ok(id)
    }

    /// Memories relevant to `query`, best first. Hits scoring below
    /// `memory_threshold_score` are dropped.
    pub async fn recall(
        &self,
        query: &str,
        user_id: &str,
        conversation_id: Option<&str>,
        limit: Option<usize>,
    ) -> EmbeddingsResult<Vec<MemoryRecord>> {
        require_text("query", query)?;
        let limit = limit.unwrap_or(self.config.search_limit);
        let hits = self
            .adapter
            .search_memories(query, user_id, conversation_id, limit, None)
            .await?;
        let threshold = self.config.memory_threshold_score;
        let total = hits.len();
        let kept = hits
            .into_iter()
            .filter(|hit| hit.score >= threshold)
            .collect::<Vec<_>>();
        tracing::debug!(
            target: "dory.embeddings",
            user_id,
            candidates = total,
            kept = kept.len(),
            threshold,
            "recall"
        );
        Ok(kept)
    }

    /// Raw message embeddings similar to `query`, best first. No threshold.
    pub async fn search_embeddings(
        &self,
        query: &str,
        user_id: &str,
        conversation_id: Option<&str>,
        limit: Option<usize>,
    ) -> EmbeddingsResult<Vec<MemoryRecord>> {
        require_text("query", query)?;
        self.adapter
            .search_embeddings(
                query,
                user_id,
                conversation_id,
                limit.unwrap_or(DEFAULT_EMBEDDING_SEARCH_LIMIT),
            )
            .await
    }

    /// Returns how many records were deleted.
    pub async fn forget(
        &self,
        user_id: &str,
        conversation_id: Option<&str>,
        memory_ids: Option<&[String]>,
    ) -> EmbeddingsResult<usize> {
        require_text("user_id", user_id)?;
        let deleted = self
            .adapter
            .delete_memories(user_id, conversation_id, memory_ids)
            .await?;
        tracing::info!(target: "dory.embeddings", user_id, deleted, "memories deleted");
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::build_in_memory_embeddings;

    fn config(threshold: f64) -> EmbeddingsConfig {
        EmbeddingsConfig {
            memory_threshold_score: threshold,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn recall_applies_threshold() {
        let embeddings = build_in_memory_embeddings(config(0.9)).unwrap();
        embeddings
            .remember("allergic to peanuts", "u", None, None)
            .await
            .unwrap();
        embeddings
            .remember("favourite colour is teal", "u", None, None)
            .await
            .unwrap();

        let hits = embeddings
            .recall("allergic to peanuts", "u", None, None)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content, "allergic to peanuts");
    }

    #[tokio::test]
    async fn zero_threshold_keeps_everything_up_to_limit() {
        let embeddings = build_in_memory_embeddings(config(0.0)).unwrap();
        for text in ["one apple", "two apples", "three apple"] {
            embeddings.remember(text, "u", None, None).await.unwrap();
        }
        let hits = embeddings
            .recall("one apple", "u", None, Some(2))
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].content, "one apple");
    }

    #[tokio::test]
    async fn empty_input_is_rejected() {
        let embeddings = build_in_memory_embeddings(EmbeddingsConfig::default()).unwrap();
        assert!(matches!(
            embeddings.remember("  ", "u", None, None).await,
            Err(EmbeddingsError::InvalidInput(_))
        ));
        assert!(matches!(
            embeddings.recall("", "u", None, None).await,
            Err(EmbeddingsError::InvalidInput(_))
        ));
        assert!(matches!(
            embeddings.store_embedding("text", "", None, None, None).await,
            Err(EmbeddingsError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn forget_counts_deleted_records() {
        let embeddings = build_in_memory_embeddings(config(0.0)).unwrap();
        let id = embeddings.remember("temp", "u", None, None).await.unwrap();
        embeddings
            .store_embedding("raw", "u", Some("CONV_1"), Some("MSG_1"), None)
            .await
            .unwrap();

        assert_eq!(
            embeddings.forget("u", None, Some(&[id])).await.unwrap(),
            1
        );
        assert_eq!(embeddings.forget("u", None, None).await.unwrap(), 1);
        assert!(embeddings
            .search_embeddings("raw", "u", None, None)
            .await
            .unwrap()
            .is_empty());
    }
}
