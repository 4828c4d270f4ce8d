use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::EmbeddingsResult;

/// Distinguishes curated memories from raw message embeddings. Searches of
/// one kind never return the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Memory,
    RawEmbedding,
}

impl RecordKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordKind::Memory => "memory",
            RecordKind::RawEmbedding => "raw_embedding",
        }
    }

    pub fn id_prefix(self) -> &'static str {
        match self {
            RecordKind::Memory => "MEM_",
            RecordKind::RawEmbedding => "EMB_",
        }
    }
}

/// A search hit. `score` is `1 - cosine distance`, so higher is closer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryRecord {
    pub id: String,
    pub content: String,
    pub score: f64,
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait MemoryAdapter: Send + Sync {
    async fn add_memory(
        &self,
        content: &str,
        user_id: &str,
        conversation_id: Option<&str>,
        metadata: Option<Map<String, Value>>,
    ) -> EmbeddingsResult<String>;

    async fn search_memories(
        &self,
        query: &str,
        user_id: &str,
        conversation_id: Option<&str>,
        limit: usize,
        since: Option<DateTime<Utc>>,
    ) -> EmbeddingsResult<Vec<MemoryRecord>>;

    /// Delete by id, or every record of the user (optionally one conversation)
    /// when `memory_ids` is `None`. Unknown or foreign ids are skipped.
    async fn delete_memories(
        &self,
        user_id: &str,
        conversation_id: Option<&str>,
        memory_ids: Option<&[String]>,
    ) -> EmbeddingsResult<usize>;

    async fn add_embedding(
        &self,
        content: &str,
        user_id: &str,
        conversation_id: Option<&str>,
        message_id: Option<&str>,
        metadata: Option<Map<String, Value>>,
    ) -> EmbeddingsResult<String>;

    async fn search_embeddings(
        &self,
        query: &str,
        user_id: &str,
        conversation_id: Option<&str>,
        limit: usize,
    ) -> EmbeddingsResult<Vec<MemoryRecord>>;
}
