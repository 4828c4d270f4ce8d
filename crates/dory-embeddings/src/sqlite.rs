// SQLite-backed memory store.
// Vectors are kept as JSON text and compared with sqlite-vec's scalar
// distance functions, so filters on user and conversation stay exact.

use std::os::raw::{c_char, c_int};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Once};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use rusqlite::{ffi::sqlite3_auto_extension, params, Connection};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use sqlite_vec::sqlite3_vec_init;
use tokio::sync::Mutex;

use dory_core::config::deep_merge;
use dory_core::generate_prefixed_id;
use dory_core::sqlite::format_timestamp;

use crate::adapter::{MemoryAdapter, MemoryRecord, RecordKind};
use crate::config::EmbeddingsConfig;
use crate::embedder::Embedder;
use crate::error::{EmbeddingsError, EmbeddingsResult};

static REGISTER_SQLITE_VEC: Once = Once::new();

fn register_sqlite_vec() {
    REGISTER_SQLITE_VEC.call_once(|| unsafe {
        sqlite3_auto_extension(Some(std::mem::transmute::<
            *const (),
            unsafe extern "C" fn(
                *mut rusqlite::ffi::sqlite3,
                *mut *mut c_char,
                *const rusqlite::ffi::sqlite3_api_routines,
            ) -> c_int,
        >(sqlite3_vec_init as *const ())));
    });
}

/// Tunables read from `advanced_config.sqlite`.
#[derive(Debug, Clone, Deserialize)]
struct SqliteOptions {
    busy_timeout_secs: u64,
    wal: bool,
}

impl SqliteOptions {
    fn from_config(config: &EmbeddingsConfig) -> EmbeddingsResult<Self> {
        let mut merged = json!({ "busy_timeout_secs": 10, "wal": true });
        if let Some(overrides) = config.advanced_config.get("sqlite") {
            deep_merge(&mut merged, overrides);
        }
        serde_json::from_value(merged)
            .map_err(|e| EmbeddingsError::InvalidConfig(format!("advanced_config.sqlite: {e}")))
    }
}

pub struct SqliteMemoryAdapter {
    conn: Arc<Mutex<Connection>>,
    table: String,
    embedder: Arc<dyn Embedder>,
    path: Option<PathBuf>,
}

impl SqliteMemoryAdapter {
    pub async fn open(
        path: &Path,
        config: &EmbeddingsConfig,
        embedder: Arc<dyn Embedder>,
    ) -> EmbeddingsResult<Self> {
        config.validate()?;
        let options = SqliteOptions::from_config(config)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        register_sqlite_vec();
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(options.busy_timeout_secs))?;
        if options.wal {
            // PRAGMA journal_mode returns a row, so we use query_row to ignore it
            conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
            conn.execute("PRAGMA synchronous = NORMAL", [])?;
        }
        Self::from_connection(conn, config, embedder, Some(path.to_path_buf()))
    }

    pub fn open_in_memory(
        config: &EmbeddingsConfig,
        embedder: Arc<dyn Embedder>,
    ) -> EmbeddingsResult<Self> {
        config.validate()?;
        register_sqlite_vec();
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, config, embedder, None)
    }

    fn from_connection(
        conn: Connection,
        config: &EmbeddingsConfig,
        embedder: Arc<dyn Embedder>,
        path: Option<PathBuf>,
    ) -> EmbeddingsResult<Self> {
        let table = config.collection_name.clone();
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id              TEXT PRIMARY KEY,
                user_id         TEXT NOT NULL,
                kind            TEXT NOT NULL,
                conversation_id TEXT,
                content         TEXT NOT NULL,
                metadata        TEXT NOT NULL DEFAULT '{{}}',
                embedding       TEXT NOT NULL,
                created_at      TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_{table}_user_kind ON {table}(user_id, kind);
            CREATE INDEX IF NOT EXISTS idx_{table}_conversation ON {table}(conversation_id);"
        ))?;

        tracing::info!(
            target: "dory.embeddings",
            table = %table,
            model = embedder.model_name(),
            dimension = embedder.dimension(),
            "memory store ready"
        );

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            table,
            embedder,
            path,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Version string of the loaded sqlite-vec extension.
    pub async fn vec_version(&self) -> EmbeddingsResult<String> {
        let conn = self.conn.lock().await;
        Ok(conn.query_row("SELECT vec_version()", [], |row| row.get(0))?)
    }

    /// Number of stored records (both kinds) for a user.
    pub async fn count(&self, user_id: &str) -> EmbeddingsResult<usize> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {} WHERE user_id = ?1", self.table),
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as usize)
    }

    async fn insert(
        &self,
        kind: RecordKind,
        content: &str,
        user_id: &str,
        conversation_id: Option<&str>,
        metadata: Map<String, Value>,
    ) -> EmbeddingsResult<String> {
        let embedding = serde_json::to_string(&self.embedder.embed(content).await?)?;
        let metadata = serde_json::to_string(&metadata)?;
        let id = generate_prefixed_id(kind.id_prefix());
        let created_at = format_timestamp(&Utc::now().trunc_subsecs(6));

        let conn = self.conn.lock().await;
        conn.execute(
            &format!(
                "INSERT INTO {} (id, user_id, kind, conversation_id, content, metadata, embedding, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                self.table
            ),
            params![
                id,
                user_id,
                kind.as_str(),
                conversation_id,
                content,
                metadata,
                embedding,
                created_at
            ],
        )?;
        Ok(id)
    }

    async fn search(
        &self,
        kind: RecordKind,
        query: &str,
        user_id: &str,
        conversation_id: Option<&str>,
        limit: usize,
        since: Option<DateTime<Utc>>,
    ) -> EmbeddingsResult<Vec<MemoryRecord>> {
        let embedding = serde_json::to_string(&self.embedder.embed(query).await?)?;
        let since = since.map(|ts| format_timestamp(&ts));
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT id, content, metadata, created_at, vec_distance_cosine(embedding, ?1) AS distance
             FROM {}
             WHERE user_id = ?2 AND kind = ?3
               AND (?4 IS NULL OR conversation_id = ?4)
               AND (?5 IS NULL OR created_at >= ?5)
             ORDER BY distance ASC, rowid DESC
             LIMIT ?6",
            self.table
        ))?;
        let rows = stmt
            .query_map(
                params![embedding, user_id, kind.as_str(), conversation_id, since, limit],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, f64>(4)?,
                    ))
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, content, metadata, created_at, distance)| {
                Ok(MemoryRecord {
                    id,
                    content,
                    score: 1.0 - distance,
                    metadata: parse_metadata(&metadata)?,
                    created_at: parse_created_at(&created_at)?,
                })
            })
            .collect()
    }
}

fn parse_metadata(raw: &str) -> EmbeddingsResult<Map<String, Value>> {
    match serde_json::from_str::<Value>(raw)? {
        Value::Object(map) => Ok(map),
        other => Err(EmbeddingsError::InvalidData(format!(
            "expected metadata object, found {other}"
        ))),
    }
}

fn parse_created_at(raw: &str) -> EmbeddingsResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| EmbeddingsError::InvalidData(format!("bad timestamp '{raw}': {e}")))
}

#[async_trait]
impl MemoryAdapter for SqliteMemoryAdapter {
    async fn add_memory(
        &self,
        content: &str,
        user_id: &str,
        conversation_id: Option<&str>,
        metadata: Option<Map<String, Value>>,
    ) -> EmbeddingsResult<String> {
        let mut metadata = metadata.unwrap_or_default();
        if let Some(conversation_id) = conversation_id {
            metadata.insert("conversation_id".to_string(), json!(conversation_id));
        }
        self.insert(RecordKind::Memory, content, user_id, conversation_id, metadata)
            .await
    }

    async fn search_memories(
        &self,
        query: &str,
        user_id: &str,
        conversation_id: Option<&str>,
        limit: usize,
        since: Option<DateTime<Utc>>,
    ) -> EmbeddingsResult<Vec<MemoryRecord>> {
        self.search(RecordKind::Memory, query, user_id, conversation_id, limit, since)
            .await
    }

    async fn delete_memories(
        &self,
        user_id: &str,
        conversation_id: Option<&str>,
        memory_ids: Option<&[String]>,
    ) -> EmbeddingsResult<usize> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let deleted = match memory_ids {
            Some(ids) => {
                let sql = format!("DELETE FROM {} WHERE id = ?1 AND user_id = ?2", self.table);
                let mut deleted = 0;
                for id in ids {
                    deleted += tx.execute(&sql, params![id, user_id])?;
                }
                deleted
            }
            None => tx.execute(
                &format!(
                    "DELETE FROM {} WHERE user_id = ?1 AND (?2 IS NULL OR conversation_id = ?2)",
                    self.table
                ),
                params![user_id, conversation_id],
            )?,
        };
        tx.commit()?;
        Ok(deleted)
    }

    async fn add_embedding(
        &self,
        content: &str,
        user_id: &str,
        conversation_id: Option<&str>,
        message_id: Option<&str>,
        metadata: Option<Map<String, Value>>,
    ) -> EmbeddingsResult<String> {
        let mut metadata = metadata.unwrap_or_default();
        metadata.insert("type".to_string(), json!(RecordKind::RawEmbedding.as_str()));
        metadata.insert("user_id".to_string(), json!(user_id));
        if let Some(conversation_id) = conversation_id {
            metadata.insert("conversation_id".to_string(), json!(conversation_id));
        }
        if let Some(message_id) = message_id {
            metadata.insert("message_id".to_string(), json!(message_id));
        }
        self.insert(
            RecordKind::RawEmbedding,
            content,
            user_id,
            conversation_id,
            metadata,
        )
        .await
    }

    async fn search_embeddings(
        &self,
        query: &str,
        user_id: &str,
        conversation_id: Option<&str>,
        limit: usize,
    ) -> EmbeddingsResult<Vec<MemoryRecord>> {
        self.search(
            RecordKind::RawEmbedding,
            query,
            user_id,
            conversation_id,
            limit,
            None,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::HashEmbedder;
    use tempfile::TempDir;

    fn adapter() -> SqliteMemoryAdapter {
        let config = EmbeddingsConfig::default();
        let embedder = Arc::new(HashEmbedder::new(config.embedding_dimension).unwrap());
        SqliteMemoryAdapter::open_in_memory(&config, embedder).unwrap()
    }

    #[tokio::test]
    async fn sqlite_vec_is_registered() {
        let version = adapter().vec_version().await.unwrap();
        assert!(version.starts_with('v'));
    }

    #[tokio::test]
    async fn closest_memory_ranks_first() {
        let adapter = adapter();
        adapter
            .add_memory("likes green tea in the morning", "u", None, None)
            .await
            .unwrap();
        let wanted = adapter
            .add_memory("owns a black labrador named Rex", "u", None, None)
            .await
            .unwrap();

        let hits = adapter
            .search_memories("owns a black labrador named Rex", "u", None, 10, None)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, wanted);
        assert!(hits[0].score > 0.99);
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn kinds_and_users_are_isolated() {
        let adapter = adapter();
        adapter.add_memory("same text", "u", None, None).await.unwrap();
        let raw = adapter
            .add_embedding("same text", "u", Some("CONV_1"), Some("MSG_1"), None)
            .await
            .unwrap();
        adapter.add_memory("same text", "other", None, None).await.unwrap();

        let memories = adapter
            .search_memories("same text", "u", None, 10, None)
            .await
            .unwrap();
        assert_eq!(memories.len(), 1);
        assert_ne!(memories[0].id, raw);

        let embeddings = adapter
            .search_embeddings("same text", "u", None, 10)
            .await
            .unwrap();
        assert_eq!(embeddings.len(), 1);
        assert_eq!(embeddings[0].id, raw);
        assert_eq!(embeddings[0].metadata.get("type"), Some(&json!("raw_embedding")));
        assert_eq!(embeddings[0].metadata.get("message_id"), Some(&json!("MSG_1")));
        assert_eq!(embeddings[0].metadata.get("conversation_id"), Some(&json!("CONV_1")));
    }

    #[tokio::test]
    async fn conversation_and_since_filters() {
        let adapter = adapter();
        adapter
            .add_memory("note a", "u", Some("CONV_a"), None)
            .await
            .unwrap();
        adapter
            .add_memory("note b", "u", Some("CONV_b"), None)
            .await
            .unwrap();

        let hits = adapter
            .search_memories("note", "u", Some("CONV_b"), 10, None)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content, "note b");

        let future = Utc::now() + chrono::Duration::hours(1);
        let hits = adapter
            .search_memories("note", "u", None, 10, Some(future))
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn delete_by_ids_skips_foreign_and_unknown() {
        let adapter = adapter();
        let mine = adapter.add_memory("mine", "u", None, None).await.unwrap();
        let theirs = adapter.add_memory("theirs", "v", None, None).await.unwrap();

        let deleted = adapter
            .delete_memories(
                "u",
                None,
                Some(&[mine.clone(), theirs.clone(), "MEM_missing".to_string()]),
            )
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(adapter.count("u").await.unwrap(), 0);
        assert_eq!(adapter.count("v").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn delete_all_for_conversation() {
        let adapter = adapter();
        adapter.add_memory("a", "u", Some("CONV_a"), None).await.unwrap();
        adapter
            .add_embedding("b", "u", Some("CONV_a"), None, None)
            .await
            .unwrap();
        adapter.add_memory("c", "u", Some("CONV_c"), None).await.unwrap();

        assert_eq!(adapter.delete_memories("u", Some("CONV_a"), None).await.unwrap(), 2);
        assert_eq!(adapter.count("u").await.unwrap(), 1);
        assert_eq!(adapter.delete_memories("u", None, None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn file_store_persists_records() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("memories").join("dory_memories.db");
        let config = EmbeddingsConfig::default();
        let embedder: Arc<dyn Embedder> =
            Arc::new(HashEmbedder::new(config.embedding_dimension).unwrap());

        let adapter = SqliteMemoryAdapter::open(&path, &config, embedder.clone())
            .await
            .unwrap();
        adapter.add_memory("kept", "u", None, None).await.unwrap();
        drop(adapter);

        let adapter = SqliteMemoryAdapter::open(&path, &config, embedder).await.unwrap();
        assert_eq!(adapter.path(), Some(path.as_path()));
        assert_eq!(adapter.count("u").await.unwrap(), 1);
    }
}
