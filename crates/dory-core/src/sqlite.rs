// Document-store adapter
// Conversations and messages as SQLite rows; message content is kept as JSON text.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;

use dory_types::{ChatRole, Conversation, ConversationConfig, HistoryEntry, Message, MessageType};

use crate::adapter::StorageAdapter;
use crate::error::{DoryError, DoryResult};
use crate::ids::generate_prefixed_id;
use crate::store::SqliteStore;

/// Persistent [`StorageAdapter`] over an explicitly opened [`SqliteStore`].
#[derive(Clone)]
pub struct SqliteAdapter {
    store: SqliteStore,
    conversation_id_prefix: String,
    message_id_prefix: String,
}

impl SqliteAdapter {
    /// Wrap an open store and make sure the schema exists.
    pub async fn new(store: SqliteStore, config: &ConversationConfig) -> DoryResult<Self> {
        store.with_connection(init_schema).await?;
        Ok(Self {
            store,
            conversation_id_prefix: config.conversation_id_prefix.clone(),
            message_id_prefix: config.message_id_prefix.clone(),
        })
    }

    /// Open a database file using the configured connection timeout.
    pub async fn open(path: &Path, config: &ConversationConfig) -> DoryResult<Self> {
        let timeout = Duration::from_secs(config.connection_timeout_seconds);
        let store = SqliteStore::open(path, timeout).await?;
        Self::new(store, config).await
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    /// Close the underlying connection.
    pub async fn close(&self) -> DoryResult<()> {
        self.store.close().await
    }
}

fn init_schema(conn: &Connection) -> DoryResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS conversations (
            id         TEXT PRIMARY KEY,
            user_id    TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_conversations_user ON conversations(user_id);
        CREATE INDEX IF NOT EXISTS idx_conversations_user_updated
            ON conversations(user_id, updated_at);

        CREATE TABLE IF NOT EXISTS messages (
            id              TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL,
            user_id         TEXT NOT NULL,
            chat_role       TEXT NOT NULL,
            content         TEXT NOT NULL,
            message_type    TEXT NOT NULL,
            created_at      TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id);
        CREATE INDEX IF NOT EXISTS idx_messages_conversation_created
            ON messages(conversation_id, created_at);",
    )?;
    Ok(())
}

/// Current time at the precision the schema stores.
pub(crate) fn now_utc() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Fixed-width UTC text, so lexical order matches chronological order.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(raw: &str) -> DoryResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DoryError::InvalidData(format!("bad timestamp '{raw}': {e}")))
}

type ConversationRow = (String, String, String, String);

fn read_conversation_row(row: &Row) -> rusqlite::Result<ConversationRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn conversation_from_row(row: ConversationRow) -> DoryResult<Conversation> {
    let (id, user_id, created_at, updated_at) = row;
    Ok(Conversation {
        id,
        user_id,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

fn parse_role(raw: &str) -> DoryResult<ChatRole> {
    raw.parse::<ChatRole>().map_err(DoryError::InvalidData)
}

#[async_trait]
impl StorageAdapter for SqliteAdapter {
    async fn find_recent_conversation(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> DoryResult<Option<Conversation>> {
        let since = format_timestamp(&since);
        let row = self
            .store
            .with_connection(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT id, user_id, created_at, updated_at
                         FROM conversations
                         WHERE user_id = ?1 AND updated_at >= ?2
                         ORDER BY updated_at DESC, rowid DESC
                         LIMIT 1",
                        params![user_id, since],
                        read_conversation_row,
                    )
                    .optional()?)
            })
            .await?;
        row.map(conversation_from_row).transpose()
    }

    async fn create_conversation(&self, user_id: &str) -> DoryResult<Conversation> {
        let conversation = Conversation::new(
            generate_prefixed_id(&self.conversation_id_prefix),
            user_id.to_string(),
            now_utc(),
        );
        let record = conversation.clone();
        self.store
            .with_connection(move |conn| {
                let stamp = format_timestamp(&record.created_at);
                conn.execute(
                    "INSERT INTO conversations (id, user_id, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![record.id, record.user_id, stamp, stamp],
                )?;
                Ok(())
            })
            .await?;
        tracing::debug!(
            target: "dory.storage",
            conversation_id = %conversation.id,
            "created sqlite conversation"
        );
        Ok(conversation)
    }

    async fn get_conversation(&self, conversation_id: &str) -> DoryResult<Option<Conversation>> {
        let row = self
            .store
            .with_connection(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT id, user_id, created_at, updated_at
                         FROM conversations WHERE id = ?1",
                        params![conversation_id],
                        read_conversation_row,
                    )
                    .optional()?)
            })
            .await?;
        row.map(conversation_from_row).transpose()
    }

    async fn update_conversation_timestamp(&self, conversation_id: &str) -> DoryResult<()> {
        let now = format_timestamp(&now_utc());
        self.store
            .with_connection(move |conn| {
                conn.execute(
                    "UPDATE conversations SET updated_at = MAX(created_at, ?2) WHERE id = ?1",
                    params![conversation_id, now],
                )?;
                Ok(())
            })
            .await
    }

    async fn add_message(
        &self,
        conversation_id: &str,
        user_id: &str,
        chat_role: ChatRole,
        content: Value,
        message_type: MessageType,
    ) -> DoryResult<Message> {
        let message = Message {
            id: generate_prefixed_id(&self.message_id_prefix),
            conversation_id: conversation_id.to_string(),
            user_id: user_id.to_string(),
            chat_role,
            content,
            message_type,
            created_at: now_utc(),
        };
        let record = message.clone();
        self.store
            .with_transaction(move |tx| {
                let exists = tx
                    .query_row(
                        "SELECT 1 FROM conversations WHERE id = ?1",
                        params![record.conversation_id],
                        |_| Ok(()),
                    )
                    .optional()?
                    .is_some();
                if !exists {
                    return Err(DoryError::ConversationNotFound(
                        record.conversation_id.clone(),
                    ));
                }

                let stamp = format_timestamp(&record.created_at);
                let content = serde_json::to_string(&record.content)?;
                tx.execute(
                    "INSERT INTO messages
                        (id, conversation_id, user_id, chat_role, content, message_type, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        record.id,
                        record.conversation_id,
                        record.user_id,
                        record.chat_role.as_str(),
                        content,
                        record.message_type.as_str(),
                        stamp
                    ],
                )?;
                tx.execute(
                    "UPDATE conversations SET updated_at = MAX(created_at, ?2) WHERE id = ?1",
                    params![record.conversation_id, stamp],
                )?;
                Ok(())
            })
            .await?;
        Ok(message)
    }

    async fn get_chat_history(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> DoryResult<Vec<HistoryEntry>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = self
            .store
            .with_connection(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT chat_role, content FROM (
                        SELECT chat_role, content, created_at, rowid AS seq
                        FROM messages
                        WHERE conversation_id = ?1
                        ORDER BY created_at DESC, rowid DESC
                        LIMIT ?2
                     )
                     ORDER BY created_at ASC, seq ASC",
                )?;
                let rows = stmt
                    .query_map(params![conversation_id, limit], |row| {
                        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        rows.into_iter()
            .map(|(role, content)| {
                Ok(HistoryEntry {
                    role: parse_role(&role)?,
                    content: serde_json::from_str(&content)?,
                })
            })
            .collect()
    }

    async fn delete_conversation(&self, conversation_id: &str) -> DoryResult<bool> {
        self.store
            .with_transaction(move |tx| {
                tx.execute(
                    "DELETE FROM messages WHERE conversation_id = ?1",
                    params![conversation_id],
                )?;
                let deleted = tx.execute(
                    "DELETE FROM conversations WHERE id = ?1",
                    params![conversation_id],
                )?;
                Ok(deleted > 0)
            })
            .await
    }
}
