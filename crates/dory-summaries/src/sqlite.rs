use async_trait::async_trait;
use chrono::{SubsecRound, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::{Map, Value};

use dory_core::sqlite::{format_timestamp, parse_timestamp};
use dory_core::{generate_prefixed_id, DoryError, DoryResult, SqliteStore};
use dory_types::{UserAction, UserSummary, SUMMARY_ID_PREFIX};

use crate::adapter::SummaryAdapter;

/// [`SummaryAdapter`] sharing a [`SqliteStore`] with the conversation tables.
#[derive(Clone)]
pub struct SqliteSummaryAdapter {
    store: SqliteStore,
}

impl SqliteSummaryAdapter {
    pub async fn new(store: SqliteStore) -> DoryResult<Self> {
        store.with_connection(init_schema).await?;
        Ok(Self { store })
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }
}

fn init_schema(conn: &Connection) -> DoryResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS user_summaries (
            id               TEXT PRIMARY KEY,
            user_id          TEXT NOT NULL UNIQUE,
            content          TEXT NOT NULL,
            metadata         TEXT NOT NULL DEFAULT '{}',
            conversation_ids TEXT NOT NULL DEFAULT '[]',
            action_ids       TEXT NOT NULL DEFAULT '[]',
            created_at       TEXT NOT NULL,
            updated_at       TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_user_summaries_updated ON user_summaries(updated_at);

        CREATE TABLE IF NOT EXISTS user_actions (
            id              TEXT PRIMARY KEY,
            user_id         TEXT NOT NULL,
            action_type     TEXT NOT NULL,
            action_name     TEXT NOT NULL,
            metadata        TEXT NOT NULL DEFAULT '{}',
            conversation_id TEXT,
            created_at      TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_user_actions_user_created
            ON user_actions(user_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_user_actions_user_type
            ON user_actions(user_id, action_type);",
    )?;
    Ok(())
}

const SUMMARY_COLUMNS: &str =
    "id, user_id, content, metadata, conversation_ids, action_ids, created_at, updated_at";

struct SummaryRow {
    id: String,
    user_id: String,
    content: String,
    metadata: String,
    conversation_ids: String,
    action_ids: String,
    created_at: String,
    updated_at: String,
}

fn read_summary_row(row: &Row) -> rusqlite::Result<SummaryRow> {
    Ok(SummaryRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        content: row.get(2)?,
        metadata: row.get(3)?,
        conversation_ids: row.get(4)?,
        action_ids: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn summary_from_row(row: SummaryRow) -> DoryResult<UserSummary> {
    Ok(UserSummary {
        id: row.id,
        user_id: row.user_id,
        content: row.content,
        metadata: parse_object(&row.metadata)?,
        conversation_ids: serde_json::from_str(&row.conversation_ids)?,
        action_ids: serde_json::from_str(&row.action_ids)?,
        created_at: parse_timestamp(&row.created_at)?,
        updated_at: parse_timestamp(&row.updated_at)?,
    })
}

struct ActionRow {
    id: String,
    user_id: String,
    action_type: String,
    action_name: String,
    metadata: String,
    conversation_id: Option<String>,
    created_at: String,
}

fn read_action_row(row: &Row) -> rusqlite::Result<ActionRow> {
    Ok(ActionRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        action_type: row.get(2)?,
        action_name: row.get(3)?,
        metadata: row.get(4)?,
        conversation_id: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn action_from_row(row: ActionRow) -> DoryResult<UserAction> {
    Ok(UserAction {
        id: row.id,
        user_id: row.user_id,
        action_type: row.action_type,
        action_name: row.action_name,
        metadata: parse_object(&row.metadata)?,
        conversation_id: row.conversation_id,
        created_at: parse_timestamp(&row.created_at)?,
    })
}

fn parse_object(raw: &str) -> DoryResult<Map<String, Value>> {
    match serde_json::from_str::<Value>(raw)? {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => Err(DoryError::InvalidData(format!(
            "expected metadata object, found {other}"
        ))),
    }
}

#[async_trait]
impl SummaryAdapter for SqliteSummaryAdapter {
    async fn get_summary(&self, user_id: &str) -> DoryResult<Option<UserSummary>> {
        let row = self
            .store
            .with_connection(move |conn| {
                Ok(conn
                    .query_row(
                        &format!("SELECT {SUMMARY_COLUMNS} FROM user_summaries WHERE user_id = ?1"),
                        params![user_id],
                        read_summary_row,
                    )
                    .optional()?)
            })
            .await?;
        row.map(summary_from_row).transpose()
    }

    async fn create_summary(&self, user_id: &str) -> DoryResult<UserSummary> {
        let summary = UserSummary::empty(
            generate_prefixed_id(SUMMARY_ID_PREFIX),
            user_id.to_string(),
            Utc::now().trunc_subsecs(6),
        );
        let record = summary.clone();
        self.store
            .with_transaction(move |tx| {
                let exists = tx
                    .query_row(
                        "SELECT 1 FROM user_summaries WHERE user_id = ?1",
                        params![record.user_id],
                        |_| Ok(()),
                    )
                    .optional()?
                    .is_some();
                if exists {
                    return Err(DoryError::InvalidData(format!(
                        "summary already exists for user {}",
                        record.user_id
                    )));
                }
                let created_at = format_timestamp(&record.created_at);
                tx.execute(
                    "INSERT INTO user_summaries
                        (id, user_id, content, metadata, conversation_ids, action_ids, created_at, updated_at)
                     VALUES (?1, ?2, ?3, '{}', '[]', '[]', ?4, ?4)",
                    params![record.id, record.user_id, record.content, created_at],
                )?;
                Ok(())
            })
            .await?;
        Ok(summary)
    }

    async fn update_summary(&self, summary: &UserSummary) -> DoryResult<UserSummary> {
        let mut updated = summary.clone();
        let now = Utc::now().trunc_subsecs(6);
        let metadata = serde_json::to_string(&summary.metadata)?;
        let conversation_ids = serde_json::to_string(&summary.conversation_ids)?;
        let action_ids = serde_json::to_string(&summary.action_ids)?;
        let id = summary.id.clone();
        let content = summary.content.clone();

        let stored = self
            .store
            .with_transaction(move |tx| {
                let changed = tx.execute(
                    "UPDATE user_summaries
                     SET content = ?2, metadata = ?3, conversation_ids = ?4, action_ids = ?5,
                         updated_at = MAX(created_at, ?6)
                     WHERE id = ?1",
                    params![
                        id,
                        content,
                        metadata,
                        conversation_ids,
                        action_ids,
                        format_timestamp(&now)
                    ],
                )?;
                if changed == 0 {
                    return Err(DoryError::NotFound(format!("summary {id}")));
                }
                Ok(tx.query_row(
                    "SELECT created_at, updated_at FROM user_summaries WHERE id = ?1",
                    params![id],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
                )?)
            })
            .await?;

        updated.created_at = parse_timestamp(&stored.0)?;
        updated.updated_at = parse_timestamp(&stored.1)?;
        Ok(updated)
    }

    async fn add_action(&self, action: UserAction) -> DoryResult<UserAction> {
        let metadata = serde_json::to_string(&action.metadata)?;
        let record = action.clone();
        self.store
            .with_connection(move |conn| {
                conn.execute(
                    "INSERT INTO user_actions
                        (id, user_id, action_type, action_name, metadata, conversation_id, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        record.id,
                        record.user_id,
                        record.action_type,
                        record.action_name,
                        metadata,
                        record.conversation_id,
                        format_timestamp(&record.created_at)
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(action)
    }

    async fn get_user_actions(
        &self,
        user_id: &str,
        action_type: Option<&str>,
        limit: usize,
    ) -> DoryResult<Vec<UserAction>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = self
            .store
            .with_connection(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, user_id, action_type, action_name, metadata, conversation_id, created_at
                     FROM user_actions
                     WHERE user_id = ?1 AND (?2 IS NULL OR action_type = ?2)
                     ORDER BY created_at DESC, rowid DESC
                     LIMIT ?3",
                )?;
                let rows = stmt
                    .query_map(params![user_id, action_type, limit], read_action_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        rows.into_iter().map(action_from_row).collect()
    }
}
