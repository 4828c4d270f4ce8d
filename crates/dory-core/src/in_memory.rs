use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::RwLock;

use dory_types::{
    ChatRole, Conversation, ConversationConfig, HistoryEntry, Message, MessageType,
    DEFAULT_CONVERSATION_ID_PREFIX, DEFAULT_MESSAGE_ID_PREFIX,
};

use crate::adapter::StorageAdapter;
use crate::error::{DoryError, DoryResult};
use crate::ids::generate_prefixed_id;

/// Process-local adapter for tests and demos.
///
/// Messages are kept in insertion order so that equal timestamps still
/// replay in the order they were appended.
pub struct InMemoryAdapter {
    conversation_id_prefix: String,
    message_id_prefix: String,
    conversations: RwLock<HashMap<String, Conversation>>,
    messages: RwLock<Vec<Message>>,
}

impl InMemoryAdapter {
    pub fn new() -> Self {
        Self::with_prefixes(DEFAULT_CONVERSATION_ID_PREFIX, DEFAULT_MESSAGE_ID_PREFIX)
    }

    pub fn with_config(config: &ConversationConfig) -> Self {
        Self::with_prefixes(&config.conversation_id_prefix, &config.message_id_prefix)
    }

    fn with_prefixes(conversation_id_prefix: &str, message_id_prefix: &str) -> Self {
        Self {
            conversation_id_prefix: conversation_id_prefix.to_string(),
            message_id_prefix: message_id_prefix.to_string(),
            conversations: RwLock::new(HashMap::new()),
            messages: RwLock::new(Vec::new()),
        }
    }

    /// Store an existing conversation record as-is, replacing any record
    /// with the same id.
    pub async fn insert_conversation(&self, conversation: Conversation) {
        self.conversations
            .write()
            .await
            .insert(conversation.id.clone(), conversation);
    }

    pub async fn conversation_count(&self) -> usize {
        self.conversations.read().await.len()
    }

    pub async fn message_count(&self) -> usize {
        self.messages.read().await.len()
    }
}

impl Default for InMemoryAdapter {
    fn default() -> Self {
        Self::new()
    }
}

fn touch(conversation: &mut Conversation, now: DateTime<Utc>) {
    conversation.updated_at = now.max(conversation.created_at);
}

#[async_trait]
impl StorageAdapter for InMemoryAdapter {
    async fn find_recent_conversation(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> DoryResult<Option<Conversation>> {
        let conversations = self.conversations.read().await;
        Ok(conversations
            .values()
            .filter(|conv| conv.user_id == user_id && conv.updated_at >= since)
            // Ties fall back to creation time, then id, so the pick is stable.
            .max_by(|a, b| {
                (a.updated_at, a.created_at, &a.id).cmp(&(b.updated_at, b.created_at, &b.id))
            })
            .cloned())
    }

    async fn create_conversation(&self, user_id: &str) -> DoryResult<Conversation> {
        let conversation = Conversation::new(
            generate_prefixed_id(&self.conversation_id_prefix),
            user_id.to_string(),
            Utc::now(),
        );
        self.conversations
            .write()
            .await
            .insert(conversation.id.clone(), conversation.clone());
        tracing::debug!(
            target: "dory.storage",
            conversation_id = %conversation.id,
            "created in-memory conversation"
        );
        Ok(conversation)
    }

    async fn get_conversation(&self, conversation_id: &str) -> DoryResult<Option<Conversation>> {
        Ok(self.conversations.read().await.get(conversation_id).cloned())
    }

    async fn update_conversation_timestamp(&self, conversation_id: &str) -> DoryResult<()> {
        if let Some(conversation) = self.conversations.write().await.get_mut(conversation_id) {
            touch(conversation, Utc::now());
        }
        Ok(())
    }

    async fn add_message(
        &self,
        conversation_id: &str,
        user_id: &str,
        chat_role: ChatRole,
        content: Value,
        message_type: MessageType,
    ) -> DoryResult<Message> {
        // Lock order: conversations, then messages.
        let mut conversations = self.conversations.write().await;
        let Some(conversation) = conversations.get_mut(conversation_id) else {
            return Err(DoryError::ConversationNotFound(conversation_id.to_string()));
        };

        let now = Utc::now();
        let message = Message {
            id: generate_prefixed_id(&self.message_id_prefix),
            conversation_id: conversation_id.to_string(),
            user_id: user_id.to_string(),
            chat_role,
            content,
            message_type,
            created_at: now,
        };
        self.messages.write().await.push(message.clone());
        touch(conversation, now);

        Ok(message)
    }

    async fn get_chat_history(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> DoryResult<Vec<HistoryEntry>> {
        let messages = self.messages.read().await;
        let mut selected = messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .collect::<Vec<_>>();
        // Stable sort keeps insertion order for equal timestamps.
        selected.sort_by_key(|m| m.created_at);
        let start = selected.len().saturating_sub(limit);
        Ok(selected[start..]
            .iter()
            .map(|m| m.history_entry())
            .collect())
    }

    async fn delete_conversation(&self, conversation_id: &str) -> DoryResult<bool> {
        let mut conversations = self.conversations.write().await;
        let existed = conversations.remove(conversation_id).is_some();
        self.messages
            .write()
            .await
            .retain(|m| m.conversation_id != conversation_id);
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn stale_conversation(id: &str, user_id: &str, days_ago: i64) -> Conversation {
        let at = Utc::now() - Duration::days(days_ago);
        Conversation {
            id: id.to_string(),
            user_id: user_id.to_string(),
            created_at: at,
            updated_at: at,
        }
    }

    #[tokio::test]
    async fn find_recent_returns_created_conversation() {
        let adapter = InMemoryAdapter::new();
        let conv = adapter.create_conversation("user_1").await.unwrap();

        let recent = adapter
            .find_recent_conversation("user_1", conv.updated_at)
            .await
            .unwrap();
        assert_eq!(recent, Some(conv));
    }

    #[tokio::test]
    async fn equal_timestamps_replay_in_insertion_order() {
        let adapter = InMemoryAdapter::new();
        let conv = adapter.create_conversation("tie-user").await.unwrap();
        let other = adapter.create_conversation("tie-user").await.unwrap();
        for text in ["m1", "m2", "m3", "m4", "m5"] {
            adapter
                .add_message(&conv.id, "tie-user", ChatRole::User, json!(text), MessageType::UserMessage)
                .await
                .unwrap();
            adapter
                .add_message(&other.id, "tie-user", ChatRole::Ai, json!("noise"), MessageType::RequestResponse)
                .await
                .unwrap();
        }

        let stamp = Utc::now() - Duration::hours(1);
        for message in adapter.messages.write().await.iter_mut() {
            message.created_at = stamp;
        }

        let all = adapter.get_chat_history(&conv.id, 100).await.unwrap();
        assert_eq!(
            serde_json::to_value(&all).unwrap(),
            json!([{"user": "m1"}, {"user": "m2"}, {"user": "m3"}, {"user": "m4"}, {"user": "m5"}])
        );
        let tail = adapter.get_chat_history(&conv.id, 2).await.unwrap();
        assert_eq!(
            serde_json::to_value(&tail).unwrap(),
            json!([{"user": "m4"}, {"user": "m5"}])
        );
    }

    #[tokio::test]
    async fn find_recent_picks_most_recently_updated() {
        let adapter = InMemoryAdapter::new();
        adapter
            .insert_conversation(stale_conversation("CONV_old", "u", 3))
            .await;
        adapter
            .insert_conversation(stale_conversation("CONV_mid", "u", 2))
            .await;
        adapter
            .insert_conversation(stale_conversation("CONV_new", "u", 1))
            .await;
        adapter
            .insert_conversation(stale_conversation("CONV_other", "someone-else", 0))
            .await;

        let since = Utc::now() - Duration::days(10);
        let found = adapter
            .find_recent_conversation("u", since)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, "CONV_new");
    }

    #[tokio::test]
    async fn find_recent_ignores_conversations_before_cutoff() {
        let adapter = InMemoryAdapter::new();
        adapter
            .insert_conversation(stale_conversation("CONV_old", "u", 20))
            .await;

        let since = Utc::now() - Duration::days(14);
        assert!(adapter
            .find_recent_conversation("u", since)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn add_and_fetch_messages() {
        let adapter = InMemoryAdapter::new();
        let conv = adapter.create_conversation("u").await.unwrap();

        let first = adapter
            .add_message(&conv.id, "u", ChatRole::User, json!("hi"), MessageType::UserMessage)
            .await
            .unwrap();
        assert!(first.id.starts_with("MSG_"));
        adapter
            .add_message(
                &conv.id,
                "u",
                ChatRole::Ai,
                json!("hello"),
                MessageType::RequestResponse,
            )
            .await
            .unwrap();

        let history = adapter.get_chat_history(&conv.id, 5).await.unwrap();
        assert_eq!(
            history,
            vec![
                HistoryEntry::new(ChatRole::User, "hi"),
                HistoryEntry::new(ChatRole::Ai, "hello"),
            ]
        );
    }

    #[tokio::test]
    async fn add_message_refreshes_parent_timestamp() {
        let adapter = InMemoryAdapter::new();
        adapter
            .insert_conversation(stale_conversation("CONV_x", "u", 5))
            .await;
        let before = adapter.get_conversation("CONV_x").await.unwrap().unwrap();

        let message = adapter
            .add_message("CONV_x", "u", ChatRole::User, json!("ping"), MessageType::UserMessage)
            .await
            .unwrap();

        let after = adapter.get_conversation("CONV_x").await.unwrap().unwrap();
        assert!(after.updated_at > before.updated_at);
        assert!(after.updated_at >= message.created_at);
        assert_eq!(after.created_at, before.created_at);
    }

    #[tokio::test]
    async fn add_message_rejects_unknown_conversation() {
        let adapter = InMemoryAdapter::new();
        let err = adapter
            .add_message("CONV_missing", "u", ChatRole::User, json!("x"), MessageType::UserMessage)
            .await
            .unwrap_err();
        assert!(matches!(err, DoryError::ConversationNotFound(id) if id == "CONV_missing"));
        assert_eq!(adapter.message_count().await, 0);
    }

    #[tokio::test]
    async fn update_timestamp_on_unknown_id_is_noop() {
        let adapter = InMemoryAdapter::new();
        adapter
            .update_conversation_timestamp("CONV_missing")
            .await
            .unwrap();
        assert_eq!(adapter.conversation_count().await, 0);
    }

    #[tokio::test]
    async fn history_is_scoped_to_conversation() {
        let adapter = InMemoryAdapter::new();
        let a = adapter.create_conversation("u").await.unwrap();
        let b = adapter.create_conversation("u").await.unwrap();
        adapter
            .add_message(&a.id, "u", ChatRole::User, json!("in a"), MessageType::UserMessage)
            .await
            .unwrap();
        adapter
            .add_message(&b.id, "u", ChatRole::User, json!("in b"), MessageType::UserMessage)
            .await
            .unwrap();

        let history = adapter.get_chat_history(&a.id, 10).await.unwrap();
        assert_eq!(history, vec![HistoryEntry::new(ChatRole::User, "in a")]);
    }

    #[tokio::test]
    async fn delete_conversation_drops_messages() {
        let adapter = InMemoryAdapter::new();
        let conv = adapter.create_conversation("u").await.unwrap();
        adapter
            .add_message(&conv.id, "u", ChatRole::User, json!("x"), MessageType::UserMessage)
            .await
            .unwrap();

        assert!(adapter.delete_conversation(&conv.id).await.unwrap());
        assert!(!adapter.delete_conversation(&conv.id).await.unwrap());
        assert_eq!(adapter.message_count().await, 0);
        assert!(adapter.get_conversation(&conv.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn custom_prefixes_are_applied() {
        let config = ConversationConfig {
            conversation_id_prefix: "C-".to_string(),
            message_id_prefix: "M-".to_string(),
            ..Default::default()
        };
        let adapter = InMemoryAdapter::with_config(&config);
        let conv = adapter.create_conversation("u").await.unwrap();
        let msg = adapter
            .add_message(&conv.id, "u", ChatRole::Human, json!("x"), MessageType::UserMessage)
            .await
            .unwrap();
        assert!(conv.id.starts_with("C-"));
        assert!(msg.id.starts_with("M-"));
    }
}
