use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

use dory_types::{ChatRole, Conversation, ConversationConfig, HistoryEntry, Message, MessageType};

use crate::adapter::StorageAdapter;
use crate::error::{DoryError, DoryResult};

/// High-level conversation API used by applications.
///
/// Holds the reuse policy and history defaults; everything else is delegated
/// to the injected [`StorageAdapter`].
#[derive(Clone)]
pub struct Messages {
    adapter: Arc<dyn StorageAdapter>,
    config: ConversationConfig,
}

impl Messages {
    /// Fails with `InvalidConfig` when `config` does not validate.
    pub fn new(adapter: Arc<dyn StorageAdapter>, config: ConversationConfig) -> DoryResult<Self> {
        config.validate().map_err(DoryError::InvalidConfig)?;
        Ok(Self { adapter, config })
    }

    pub fn with_defaults(adapter: Arc<dyn StorageAdapter>) -> Self {
        Self {
            adapter,
            config: ConversationConfig::default(),
        }
    }

    pub fn config(&self) -> &ConversationConfig {
        &self.config
    }

    pub fn adapter(&self) -> &Arc<dyn StorageAdapter> {
        &self.adapter
    }

    /// Reuse the user's latest conversation if it was active within the
    /// reuse window, otherwise start a new one.
    ///
    /// A reused conversation is returned untouched; only appending a message
    /// moves its `updated_at` forward. Stale conversations are left as they
    /// are.
    pub async fn get_or_create_conversation(&self, user_id: &str) -> DoryResult<Conversation> {
        let cutoff = Duration::try_days(self.config.reuse_window_days)
            .and_then(|window| Utc::now().checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        if let Some(conversation) = self
            .adapter
            .find_recent_conversation(user_id, cutoff)
            .await?
        {
            tracing::debug!(
                target: "dory.messages",
                user_id,
                conversation_id = %conversation.id,
                "reusing conversation"
            );
            return Ok(conversation);
        }

        let conversation = self.adapter.create_conversation(user_id).await?;
        tracing::info!(
            target: "dory.messages",
            user_id,
            conversation_id = %conversation.id,
            reuse_window_days = self.config.reuse_window_days,
            "started new conversation"
        );
        Ok(conversation)
    }

    /// Fetch a conversation, failing with `ConversationNotFound` if absent.
    pub async fn get_conversation(&self, conversation_id: &str) -> DoryResult<Conversation> {
        self.adapter
            .get_conversation(conversation_id)
            .await?
            .ok_or_else(|| DoryError::ConversationNotFound(conversation_id.to_string()))
    }

    pub async fn add_message(
        &self,
        conversation_id: &str,
        user_id: &str,
        chat_role: ChatRole,
        content: impl Into<Value>,
        message_type: MessageType,
    ) -> DoryResult<Message> {
        let message = self
            .adapter
            .add_message(
                conversation_id,
                user_id,
                chat_role,
                content.into(),
                message_type,
            )
            .await?;
        tracing::debug!(
            target: "dory.messages",
            conversation_id,
            message_id = %message.id,
            role = %chat_role,
            "message appended"
        );
        Ok(message)
    }

    /// The newest `limit` messages, oldest first. `None` or `Some(0)` means
    /// the configured `history_limit`.
    pub async fn get_chat_history(
        &self,
        conversation_id: &str,
        limit: Option<usize>,
    ) -> DoryResult<Vec<HistoryEntry>> {
        let limit = match limit {
            Some(limit) if limit > 0 => limit,
            _ => self.config.history_limit,
        };
        self.adapter.get_chat_history(conversation_id, limit).await
    }
}
