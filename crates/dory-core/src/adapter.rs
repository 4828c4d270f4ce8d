use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use dory_types::{ChatRole, Conversation, HistoryEntry, Message, MessageType};

use crate::error::DoryResult;

/// Persistence operations a conversation backend must provide.
///
/// Lookups report absence as `Ok(None)`; only backend failures surface as
/// errors. Implementations must be safe to share between concurrent callers.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// The user's most recently updated conversation with
    /// `updated_at >= since`, if any.
    async fn find_recent_conversation(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> DoryResult<Option<Conversation>>;

    /// Persist a new conversation with both timestamps set to now.
    async fn create_conversation(&self, user_id: &str) -> DoryResult<Conversation>;

    async fn get_conversation(&self, conversation_id: &str) -> DoryResult<Option<Conversation>>;

    /// Set `updated_at` to now. Unknown ids are a no-op.
    async fn update_conversation_timestamp(&self, conversation_id: &str) -> DoryResult<()>;

    /// Append a message and refresh the parent conversation's `updated_at`.
    ///
    /// Fails with `ConversationNotFound` when the parent does not exist.
    async fn add_message(
        &self,
        conversation_id: &str,
        user_id: &str,
        chat_role: ChatRole,
        content: Value,
        message_type: MessageType,
    ) -> DoryResult<Message>;

    /// The newest `limit` messages of a conversation, oldest first.
    async fn get_chat_history(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> DoryResult<Vec<HistoryEntry>>;

    /// Remove a conversation and its messages. Returns whether it existed.
    async fn delete_conversation(&self, conversation_id: &str) -> DoryResult<bool>;
}
