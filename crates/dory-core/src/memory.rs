use serde_json::Value;

use dory_types::{ChatRole, Conversation, HistoryEntry, Message, MessageType};

use crate::error::DoryResult;
use crate::messages::Messages;

/// Unified entry point for memory features; forwards to [`Messages`].
#[derive(Clone)]
pub struct Memory {
    messages: Messages,
}

impl Memory {
    pub fn new(messages: Messages) -> Self {
        Self { messages }
    }

    pub fn messages(&self) -> &Messages {
        &self.messages
    }

    pub async fn get_or_create_conversation(&self, user_id: &str) -> DoryResult<Conversation> {
        self.messages.get_or_create_conversation(user_id).await
    }

    pub async fn get_conversation(&self, conversation_id: &str) -> DoryResult<Conversation> {
        self.messages.get_conversation(conversation_id).await
    }

    pub async fn add_message(
        &self,
        conversation_id: &str,
        user_id: &str,
        chat_role: ChatRole,
        content: impl Into<Value>,
        message_type: MessageType,
    ) -> DoryResult<Message> {
        self.messages
            .add_message(conversation_id, user_id, chat_role, content, message_type)
            .await
    }

    pub async fn get_chat_history(
        &self,
        conversation_id: &str,
        limit: Option<usize>,
    ) -> DoryResult<Vec<HistoryEntry>> {
        self.messages.get_chat_history(conversation_id, limit).await
    }
}
