use std::sync::Arc;

use dory_core::{
    ChatRole, ConversationConfig, DoryError, InMemoryAdapter, Memory, Messages, MessageType,
    SqliteAdapter, SqliteStore, StorageAdapter,
};
use serde_json::json;
use tempfile::TempDir;

async fn adapters() -> Vec<(&'static str, Arc<dyn StorageAdapter>)> {
    let config = ConversationConfig::default();
    let store = SqliteStore::open_in_memory().unwrap();
    let sqlite = SqliteAdapter::new(store, &config).await.unwrap();
    vec![
        ("in_memory", Arc::new(InMemoryAdapter::new()) as Arc<dyn StorageAdapter>),
        ("sqlite", Arc::new(sqlite) as Arc<dyn StorageAdapter>),
    ]
}

#[tokio::test]
async fn history_window_returns_latest_messages_in_order() {
    for (name, adapter) in adapters().await {
        let messages = Messages::with_defaults(adapter);
        let conv = messages
            .get_or_create_conversation("limit-user")
            .await
            .unwrap();
        for i in 1..=5 {
            let (role, message_type) = if i % 2 == 1 {
                (ChatRole::User, MessageType::UserMessage)
            } else {
                (ChatRole::Ai, MessageType::RequestResponse)
            };
            messages
                .add_message(&conv.id, "limit-user", role, format!("m{i}"), message_type)
                .await
                .unwrap();
        }

        let history = messages.get_chat_history(&conv.id, Some(3)).await.unwrap();
        assert_eq!(
            serde_json::to_value(&history).unwrap(),
            json!([{"user": "m3"}, {"ai": "m4"}, {"user": "m5"}]),
            "adapter {name}"
        );

        let everything = messages.get_chat_history(&conv.id, Some(50)).await.unwrap();
        assert_eq!(everything.len(), 5, "adapter {name}");
        assert_eq!(&everything[2..], &history[..], "adapter {name}");
    }
}

#[tokio::test]
async fn structured_content_survives_storage() {
    for (name, adapter) in adapters().await {
        let memory = Memory::new(Messages::with_defaults(adapter));
        let conv = memory.get_or_create_conversation("u").await.unwrap();
        let payload = json!({"answer": "42", "sources": ["a", "b"], "confidence": 0.9});
        memory
            .add_message(
                &conv.id,
                "u",
                ChatRole::Ai,
                payload.clone(),
                MessageType::RequestResponse,
            )
            .await
            .unwrap();
        let tool_call = json!({"tool": "search", "args": {"query": "hello"}});
        memory
            .add_message(
                &conv.id,
                "u",
                ChatRole::User,
                tool_call.clone(),
                MessageType::UserMessage,
            )
            .await
            .unwrap();

        let history = memory.get_chat_history(&conv.id, None).await.unwrap();
        assert_eq!(history.len(), 2, "adapter {name}");
        assert_eq!(history[0].role, ChatRole::Ai);
        assert_eq!(history[0].content, payload, "adapter {name}");
        assert_eq!(
            serde_json::to_value(history.last().unwrap()).unwrap(),
            json!({"user": {"tool": "search", "args": {"query": "hello"}}}),
            "adapter {name}"
        );
        assert_eq!(history[1].content, tool_call);
    }
}

#[tokio::test]
async fn appending_moves_conversation_forward_and_it_is_reused() {
    for (name, adapter) in adapters().await {
        let messages = Messages::with_defaults(adapter);
        let conv = messages.get_or_create_conversation("u").await.unwrap();
        let message = messages
            .add_message(&conv.id, "u", ChatRole::Human, "hello", MessageType::UserMessage)
            .await
            .unwrap();
        assert_eq!(message.conversation_id, conv.id);
        assert!(message.id.starts_with("MSG_"), "adapter {name}");

        let reloaded = messages.get_conversation(&conv.id).await.unwrap();
        assert!(reloaded.updated_at >= conv.updated_at, "adapter {name}");

        let again = messages.get_or_create_conversation("u").await.unwrap();
        assert_eq!(again.id, conv.id, "adapter {name}");
    }
}

#[tokio::test]
async fn unknown_conversation_is_reported() {
    for (name, adapter) in adapters().await {
        let messages = Messages::with_defaults(adapter);
        let err = messages.get_conversation("CONV_missing").await.unwrap_err();
        assert!(matches!(err, DoryError::ConversationNotFound(_)), "adapter {name}");

        let err = messages
            .add_message("CONV_missing", "u", ChatRole::User, "x", MessageType::UserMessage)
            .await
            .unwrap_err();
        assert!(matches!(err, DoryError::ConversationNotFound(_)), "adapter {name}");

        let history = messages.get_chat_history("CONV_missing", None).await.unwrap();
        assert!(history.is_empty(), "adapter {name}");
    }
}

#[tokio::test]
async fn file_database_persists_across_reopen() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("state").join("dory.db");
    let config = ConversationConfig::default();

    let adapter = SqliteAdapter::open(&path, &config).await.unwrap();
    let messages = Messages::new(Arc::new(adapter.clone()), config.clone()).unwrap();
    let conv = messages.get_or_create_conversation("u").await.unwrap();
    messages
        .add_message(&conv.id, "u", ChatRole::User, "kept", MessageType::UserMessage)
        .await
        .unwrap();
    adapter.close().await.unwrap();

    let err = messages.get_conversation(&conv.id).await.unwrap_err();
    assert!(matches!(err, DoryError::Closed));

    let reopened = SqliteAdapter::open(&path, &config).await.unwrap();
    let messages = Messages::new(Arc::new(reopened), config).unwrap();
    let again = messages.get_or_create_conversation("u").await.unwrap();
    assert_eq!(again.id, conv.id);
    let history = messages.get_chat_history(&conv.id, None).await.unwrap();
    assert_eq!(serde_json::to_value(&history).unwrap(), json!([{"user": "kept"}]));
}
