use std::sync::Arc;

use dory_core::{
    ChatRole, ConversationConfig, Messages, MessageType, SqliteAdapter, SqliteStore,
};
use dory_summaries::{NewAction, SqliteSummaryAdapter, SummaryUpdate, UserSummaries};
use serde_json::{json, Map};
use tempfile::TempDir;

#[tokio::test]
async fn summaries_share_the_conversation_database() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("dory.db");
    let store = SqliteStore::open(&path, std::time::Duration::from_secs(5))
        .await
        .unwrap();

    let config = ConversationConfig::default();
    let messages = Messages::new(
        Arc::new(SqliteAdapter::new(store.clone(), &config).await.unwrap()),
        config,
    )
    .unwrap();
    let summaries = UserSummaries::new(Arc::new(
        SqliteSummaryAdapter::new(store.clone()).await.unwrap(),
    ));

    let conv = messages.get_or_create_conversation("u").await.unwrap();
    messages
        .add_message(&conv.id, "u", ChatRole::User, "I moved to Lisbon", MessageType::UserMessage)
        .await
        .unwrap();

    summaries
        .update_summary(
            "u",
            SummaryUpdate {
                content: Some("Lives in Lisbon".to_string()),
                metadata: json!({"city": "Lisbon"}).as_object().cloned(),
                conversation_ids: vec![conv.id.clone()],
            },
        )
        .await
        .unwrap();

    let mut metadata = Map::new();
    metadata.insert("sku".to_string(), json!("A-1"));
    let action = summaries
        .record_action(NewAction {
            user_id: "u".to_string(),
            action_type: "purchase".to_string(),
            action_name: "Bought a map".to_string(),
            metadata,
            conversation_id: Some(conv.id.clone()),
        })
        .await
        .unwrap();

    store.close().await.unwrap();

    let store = SqliteStore::open(&path, std::time::Duration::from_secs(5))
        .await
        .unwrap();
    let summaries = UserSummaries::new(Arc::new(SqliteSummaryAdapter::new(store).await.unwrap()));
    let summary = summaries.get_summary("u").await.unwrap();
    assert_eq!(summary.content, "Lives in Lisbon");
    assert_eq!(summary.conversation_ids, vec![conv.id.clone()]);
    assert_eq!(summary.action_ids, vec![action.id.clone()]);

    let actions = summaries
        .get_user_actions("u", Some("purchase"), Some(10))
        .await
        .unwrap();
    assert_eq!(actions, vec![action]);
}
