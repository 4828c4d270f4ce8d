use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const SUMMARY_ID_PREFIX: &str = "SUMM_";
pub const ACTION_ID_PREFIX: &str = "ACT_";

/// Rolling per-user summary built from conversations and actions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserSummary {
    pub id: String,
    pub user_id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Conversations that contributed to this summary.
    #[serde(default)]
    pub conversation_ids: Vec<String>,
    #[serde(default)]
    pub action_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserSummary {
    pub fn empty(id: String, user_id: String, now: DateTime<Utc>) -> Self {
        Self {
            id,
            user_id,
            content: String::new(),
            metadata: Map::new(),
            conversation_ids: Vec::new(),
            action_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Something a user did outside of a chat, as reported by the host application.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserAction {
    pub id: String,
    pub user_id: String,
    /// Free-form category defined by the client application.
    pub action_type: String,
    pub action_name: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub conversation_id: Option<String>,
    pub created_at: DateTime<Utc>,
}
