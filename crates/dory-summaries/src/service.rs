use std::sync::Arc;

use chrono::{SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use dory_core::{generate_prefixed_id, DoryError, DoryResult};
use dory_types::{UserAction, UserSummary, ACTION_ID_PREFIX};

use crate::adapter::SummaryAdapter;

pub const DEFAULT_ACTIONS_LIMIT: usize = 100;

/// Partial update applied by [`UserSummaries::update_summary`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SummaryUpdate {
    /// Replaces the summary text when set.
    #[serde(default)]
    pub content: Option<String>,
    /// Keys are written over the existing metadata; other keys are kept.
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
    /// Appended to `conversation_ids`, skipping ids already present.
    #[serde(default)]
    pub conversation_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAction {
    pub user_id: String,
    pub action_type: String,
    pub action_name: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

#[derive(Clone)]
pub struct UserSummaries {
    adapter: Arc<dyn SummaryAdapter>,
}

impl UserSummaries {
    pub fn new(adapter: Arc<dyn SummaryAdapter>) -> Self {
        Self { adapter }
    }

    pub async fn get_or_create_summary(&self, user_id: &str) -> DoryResult<UserSummary> {
        if let Some(summary) = self.adapter.get_summary(user_id).await? {
            return Ok(summary);
        }
        let summary = self.adapter.create_summary(user_id).await?;
        tracing::info!(
            target: "dory.summaries",
            user_id,
            summary_id = %summary.id,
            "created user summary"
        );
        Ok(summary)
    }

    pub async fn get_summary(&self, user_id: &str) -> DoryResult<UserSummary> {
        self.adapter
            .get_summary(user_id)
            .await?
            .ok_or_else(|| DoryError::NotFound(format!("summary for user {user_id}")))
    }

    /// Apply `update` to the user's summary, creating it first if needed.
    pub async fn update_summary(
        &self,
        user_id: &str,
        update: SummaryUpdate,
    ) -> DoryResult<UserSummary> {
        let mut summary = self.get_or_create_summary(user_id).await?;
        if let Some(content) = update.content {
            summary.content = content;
        }
        if let Some(metadata) = update.metadata {
            summary.metadata.extend(metadata);
        }
        for id in update.conversation_ids {
            if !summary.conversation_ids.contains(&id) {
                summary.conversation_ids.push(id);
            }
        }
        let summary = self.adapter.update_summary(&summary).await?;
        tracing::debug!(
            target: "dory.summaries",
            user_id,
            summary_id = %summary.id,
            content_len = summary.content.len(),
            conversations = summary.conversation_ids.len(),
            "updated user summary"
        );
        Ok(summary)
    }

    /// Store a new action and link it to the user's summary, if one exists.
    pub async fn record_action(&self, new: NewAction) -> DoryResult<UserAction> {
        if new.action_type.trim().is_empty() || new.action_name.trim().is_empty() {
            return Err(DoryError::InvalidData(
                "action_type and action_name must not be empty".to_string(),
            ));
        }
        let action = UserAction {
            id: generate_prefixed_id(ACTION_ID_PREFIX),
            user_id: new.user_id,
            action_type: new.action_type,
            action_name: new.action_name,
            metadata: new.metadata,
            conversation_id: new.conversation_id,
            created_at: Utc::now().trunc_subsecs(6),
        };
        let action = self.adapter.add_action(action).await?;

        if let Some(mut summary) = self.adapter.get_summary(&action.user_id).await? {
            summary.action_ids.push(action.id.clone());
            self.adapter.update_summary(&summary).await?;
        }

        tracing::debug!(
            target: "dory.summaries",
            user_id = %action.user_id,
            action_id = %action.id,
            action_type = %action.action_type,
            "recorded user action"
        );
        Ok(action)
    }

    /// Newest first. `None` means [`DEFAULT_ACTIONS_LIMIT`].
    pub async fn get_user_actions(
        &self,
        user_id: &str,
        action_type: Option<&str>,
        limit: Option<usize>,
    ) -> DoryResult<Vec<UserAction>> {
        self.adapter
            .get_user_actions(user_id, action_type, limit.unwrap_or(DEFAULT_ACTIONS_LIMIT))
            .await
    }
}
