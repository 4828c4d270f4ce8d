use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use dory_core::{generate_prefixed_id, DoryError, DoryResult};
use dory_types::{UserAction, UserSummary, SUMMARY_ID_PREFIX};

use crate::adapter::SummaryAdapter;

/// Process-local summaries keyed by user id.
#[derive(Default)]
pub struct InMemorySummaryAdapter {
    summaries: RwLock<HashMap<String, UserSummary>>,
    actions: RwLock<Vec<UserAction>>,
}

impl InMemorySummaryAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SummaryAdapter for InMemorySummaryAdapter {
    async fn get_summary(&self, user_id: &str) -> DoryResult<Option<UserSummary>> {
        Ok(self.summaries.read().await.get(user_id).cloned())
    }

    async fn create_summary(&self, user_id: &str) -> DoryResult<UserSummary> {
        let mut summaries = self.summaries.write().await;
        if summaries.contains_key(user_id) {
            return Err(DoryError::InvalidData(format!(
                "summary already exists for user {user_id}"
            )));
        }
        let summary = UserSummary::empty(
            generate_prefixed_id(SUMMARY_ID_PREFIX),
            user_id.to_string(),
            Utc::now(),
        );
        summaries.insert(user_id.to_string(), summary.clone());
        Ok(summary)
    }

    async fn update_summary(&self, summary: &UserSummary) -> DoryResult<UserSummary> {
        let mut summaries = self.summaries.write().await;
        let stored = summaries
            .values_mut()
            .find(|s| s.id == summary.id)
            .ok_or_else(|| DoryError::NotFound(format!("summary {}", summary.id)))?;
        stored.content = summary.content.clone();
        stored.metadata = summary.metadata.clone();
        stored.conversation_ids = summary.conversation_ids.clone();
        stored.action_ids = summary.action_ids.clone();
        stored.updated_at = Utc::now().max(stored.created_at);
        Ok(stored.clone())
    }

    async fn add_action(&self, action: UserAction) -> DoryResult<UserAction> {
        self.actions.write().await.push(action.clone());
        Ok(action)
    }

    async fn get_user_actions(
        &self,
        user_id: &str,
        action_type: Option<&str>,
        limit: usize,
    ) -> DoryResult<Vec<UserAction>> {
        let actions = self.actions.read().await;
        let mut selected = actions
            .iter()
            .enumerate()
            .filter(|(_, a)| a.user_id == user_id)
            .filter(|(_, a)| action_type.map_or(true, |t| a.action_type == t))
            .collect::<Vec<_>>();
        // Newest first; later insertions win ties.
        selected.sort_by(|(ia, a), (ib, b)| b.created_at.cmp(&a.created_at).then(ib.cmp(ia)));
        Ok(selected
            .into_iter()
            .take(limit)
            .map(|(_, a)| a.clone())
            .collect())
    }
}
