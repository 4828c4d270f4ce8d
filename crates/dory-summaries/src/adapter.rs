use async_trait::async_trait;

use dory_core::DoryResult;
use dory_types::{UserAction, UserSummary};

/// Storage backend for summaries and actions.
#[async_trait]
pub trait SummaryAdapter: Send + Sync {
    async fn get_summary(&self, user_id: &str) -> DoryResult<Option<UserSummary>>;

    /// Create the user's empty summary. Each user has at most one; a second
    /// create fails with `InvalidData`.
    async fn create_summary(&self, user_id: &str) -> DoryResult<UserSummary>;

    /// Persist content, metadata and id lists and refresh `updated_at`.
    /// Fails with `NotFound` when no summary has `summary.id`.
    async fn update_summary(&self, summary: &UserSummary) -> DoryResult<UserSummary>;

    async fn add_action(&self, action: UserAction) -> DoryResult<UserAction>;

    /// Newest first, optionally restricted to one `action_type`.
    async fn get_user_actions(
        &self,
        user_id: &str,
        action_type: Option<&str>,
        limit: usize,
    ) -> DoryResult<Vec<UserAction>>;
}
