use serde::{Deserialize, Serialize};

pub const DEFAULT_REUSE_WINDOW_DAYS: i64 = 14;
pub const DEFAULT_HISTORY_LIMIT: usize = 30;
pub const DEFAULT_CONVERSATION_ID_PREFIX: &str = "CONV_";
pub const DEFAULT_MESSAGE_ID_PREFIX: &str = "MSG_";
pub const DEFAULT_CONNECTION_TIMEOUT_SECONDS: u64 = 30;

/// Runtime configuration for conversation behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationConfig {
    /// Days of inactivity after which a user's latest conversation is no
    /// longer reused. The clock restarts whenever a message is appended.
    #[serde(default = "default_reuse_window_days")]
    pub reuse_window_days: i64,
    /// History page size used when the caller does not pass a limit.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    #[serde(default = "default_conversation_id_prefix")]
    pub conversation_id_prefix: String,
    #[serde(default = "default_message_id_prefix")]
    pub message_id_prefix: String,
    /// Busy timeout handed to persistent backends.
    #[serde(default = "default_connection_timeout_seconds")]
    pub connection_timeout_seconds: u64,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            reuse_window_days: DEFAULT_REUSE_WINDOW_DAYS,
            history_limit: DEFAULT_HISTORY_LIMIT,
            conversation_id_prefix: DEFAULT_CONVERSATION_ID_PREFIX.to_string(),
            message_id_prefix: DEFAULT_MESSAGE_ID_PREFIX.to_string(),
            connection_timeout_seconds: DEFAULT_CONNECTION_TIMEOUT_SECONDS,
        }
    }
}

impl ConversationConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.reuse_window_days < 0 {
            return Err(format!(
                "reuse_window_days must be >= 0, got {}",
                self.reuse_window_days
            ));
        }
        if self.history_limit == 0 {
            return Err("history_limit must be >= 1".to_string());
        }
        if self.conversation_id_prefix.trim().is_empty() {
            return Err("conversation_id_prefix must not be empty".to_string());
        }
        if self.message_id_prefix.trim().is_empty() {
            return Err("message_id_prefix must not be empty".to_string());
        }
        Ok(())
    }
}

fn default_reuse_window_days() -> i64 {
    DEFAULT_REUSE_WINDOW_DAYS
}

fn default_history_limit() -> usize {
    DEFAULT_HISTORY_LIMIT
}

fn default_conversation_id_prefix() -> String {
    DEFAULT_CONVERSATION_ID_PREFIX.to_string()
}

fn default_message_id_prefix() -> String {
    DEFAULT_MESSAGE_ID_PREFIX.to_string()
}

fn default_connection_timeout_seconds() -> u64 {
    DEFAULT_CONNECTION_TIMEOUT_SECONDS
}
