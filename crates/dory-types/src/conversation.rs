use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Who authored a message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    User,
    Ai,
    Human,
}

impl ChatRole {
    pub fn as_str(self) -> &'static str {
        match self {
            ChatRole::User => "user",
            ChatRole::Ai => "ai",
            ChatRole::Human => "human",
        }
    }
}

impl fmt::Display for ChatRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChatRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(ChatRole::User),
            "ai" => Ok(ChatRole::Ai),
            "human" => Ok(ChatRole::Human),
            other => Err(format!("unknown chat role '{other}'")),
        }
    }
}

/// Classification of a stored message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    UserMessage,
    RequestResponse,
}

impl MessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::UserMessage => "user_message",
            MessageType::RequestResponse => "request_response",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user_message" => Ok(MessageType::UserMessage),
            "request_response" => Ok(MessageType::RequestResponse),
            other => Err(format!("unknown message type '{other}'")),
        }
    }
}

/// A thread of messages owned by a single user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Conversation {
    pub id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(id: String, user_id: String, now: DateTime<Utc>) -> Self {
        Self {
            id,
            user_id,
            created_at: now,
            updated_at: now,
        }
    }
}

/// An immutable message inside a conversation.
///
/// `content` is opaque: plain text is stored as a JSON string, structured
/// payloads are stored as-is.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub user_id: String,
    pub chat_role: ChatRole,
    pub content: Value,
    pub message_type: MessageType,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn history_entry(&self) -> HistoryEntry {
        HistoryEntry {
            role: self.chat_role,
            content: self.content.clone(),
        }
    }
}

/// One line of chat history, serialised as `{ "<role>": <content> }`.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub role: ChatRole,
    pub content: Value,
}

impl HistoryEntry {
    pub fn new(role: ChatRole, content: impl Into<Value>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

impl Serialize for HistoryEntry {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(self.role.as_str(), &self.content)?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for HistoryEntry {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let map = BTreeMap::<String, Value>::deserialize(deserializer)?;
        if map.len() != 1 {
            return Err(D::Error::custom(format!(
                "history entry must have exactly one key, got {}",
                map.len()
            )));
        }
        let Some((role, content)) = map.into_iter().next() else {
            return Err(D::Error::custom("empty history entry"));
        };
        let role = role.parse::<ChatRole>().map_err(D::Error::custom)?;
        Ok(Self { role, content })
    }
}
