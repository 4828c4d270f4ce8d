//! Conversation persistence for Dory.
//!
//! [`Messages`] owns the conversation reuse policy and history windowing; the
//! [`StorageAdapter`] implementations only move records in and out of a
//! backend. [`Memory`] re-exposes the same operations for callers that want a
//! single entry point.

pub mod adapter;
pub mod config;
pub mod error;
pub mod ids;
pub mod in_memory;
pub mod memory;
pub mod messages;
pub mod sqlite;
pub mod store;

pub use adapter::StorageAdapter;
pub use config::{AppConfig, ConfigStore};
pub use error::{DoryError, DoryResult};
pub use ids::generate_prefixed_id;
pub use in_memory::InMemoryAdapter;
pub use memory::Memory;
pub use messages::Messages;
pub use sqlite::SqliteAdapter;
pub use store::SqliteStore;

pub use dory_types::{
    ChatRole, Conversation, ConversationConfig, HistoryEntry, Message, MessageType,
};
