//! User summaries and the user action log.
//!
//! A summary is a single rolling document per user; actions are append-only
//! events reported by the host application and linked back to the summary.

pub mod adapter;
pub mod in_memory;
pub mod service;
pub mod sqlite;

pub use adapter::SummaryAdapter;
pub use in_memory::InMemorySummaryAdapter;
pub use service::{NewAction, SummaryUpdate, UserSummaries, DEFAULT_ACTIONS_LIMIT};
pub use sqlite::SqliteSummaryAdapter;

pub use dory_types::{UserAction, UserSummary};
