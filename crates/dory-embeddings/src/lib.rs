//! Long-term memories and semantic search over a user's messages.
//!
//! [`Embeddings`] validates input and applies the recall threshold; a
//! [`MemoryAdapter`] stores vectors and ranks them. The bundled adapter keeps
//! everything in SQLite with sqlite-vec providing the distance functions.

pub mod adapter;
pub mod builders;
pub mod config;
pub mod embedder;
pub mod error;
pub mod service;
pub mod sqlite;

pub use adapter::{MemoryAdapter, MemoryRecord, RecordKind};
pub use builders::{
    build_embedder, build_in_memory_embeddings, build_local_embeddings, build_with_adapter,
};
pub use config::{EmbedderKind, EmbeddingsConfig};
#[cfg(feature = "local-embeddings")]
pub use embedder::FastEmbedder;
pub use embedder::{Embedder, HashEmbedder};
pub use error::{EmbeddingsError, EmbeddingsResult};
pub use service::Embeddings;
pub use sqlite::SqliteMemoryAdapter;
