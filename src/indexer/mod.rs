//! Corpus indexing: a full workspace pass that leaves the Function
//! Registry consistent and persisted, plus the batch embedding pipeline.
pub mod core;
pub mod embedding;

pub use self::core::{IndexError, IndexReport, Indexer};
pub use self::embedding::{EMBED_BATCH_SIZE, EmbeddingError, embed_pending};
