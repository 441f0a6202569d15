/// Embedder trait and shared types for assembly-body embedding.
///
/// The production implementation talks to an external embedding service;
/// the mock produces deterministic vectors for tests. Both are `Send +
/// Sync` so they can sit behind `Arc` while indexing fans out.
pub mod mock;
pub mod remote;

use thiserror::Error;

/// Errors that can occur during embedding operations.
#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("provider request failed: {0}")]
    RequestFailed(String),

    #[error("provider response was not parseable: {0}")]
    InvalidResponse(String),

    /// The provider must answer a batch atomically: one vector per input,
    /// same order. Anything else fails the whole batch.
    #[error("provider returned {got} vectors for {expected} inputs")]
    CountMismatch { expected: usize, got: usize },
}

/// Trait for embedding implementations.
pub trait Embedder: Send + Sync {
    /// Embed a single assembly body into a vector.
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError>;

    /// Embed a batch of assembly bodies, one vector per input in input
    /// order. Fails atomically: no partial-batch success.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError>;

    /// Dimensionality of the vectors this embedder produces.
    fn dimensions(&self) -> usize;
}
