//! Batch embedding pipeline.
//!
//! Every function record without a vector eventually gets one, without
//! re-embedding already-processed functions and without one giant request:
//! fixed-size batches, one provider call each, snapshot persisted after
//! every batch so an interrupted run resumes where it stopped.
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::db::{Registry, RegistryError, VectorRecord};
use crate::embedder::{Embedder, EmbedderError};

/// Functions submitted per provider call. Bounds the worst-case request
/// payload and the blast radius of a single failed call.
pub const EMBED_BATCH_SIZE: usize = 25;

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("embedding batch {batch}/{total} failed: {source}")]
    Batch {
        batch: usize,
        total: usize,
        #[source]
        source: EmbedderError,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("embedding task aborted: {0}")]
    TaskAborted(String),
}

/// Embed every pending function. Returns the number of batches processed.
///
/// A provider failure aborts the remaining batches; vectors persisted for
/// earlier batches are retained. Progress is reported through `progress`
/// as `(completed_batch, total_batches)`.
pub async fn embed_pending(
    registry: &mut Registry,
    embedder: Arc<dyn Embedder>,
    progress: &(dyn Fn(usize, usize) + Send + Sync),
) -> Result<usize, EmbeddingError> {
    let pending = registry.unembedded_function_ids();
    if pending.is_empty() {
        info!("All registered functions already have embeddings");
        return Ok(0);
    }

    let total = pending.len().div_ceil(EMBED_BATCH_SIZE);
    info!(
        "Embedding {} functions in {} batches of up to {}",
        pending.len(),
        total,
        EMBED_BATCH_SIZE
    );

    for (index, batch) in pending.chunks(EMBED_BATCH_SIZE).enumerate() {
        // Pair ids with bodies up front so response vectors stay aligned.
        let pairs: Vec<(String, String)> = batch
            .iter()
            .filter_map(|id| {
                registry
                    .function_by_id(id)
                    .map(|f| (id.clone(), f.assembly_code.clone()))
            })
            .collect();

        let texts: Vec<String> = pairs.iter().map(|(_, body)| body.clone()).collect();
        let worker = Arc::clone(&embedder);
        let vectors = tokio::task::spawn_blocking(move || {
            let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
            worker.embed_batch(&refs)
        })
        .await
        .map_err(|e| EmbeddingError::TaskAborted(e.to_string()))?
        .map_err(|source| {
            warn!("Aborting embedding run at batch {}/{total}", index + 1);
            EmbeddingError::Batch {
                batch: index + 1,
                total,
                source,
            }
        })?;

        let records = pairs
            .into_iter()
            .zip(vectors)
            .map(|((id, _), embedding)| VectorRecord { id, embedding })
            .collect();
        registry.upsert_vectors(records);

        // Persist before starting the next batch: the crash-recovery point.
        registry.save()?;
        progress(index + 1, total);
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::db::{FunctionRecord, function_id};
    use crate::embedder::mock::MockEmbedder;

    fn seed_registry(count: usize) -> Registry {
        let mut registry = Registry::in_memory();
        for i in 0..count {
            let name = format!("func_{i:03}");
            registry
                .upsert_function(FunctionRecord {
                    id: function_id(&name),
                    name: name.clone(),
                    source_code: None,
                    source_module_path: None,
                    assembly_module_path: format!("asm/{name}.s"),
                    assembly_code: format!("\tbl helper_{i}\n\tbx lr"),
                    calls_function_ids: Vec::new(),
                })
                .unwrap();
        }
        registry
    }

    /// Fails every call after the first `succeed` batches.
    struct FlakyEmbedder {
        inner: MockEmbedder,
        calls: AtomicUsize,
        succeed: usize,
    }

    impl Embedder for FlakyEmbedder {
        fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
            self.inner.embed(text)
        }

        fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call >= self.succeed {
                return Err(EmbedderError::RequestFailed("provider down".to_string()));
            }
            self.inner.embed_batch(texts)
        }

        fn dimensions(&self) -> usize {
            self.inner.dimensions()
        }
    }

    #[tokio::test]
    async fn test_batches_of_25_with_progress() {
        let mut registry = seed_registry(30);
        let embedder: Arc<dyn Embedder> = Arc::new(MockEmbedder::new(16));
        let seen = Mutex::new(Vec::new());

        let batches = embed_pending(&mut registry, embedder, &|done, total| {
            seen.lock().unwrap().push((done, total));
        })
        .await
        .unwrap();

        assert_eq!(batches, 2);
        assert_eq!(*seen.lock().unwrap(), vec![(1, 2), (2, 2)]);
        assert!(registry.unembedded_function_ids().is_empty());
        assert_eq!(registry.stats().total_vectors, 30);
    }

    #[tokio::test]
    async fn test_noop_when_nothing_pending() {
        let mut registry = seed_registry(5);
        let embedder: Arc<dyn Embedder> = Arc::new(MockEmbedder::new(16));

        embed_pending(&mut registry, Arc::clone(&embedder), &|_, _| {})
            .await
            .unwrap();
        let again = embed_pending(&mut registry, embedder, &|_, _| {})
            .await
            .unwrap();
        assert_eq!(again, 0, "second run has nothing to embed");
    }

    #[tokio::test]
    async fn test_failed_batch_keeps_prior_progress() {
        let mut registry = seed_registry(30);
        let embedder: Arc<dyn Embedder> = Arc::new(FlakyEmbedder {
            inner: MockEmbedder::new(16),
            calls: AtomicUsize::new(0),
            succeed: 1,
        });

        let err = embed_pending(&mut registry, embedder, &|_, _| {})
            .await
            .unwrap_err();
        assert!(matches!(err, EmbeddingError::Batch { batch: 2, total: 2, .. }));

        // First batch of 25 survived; the failed batch left no vectors.
        assert_eq!(registry.stats().total_vectors, 25);
        assert_eq!(registry.unembedded_function_ids().len(), 5);
    }
}
