//! Similarity search over stored embedding vectors: a linear cosine scan,
//! sized for a single game's function count, not a web-scale corpus.
use std::cmp::Ordering;

use super::Registry;
use super::models::FunctionRecord;

pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.5;
pub const DEFAULT_SEARCH_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct SimilarMatch {
    pub record: FunctionRecord,
    pub similarity: f32,
}

/// Dot product over the product of L2 norms; -1..1. Mismatched lengths and
/// zero-norm inputs score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

impl Registry {
    /// Rank all stored vectors against `query`, keeping translated
    /// functions at or above `threshold`, best first. Equal similarities
    /// order by ascending id so results are deterministic across runs.
    pub fn search_similar(
        &self,
        query: &[f32],
        threshold: f32,
        limit: usize,
    ) -> Vec<SimilarMatch> {
        let mut matches = Vec::new();
        for (id, embedding) in &self.vectors {
            let Some(record) = self.functions.get(id) else {
                continue;
            };
            // Untranslated functions cannot serve as translation examples.
            if record.source_code.is_none() {
                continue;
            }
            let similarity = cosine_similarity(query, embedding);
            if similarity < threshold {
                continue;
            }
            matches.push(SimilarMatch {
                record: record.clone(),
                similarity,
            });
        }

        matches.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.record.id.cmp(&b.record.id))
        });
        matches.truncate(limit);
        matches
    }
}
