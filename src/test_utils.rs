//! Deterministic embedding provider shared by unit and integration tests.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::embedding::{EmbeddingError, EmbeddingProvider};

/// Bag-of-words embedder: each lowercase word adds 1.0 to a hashed bucket.
///
/// Texts sharing words get positive cosine similarity; disjoint texts get
/// zero unless their words collide in a bucket.
pub struct HashEmbedder {
    dim: usize,
    calls: AtomicUsize,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        HashEmbedder { dim, calls: AtomicUsize::new(0) }
    }

    /// Number of `embed_batch` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn vector(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dim];
        for word in text.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
            // FNV-1a
            let mut h: u64 = 0xcbf29ce484222325;
            for b in word.to_lowercase().bytes() {
                h ^= b as u64;
                h = h.wrapping_mul(0x100000001b3);
            }
            v[(h % self.dim as u64) as usize] += 1.0;
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }

    fn model_name(&self) -> &str {
        "hash-test"
    }

    fn dimension(&self) -> usize {
        self.dim
    }
}
