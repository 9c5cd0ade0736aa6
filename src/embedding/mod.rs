/// Embedding provider trait and supporting types
///
/// Provides a pluggable interface for text embedding generation.
/// Supports local fastembed models (default, no API key) and the OpenAI API.

pub mod cache;
pub mod index;
pub mod local;
pub mod openai;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::config::EmbeddingConfig;

pub use index::{DenseIndexBuilder, EmbeddingMatrix};

/// Errors that can occur during embedding operations.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Model initialization failure (weights missing, unknown model name)
    #[error("Model initialization error: {0}")]
    ModelInit(String),

    /// Embedding generation failure (inference error)
    #[error("Embedding generation error: {0}")]
    Generation(String),

    /// API provider returned an HTTP error
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// Provider not configured (e.g., missing API key)
    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

/// Core trait for embedding text into fixed-dimension float vectors.
///
/// Implementations must be Send + Sync to support use in async contexts
/// and across thread boundaries (e.g., Arc<dyn EmbeddingProvider>).
/// Output must be a pure function of the input text: the same text always
/// produces the same vector regardless of which batch it arrives in.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate one embedding per input text, in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Generate an embedding vector for a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::Generation("provider returned no embedding".to_string()))
    }

    /// Return the model name identifier (e.g., "all-MiniLM-L6-v2").
    fn model_name(&self) -> &str;

    /// Return the dimension of the embedding vectors produced by this model.
    fn dimension(&self) -> usize;
}

/// Create the embedding provider selected by `embedding.provider`.
pub async fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>, EmbeddingError> {
    match config.provider.as_str() {
        "openai" => {
            let api_key = config.openai_api_key.clone().ok_or_else(|| {
                EmbeddingError::NotConfigured(
                    "OpenAI API key required when provider is 'openai'. \
                     Set QNASEARCH_EMBEDDING__OPENAI_API_KEY or embedding.openai_api_key in qnasearch.toml"
                        .to_string(),
                )
            })?;
            Ok(Arc::new(openai::OpenAIEmbeddingProvider::new(api_key, &config.model_name)?))
        }
        "local" => Ok(Arc::new(
            local::LocalEmbeddingProvider::new(&config.model_name, &config.model_cache_dir).await?,
        )),
        other => Err(EmbeddingError::NotConfigured(format!(
            "Unknown embedding provider '{}': expected 'local' or 'openai'",
            other
        ))),
    }
}

/// Cosine similarity; zero when either vector has zero length.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0)
}
