/// Local embedding provider using fastembed
///
/// Provides offline embedding generation (default all-MiniLM-L6-v2, 384 dimensions).
/// No API key required — model weights are downloaded once into the model cache dir.
/// All CPU-bound fastembed calls are wrapped in spawn_blocking to avoid blocking async runtime.

use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::task;

use super::{EmbeddingError, EmbeddingProvider};

/// Local embedding provider backed by fastembed.
///
/// fastembed inference needs exclusive access to the ONNX session, so every
/// call goes through the mutex: concurrent queries are serialized here.
pub struct LocalEmbeddingProvider {
    model: Arc<Mutex<TextEmbedding>>,
    name: String,
    dim: usize,
}

/// Last path segment, lowercased, without the `-onnx` packaging suffix.
fn short_name(code: &str) -> String {
    let last = code.rsplit('/').next().unwrap_or(code).to_lowercase();
    last.strip_suffix("-onnx").map(str::to_string).unwrap_or(last)
}

/// Resolve a configured model name to a supported fastembed model and its dimension.
///
/// Accepts the exact fastembed model code ("Qdrant/all-MiniLM-L6-v2-onnx") or a
/// Hugging Face style name ("sentence-transformers/all-MiniLM-L6-v2", "all-MiniLM-L6-v2").
pub fn resolve_model(name: &str) -> Result<(EmbeddingModel, usize), EmbeddingError> {
    let supported = TextEmbedding::list_supported_models();

    if let Some(info) = supported.iter().find(|m| m.model_code.eq_ignore_ascii_case(name)) {
        return Ok((info.model.clone(), info.dim));
    }

    let wanted = short_name(name);
    supported
        .iter()
        .find(|m| short_name(&m.model_code) == wanted)
        .map(|info| (info.model.clone(), info.dim))
        .ok_or_else(|| EmbeddingError::ModelInit(format!("Unsupported embedding model: {}", name)))
}

impl LocalEmbeddingProvider {
    /// Create a new LocalEmbeddingProvider, downloading model weights if not cached.
    ///
    /// # Arguments
    /// * `model_name` - Model to load (see `resolve_model`)
    /// * `cache_dir` - Directory to cache model weights
    pub async fn new(model_name: &str, cache_dir: &str) -> Result<Self, EmbeddingError> {
        let (model, dim) = resolve_model(model_name)?;
        let cache_path = PathBuf::from(cache_dir);

        tracing::info!(model = %model_name, cache_dir = %cache_dir, "Loading embedding model");

        let embedding = task::spawn_blocking(move || {
            std::fs::create_dir_all(&cache_path)
                .map_err(|e| EmbeddingError::ModelInit(format!("Failed to create cache dir: {}", e)))?;
            let options = InitOptions::new(model)
                .with_cache_dir(cache_path)
                .with_show_download_progress(false);
            TextEmbedding::try_new(options)
                .map_err(|e| EmbeddingError::ModelInit(e.to_string()))
        })
        .await
        .map_err(|e| EmbeddingError::ModelInit(e.to_string()))??;

        tracing::info!(model = %model_name, dimension = dim, "Embedding model loaded");

        Ok(LocalEmbeddingProvider {
            model: Arc::new(Mutex::new(embedding)),
            name: model_name.to_string(),
            dim,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for LocalEmbeddingProvider {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let model = Arc::clone(&self.model);
        let texts = texts.to_vec();

        task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|_| EmbeddingError::Generation("embedding model lock poisoned".to_string()))?;
            let batch_size = texts.len();
            model
                .embed(texts, Some(batch_size))
                .map_err(|e| EmbeddingError::Generation(e.to_string()))
        })
        .await
        .map_err(|e| EmbeddingError::Generation(e.to_string()))?
    }

    fn model_name(&self) -> &str {
        &self.name
    }

    fn dimension(&self) -> usize {
        self.dim
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_name_strips_owner_and_suffix() {
        assert_eq!(short_name("Qdrant/all-MiniLM-L6-v2-onnx"), "all-minilm-l6-v2");
        assert_eq!(short_name("all-MiniLM-L6-v2"), "all-minilm-l6-v2");
    }

    #[test]
    fn test_resolve_default_model() {
        let (_, dim) = resolve_model("sentence-transformers/all-MiniLM-L6-v2").unwrap();
        assert_eq!(dim, 384);
    }

    #[test]
    fn test_resolve_unknown_model() {
        assert!(matches!(
            resolve_model("definitely-not-a-model"),
            Err(EmbeddingError::ModelInit(_))
        ));
    }
}
