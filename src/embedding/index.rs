/// Dense embedding index
///
/// Embeds each corpus partition in fixed-size batches, caching every
/// partition's matrix in its own file so that updating one sub-corpus never
/// invalidates the other's embeddings.

use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::task;

use super::cache::{self, CacheLoad};
use super::{cosine_similarity, EmbeddingProvider};
use crate::corpus::Document;
use crate::errors::QnaError;

/// Row-major N×D matrix; row `i` belongs to corpus position `i`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingMatrix {
    dim: usize,
    rows: usize,
    data: Vec<f32>,
}

impl EmbeddingMatrix {
    pub fn empty(dim: usize) -> Self {
        EmbeddingMatrix { dim, rows: 0, data: Vec::new() }
    }

    /// Build from per-row vectors, rejecting rows of the wrong width.
    pub fn from_rows(dim: usize, rows: Vec<Vec<f32>>) -> Result<Self, QnaError> {
        let mut matrix = EmbeddingMatrix::empty(dim);
        matrix.data.reserve(dim * rows.len());
        for row in rows {
            matrix.push_row(&row)?;
        }
        Ok(matrix)
    }

    fn push_row(&mut self, row: &[f32]) -> Result<(), QnaError> {
        if row.len() != self.dim {
            return Err(QnaError::ModelLoad(format!(
                "embedding has {} dimensions, expected {}",
                row.len(),
                self.dim
            )));
        }
        self.data.extend_from_slice(row);
        self.rows += 1;
        Ok(())
    }

    /// Stack partitions vertically, in the given order.
    pub fn concat(dim: usize, parts: &[EmbeddingMatrix]) -> Result<Self, QnaError> {
        let mut out = EmbeddingMatrix::empty(dim);
        for part in parts {
            for i in 0..part.len() {
                out.push_row(part.row(i))?;
            }
        }
        Ok(out)
    }

    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// True when the flat buffer holds exactly `rows * dim` values.
    pub fn is_well_formed(&self) -> bool {
        self.rows.checked_mul(self.dim) == Some(self.data.len())
    }

    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.dim..(i + 1) * self.dim]
    }

    /// Cosine similarity of `query` against every row, in row order.
    pub fn cosine_all(&self, query: &[f32]) -> Vec<f64> {
        (0..self.rows).map(|i| cosine_similarity(query, self.row(i))).collect()
    }
}

/// Computes, caches and reloads partition embedding matrices.
pub struct DenseIndexBuilder {
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
    show_progress: bool,
}

impl DenseIndexBuilder {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, batch_size: usize) -> Self {
        DenseIndexBuilder {
            provider,
            batch_size: batch_size.max(1),
            show_progress: false,
        }
    }

    /// Draw a progress bar on stderr while embedding.
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    /// Embed texts batch by batch.
    pub async fn compute(&self, texts: &[String], label: &str) -> Result<EmbeddingMatrix, QnaError> {
        let dim = self.provider.dimension();
        let mut matrix = EmbeddingMatrix::empty(dim);
        matrix.data.reserve(dim * texts.len());

        let progress = if self.show_progress {
            ProgressBar::new(texts.len() as u64)
        } else {
            ProgressBar::hidden()
        };
        progress.set_style(
            ProgressStyle::with_template("{msg} [{bar:40}] {pos}/{len}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        progress.set_message(format!("Embedding {label}"));

        for (n, batch) in texts.chunks(self.batch_size).enumerate() {
            let vectors = self.provider.embed_batch(batch).await.map_err(|e| {
                QnaError::ModelLoad(format!("embedding {} batch {} failed: {}", label, n, e))
            })?;
            if vectors.len() != batch.len() {
                return Err(QnaError::ModelLoad(format!(
                    "provider returned {} embeddings for a batch of {}",
                    vectors.len(),
                    batch.len()
                )));
            }
            for v in &vectors {
                matrix.push_row(v)?;
            }
            progress.inc(batch.len() as u64);
            tracing::info!(
                partition = %label,
                processed = matrix.len(),
                total = texts.len(),
                "Embedding progress"
            );
        }
        progress.finish_and_clear();
        Ok(matrix)
    }

    /// Embeddings for one partition, served from `cache_path` when it is current.
    ///
    /// Cache read and write failures are logged and never returned.
    pub async fn build(
        &self,
        documents: &[Document],
        cache_path: &Path,
        label: &str,
        force_recompute: bool,
    ) -> Result<EmbeddingMatrix, QnaError> {
        if documents.is_empty() {
            tracing::info!(partition = %label, "No documents, skipping embeddings");
            return Ok(EmbeddingMatrix::empty(self.dimension()));
        }

        let model = self.provider.model_name().to_string();
        let fingerprint = cache::fingerprint(documents.iter().map(|d| d.dense_text.as_str()));

        if !force_recompute {
            let (path, model_name, fp) = (cache_path.to_path_buf(), model.clone(), fingerprint.clone());
            let loaded = task::spawn_blocking(move || cache::load(&path, &model_name, &fp))
                .await
                .unwrap_or_else(|e| CacheLoad::Corrupt(QnaError::Cache(format!("cache read task failed: {}", e))));
            match loaded {
                CacheLoad::Hit(matrix)
                    if matrix.len() == documents.len() && matrix.dim() == self.dimension() =>
                {
                    tracing::info!(
                        partition = %label,
                        path = %cache_path.display(),
                        rows = matrix.len(),
                        "Loaded cached embeddings"
                    );
                    return Ok(matrix);
                }
                CacheLoad::Hit(matrix) => {
                    tracing::warn!(
                        partition = %label,
                        rows = matrix.len(),
                        dim = matrix.dim(),
                        "Cached embeddings have the wrong shape, recomputing"
                    );
                }
                CacheLoad::Stale(reason) => {
                    tracing::warn!(partition = %label, reason = %reason, "Cached embeddings are stale, recomputing");
                }
                CacheLoad::Corrupt(e) => {
                    tracing::warn!(partition = %label, error = %e, "Failed to read cached embeddings, recomputing");
                }
                CacheLoad::Missing => {}
            }
        }

        tracing::info!(partition = %label, count = documents.len(), "Computing embeddings");
        let texts: Vec<String> = documents.iter().map(|d| d.dense_text.clone()).collect();
        let matrix = self.compute(&texts, label).await?;

        let path = cache_path.to_path_buf();
        let (matrix, saved) = match task::spawn_blocking(move || {
            let saved = cache::save(&path, &model, &fingerprint, &matrix);
            (matrix, saved)
        })
        .await
        {
            Ok(pair) => pair,
            Err(e) => return Err(QnaError::Cache(format!("cache write task failed: {}", e))),
        };
        match saved {
            Ok(()) => tracing::info!(partition = %label, path = %cache_path.display(), "Saved embedding cache"),
            Err(e) => tracing::warn!(partition = %label, error = %e, "Failed to save embedding cache"),
        }
        Ok(matrix)
    }

    /// Embed a query: a batch of one.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, QnaError> {
        let vector = self
            .provider
            .embed(text)
            .await
            .map_err(|e| QnaError::Query(format!("query embedding failed: {}", e)))?;
        if vector.len() != self.dimension() {
            return Err(QnaError::Query(format!(
                "query embedding has {} dimensions, expected {}",
                vector.len(),
                self.dimension()
            )));
        }
        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::test_document;
    use crate::test_utils::HashEmbedder;

    fn docs() -> Vec<Document> {
        ["login error", "crash on startup", "password reset", "install guide", "license key"]
            .iter()
            .enumerate()
            .map(|(i, t)| test_document(&i.to_string(), t, "", "DBS", "https://cafe.naver.com"))
            .collect()
    }

    #[test]
    fn test_concat_preserves_row_order() {
        let a = EmbeddingMatrix::from_rows(2, vec![vec![1.0, 0.0]]).unwrap();
        let b = EmbeddingMatrix::from_rows(2, vec![vec![0.0, 1.0], vec![1.0, 1.0]]).unwrap();
        let m = EmbeddingMatrix::concat(2, &[a, EmbeddingMatrix::empty(2), b]).unwrap();
        assert_eq!(m.len(), 3);
        assert_eq!(m.row(0), &[1.0, 0.0]);
        assert_eq!(m.row(2), &[1.0, 1.0]);
    }

    #[test]
    fn test_wrong_width_rejected() {
        assert!(EmbeddingMatrix::from_rows(3, vec![vec![1.0, 2.0]]).is_err());
    }

    #[tokio::test]
    async fn test_batch_size_does_not_change_result() {
        let texts: Vec<String> = docs().into_iter().map(|d| d.dense_text).collect();
        let one = DenseIndexBuilder::new(Arc::new(HashEmbedder::new(16)), 1)
            .compute(&texts, "articles")
            .await
            .unwrap();
        let three = DenseIndexBuilder::new(Arc::new(HashEmbedder::new(16)), 3)
            .compute(&texts, "articles")
            .await
            .unwrap();
        assert_eq!(one, three);
        assert_eq!(one.len(), 5);
    }

    #[tokio::test]
    async fn test_second_build_reuses_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("article_embeddings.bin");
        let embedder = Arc::new(HashEmbedder::new(16));
        let builder = DenseIndexBuilder::new(embedder.clone(), 2);

        let first = builder.build(&docs(), &path, "articles", false).await.unwrap();
        let calls_after_first = embedder.calls();
        let second = builder.build(&docs(), &path, "articles", false).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(embedder.calls(), calls_after_first, "cache hit must not call the model");
    }

    #[tokio::test]
    async fn test_force_recompute_bypasses_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("article_embeddings.bin");
        let embedder = Arc::new(HashEmbedder::new(16));
        let builder = DenseIndexBuilder::new(embedder.clone(), 5);

        builder.build(&docs(), &path, "articles", false).await.unwrap();
        let before = embedder.calls();
        builder.build(&docs(), &path, "articles", true).await.unwrap();
        assert_eq!(embedder.calls(), before + 1);
    }

    #[tokio::test]
    async fn test_corrupt_cache_falls_through() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("article_embeddings.bin");
        std::fs::write(&path, b"garbage").unwrap();

        let builder = DenseIndexBuilder::new(Arc::new(HashEmbedder::new(16)), 4);
        let matrix = builder.build(&docs(), &path, "articles", false).await.unwrap();
        assert_eq!(matrix.len(), 5);
    }

    #[tokio::test]
    async fn test_short_cached_matrix_is_recomputed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("article_embeddings.bin");
        let fp = cache::fingerprint(docs().iter().map(|d| d.dense_text.as_str()));
        cache::write_raw(&path, "hash-test", &fp, 16, 5, vec![1.0, 2.0, 3.0]);

        let embedder = Arc::new(HashEmbedder::new(16));
        let builder = DenseIndexBuilder::new(embedder.clone(), 5);
        let matrix = builder.build(&docs(), &path, "articles", false).await.unwrap();

        assert_eq!(embedder.calls(), 1);
        assert!(matrix.is_well_formed());
        assert_eq!(matrix.cosine_all(&embedder.vector("login error")).len(), 5);
    }

    #[tokio::test]
    async fn test_unwritable_cache_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the cache directory should be
        let blocker = dir.path().join("blocked");
        std::fs::write(&blocker, b"").unwrap();
        let path = blocker.join("article_embeddings.bin");

        let builder = DenseIndexBuilder::new(Arc::new(HashEmbedder::new(16)), 4);
        let matrix = builder.build(&docs(), &path, "articles", false).await.unwrap();
        assert_eq!(matrix.len(), 5);
    }

    #[tokio::test]
    async fn test_empty_partition_skips_model() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = Arc::new(HashEmbedder::new(16));
        let builder = DenseIndexBuilder::new(embedder.clone(), 4);
        let matrix = builder.build(&[], &dir.path().join("b.bin"), "bugs", false).await.unwrap();
        assert!(matrix.is_empty());
        assert_eq!(embedder.calls(), 0);
    }
}
