/// Hybrid search engine
///
/// Owns the immutable index snapshot (corpus, dense embeddings, keyword index)
/// and answers queries against it. `initialize` builds the first snapshot;
/// `rebuild` builds a new one off to the side and swaps it in only when every
/// step succeeded. Queries clone the current `Arc` and never hold a lock while
/// scoring.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::task;

use crate::config::Config;
use crate::corpus::{self, Corpus, Partition};
use crate::embedding::{create_provider, DenseIndexBuilder, EmbeddingMatrix, EmbeddingProvider};
use crate::errors::QnaError;
use crate::search::fusion::{self, CATEGORY_CANDIDATES, SEARCH_CANDIDATES};
use crate::search::{
    CategoryLimits, CategoryResults, CategoryRouter, KeywordIndex, KeywordParams, ScoredResult,
};

/// Everything a query reads, built together and replaced together.
pub struct IndexState {
    pub corpus: Corpus,
    pub embeddings: EmbeddingMatrix,
    pub keywords: KeywordIndex,
    pub built_at: DateTime<Utc>,
}

/// Summary of the live index, for health checks and the CLI.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub documents: usize,
    pub articles: usize,
    pub bugs: usize,
    pub vocabulary: usize,
    pub dimension: usize,
    pub model: String,
    pub built_at: DateTime<Utc>,
}

pub struct SearchEngine {
    config: Config,
    provider: Arc<dyn EmbeddingProvider>,
    dense: DenseIndexBuilder,
    router: CategoryRouter,
    state: RwLock<Arc<IndexState>>,
    rebuilding: AtomicBool,
}

/// Clears the rebuild flag when a rebuild ends, successfully or not.
struct RebuildGuard<'a>(&'a AtomicBool);

impl Drop for RebuildGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl SearchEngine {
    /// Load the configured embedding model, the corpus and both indices.
    ///
    /// Fails if the model cannot be loaded or the primary corpus is missing;
    /// a missing issue-tracker corpus only shrinks the index.
    pub async fn initialize(config: Config) -> Result<SearchEngine, QnaError> {
        config.validate()?;
        tracing::info!(
            provider = %config.embedding.provider,
            model = %config.embedding.model_name,
            "Loading embedding model"
        );
        let provider = create_provider(&config.embedding)
            .await
            .map_err(|e| QnaError::ModelLoad(e.to_string()))?;
        Self::open(config, provider, false).await
    }

    /// Same as `initialize` with an already constructed embedding provider.
    pub async fn initialize_with_provider(
        config: Config,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> Result<SearchEngine, QnaError> {
        config.validate()?;
        Self::open(config, provider, false).await
    }

    /// Initialize with every partition re-embedded and its cache rewritten.
    pub async fn initialize_recomputed(
        config: Config,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> Result<SearchEngine, QnaError> {
        config.validate()?;
        Self::open(config, provider, true).await
    }

    async fn open(
        config: Config,
        provider: Arc<dyn EmbeddingProvider>,
        force_recompute: bool,
    ) -> Result<SearchEngine, QnaError> {
        let dense = DenseIndexBuilder::new(provider.clone(), config.embedding.batch_size)
            .with_progress(std::io::stderr().is_terminal());
        let router = CategoryRouter::new(config.search.routes.clone());

        let state = build_state(&config, &dense, force_recompute).await?;
        tracing::info!(
            documents = state.corpus.len(),
            vocabulary = state.keywords.vectorizer().vocabulary_len(),
            dimension = state.embeddings.dim(),
            "Search engine initialized"
        );

        Ok(SearchEngine {
            config,
            provider,
            dense,
            router,
            state: RwLock::new(Arc::new(state)),
            rebuilding: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The live index snapshot.
    pub fn snapshot(&self) -> Arc<IndexState> {
        match self.state.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Reload the corpus and rebuild both indices, then swap them in together.
    ///
    /// With `force_recompute` every partition is re-embedded and its cache
    /// rewritten. Overlapping rebuilds are rejected; on failure the previous
    /// snapshot stays live.
    pub async fn rebuild(&self, force_recompute: bool) -> Result<EngineStats, QnaError> {
        if self
            .rebuilding
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(QnaError::validation("rebuild", "A rebuild is already in progress"));
        }
        let _guard = RebuildGuard(&self.rebuilding);

        tracing::info!(force_recompute, "Rebuilding search indices");
        let state = build_state(&self.config, &self.dense, force_recompute)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Rebuild failed, keeping current indices");
                e
            })?;

        let state = Arc::new(state);
        match self.state.write() {
            Ok(mut guard) => *guard = state,
            Err(poisoned) => *poisoned.into_inner() = state,
        }
        let stats = self.stats();
        tracing::info!(documents = stats.documents, vocabulary = stats.vocabulary, "Indices swapped");
        Ok(stats)
    }

    pub fn stats(&self) -> EngineStats {
        let state = self.snapshot();
        EngineStats {
            documents: state.corpus.len(),
            articles: state.corpus.partition(Partition::Articles).len(),
            bugs: state.corpus.partition(Partition::Bugs).len(),
            vocabulary: state.keywords.vectorizer().vocabulary_len(),
            dimension: state.embeddings.dim(),
            model: self.provider.model_name().to_string(),
            built_at: state.built_at,
        }
    }

    /// Bucket limits from `embedding.product_top_k` and `embedding.bugs_top_k`.
    ///
    /// The first configured route takes the product limit, every other route
    /// the bugs limit.
    pub fn default_limits(&self) -> CategoryLimits {
        self.router
            .routes()
            .iter()
            .enumerate()
            .map(|(i, route)| {
                let k = if i == 0 {
                    self.config.embedding.product_top_k
                } else {
                    self.config.embedding.bugs_top_k
                };
                (route.bucket.clone(), k)
            })
            .collect()
    }

    /// Globally ranked hybrid search. `top_k` defaults to `embedding.top_k`.
    pub async fn search(&self, query: &str, top_k: Option<usize>) -> Result<Vec<ScoredResult>, QnaError> {
        let top_k = top_k.unwrap_or(self.config.embedding.top_k);
        let result = self.ranked(query, top_k).await;
        if let Err(e) = &result {
            tracing::error!(query = %query, top_k, error = %e, "Search failed");
        }
        result
    }

    /// Hybrid search with results split into category buckets, each truncated
    /// to its own limit.
    pub async fn search_by_category(
        &self,
        query: &str,
        limits: &CategoryLimits,
    ) -> Result<CategoryResults, QnaError> {
        let result = self.categorized(query, limits).await;
        if let Err(e) = &result {
            tracing::error!(query = %query, error = %e, "Category search failed");
        }
        result
    }

    async fn ranked(&self, query: &str, top_k: usize) -> Result<Vec<ScoredResult>, QnaError> {
        let (state, lexical, semantic) = self.raw_scores(query).await?;
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let mut hits = fusion::fuse(query, &lexical, &semantic, &state.corpus, SEARCH_CANDIDATES);
        fusion::rank(&mut hits);
        let results: Vec<ScoredResult> = hits
            .iter()
            .take(top_k)
            .filter_map(|hit| ScoredResult::from_hit(hit, &state.corpus))
            .collect();

        tracing::debug!(query = %query, returned = results.len(), "Search complete");
        Ok(results)
    }

    async fn categorized(&self, query: &str, limits: &CategoryLimits) -> Result<CategoryResults, QnaError> {
        let (state, lexical, semantic) = self.raw_scores(query).await?;
        let hits = fusion::fuse(query, &lexical, &semantic, &state.corpus, CATEGORY_CANDIDATES);
        let results = self.router.partition(hits, &state.corpus, limits);

        tracing::debug!(query = %query, returned = results.total(), "Category search complete");
        Ok(results)
    }

    /// Raw lexical and semantic cosine similarity of `query` against every document.
    async fn raw_scores(&self, query: &str) -> Result<(Arc<IndexState>, Vec<f64>, Vec<f64>), QnaError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(QnaError::Query("query must not be empty".to_string()));
        }

        let state = self.snapshot();
        let lexical = state.keywords.scores(query);
        let vector = self.dense.embed_query(query).await?;
        let semantic = state.embeddings.cosine_all(&vector);
        Ok((state, lexical, semantic))
    }
}

fn cache_path(config: &Config, partition: Partition) -> PathBuf {
    let dir = match partition {
        Partition::Articles => &config.embedding.cache_dir,
        Partition::Bugs => &config.embedding.bugs_cache_dir,
    };
    Path::new(dir).join(partition.cache_file_name())
}

/// Every corpus position needs exactly one embedding row.
fn ensure_aligned(rows: usize, documents: usize) -> Result<(), QnaError> {
    if rows != documents {
        return Err(QnaError::Index(format!(
            "embedding matrix has {} rows for {} documents",
            rows, documents
        )));
    }
    Ok(())
}

fn join_error(step: &str, e: task::JoinError) -> QnaError {
    QnaError::Index(format!("{} task failed: {}", step, e))
}

/// Load the corpus and build both indices from scratch.
///
/// CSV parsing and the TF-IDF fit run on the blocking pool.
async fn build_state(
    config: &Config,
    dense: &DenseIndexBuilder,
    force_recompute: bool,
) -> Result<IndexState, QnaError> {
    let data = config.data.clone();
    let corpus = task::spawn_blocking(move || corpus::load_corpus(&data))
        .await
        .map_err(|e| join_error("corpus load", e))??;

    let mut parts = Vec::with_capacity(corpus.spans().len());
    for span in corpus.spans() {
        let documents = corpus.partition(span.partition);
        let path = cache_path(config, span.partition);
        let label = span.partition.to_string();
        parts.push(dense.build(documents, &path, &label, force_recompute).await?);
    }
    let embeddings = EmbeddingMatrix::concat(dense.dimension(), &parts)?;
    ensure_aligned(embeddings.len(), corpus.len())?;

    let (corpus, keywords) = task::spawn_blocking(move || {
        let keywords = {
            let texts: Vec<&str> = corpus.documents().iter().map(|d| d.lexical_text.as_str()).collect();
            KeywordIndex::build(&texts, KeywordParams::default())
        };
        (corpus, keywords)
    })
    .await
    .map_err(|e| join_error("keyword index", e))?;

    Ok(IndexState {
        corpus,
        embeddings,
        keywords,
        built_at: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceFile;
    use crate::test_utils::HashEmbedder;

    const HEADER: &str = "게시글ID,제목,내용,댓글,URL\n";

    fn config(dir: &Path) -> Config {
        let mut config = Config::default();
        config.data.articles_path = dir.to_string_lossy().into_owned();
        config.data.primary_sources = vec![SourceFile { file: "dbs.csv".into(), category: "DBS".into() }];
        config.data.bugs_file = "bugs.csv".into();
        config.embedding.cache_dir = dir.join("cache").to_string_lossy().into_owned();
        config.embedding.bugs_cache_dir = dir.join("cache/bugs").to_string_lossy().into_owned();
        config
    }

    fn write_corpus(dir: &Path) {
        std::fs::write(
            dir.join("dbs.csv"),
            format!(
                "{HEADER}1,login error on manager,cannot log in,,https://cafe.naver.com/pnp/1\n\
                 2,license renewal,how to renew,,https://cafe.naver.com/pnp/2\n\
                 3,agent install guide,steps,,https://cafe.naver.com/pnp/3\n"
            ),
        )
        .unwrap();
    }

    async fn engine(dir: &Path) -> SearchEngine {
        write_corpus(dir);
        SearchEngine::initialize_with_provider(config(dir), Arc::new(HashEmbedder::new(32)))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_empty_query_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path()).await;
        assert!(matches!(engine.search("   ", None).await, Err(QnaError::Query(_))));
        assert!(engine.search_by_category("", &engine.default_limits()).await.is_err());
    }

    #[tokio::test]
    async fn test_zero_top_k_returns_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path()).await;
        assert!(engine.search("login", Some(0)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_default_limits_follow_config() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path()).await;
        let limits = engine.default_limits();
        assert_eq!(limits["product_qna"], 3);
        assert_eq!(limits["bugs_qna"], 3);
    }

    #[tokio::test]
    async fn test_missing_primary_corpus_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = SearchEngine::initialize_with_provider(config(dir.path()), Arc::new(HashEmbedder::new(8)))
            .await
            .err()
            .unwrap();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_rebuild_swaps_in_new_corpus() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path()).await;
        assert_eq!(engine.stats().documents, 3);

        let mut csv = std::fs::read_to_string(dir.path().join("dbs.csv")).unwrap();
        csv.push_str("4,backup schedule,nightly,,https://cafe.naver.com/pnp/4\n");
        std::fs::write(dir.path().join("dbs.csv"), csv).unwrap();

        let stats = engine.rebuild(false).await.unwrap();
        assert_eq!(stats.documents, 4);
        assert_eq!(engine.snapshot().embeddings.len(), 4);
    }

    #[tokio::test]
    async fn test_failed_rebuild_keeps_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path()).await;
        std::fs::remove_file(dir.path().join("dbs.csv")).unwrap();

        assert!(engine.rebuild(true).await.is_err());
        assert_eq!(engine.stats().documents, 3);
        assert!(!engine.search("login", None).await.unwrap().is_empty());
    }

    #[test]
    fn test_row_mismatch_is_an_index_error() {
        assert!(ensure_aligned(3, 3).is_ok());
        let err = ensure_aligned(2, 3).unwrap_err();
        assert!(matches!(err, QnaError::Index(_)));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_concurrent_rebuild_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path()).await;
        engine.rebuilding.store(true, Ordering::SeqCst);
        assert!(matches!(engine.rebuild(false).await, Err(QnaError::Validation { .. })));
        engine.rebuilding.store(false, Ordering::SeqCst);
        assert!(engine.rebuild(false).await.is_ok());
    }
}
