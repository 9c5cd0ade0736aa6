pub mod fusion;
pub mod keyword;
pub mod partition;
pub mod text;

// Re-export key types for convenience
pub use fusion::{FusedHit, MatchSource, CATEGORY_CANDIDATES, SEARCH_CANDIDATES};
pub use keyword::{KeywordIndex, KeywordParams};
pub use partition::{CategoryBucket, CategoryLimits, CategoryResults, CategoryRouter};

use serde::Serialize;

use crate::corpus::{Corpus, Document};

/// A ranked search result.
///
/// Produced per query by `SearchEngine::search` and the category partitioner;
/// never stored.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredResult {
    /// Position in the unified corpus
    pub position: usize,
    pub document: Document,
    /// Fused score including the exact-match bonus
    pub combined_score: f64,
    /// Raw keyword cosine similarity
    pub lexical_score: f64,
    /// Raw embedding cosine similarity
    pub semantic_score: f64,
    pub bonus: f64,
    pub match_source: MatchSource,
}

impl ScoredResult {
    /// Attach the document behind a fused hit.
    pub fn from_hit(hit: &FusedHit, corpus: &Corpus) -> Option<ScoredResult> {
        let document = corpus.get(hit.position)?.clone();
        Some(ScoredResult {
            position: hit.position,
            document,
            combined_score: hit.combined_score,
            lexical_score: hit.lexical_score,
            semantic_score: hit.semantic_score,
            bonus: hit.bonus,
            match_source: hit.match_source,
        })
    }

    /// True when the query shares at least one keyword term with the document.
    pub fn keyword_matched(&self) -> bool {
        self.lexical_score > 0.0
    }
}
