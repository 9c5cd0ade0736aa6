/// Score fusion and ranking
///
/// Pure functions over raw per-document score arrays:
///   1. Pick the top candidates from the lexical and semantic arrays separately
///      (lexical candidates must score above zero)
///   2. Max-normalize each candidate set on its own
///   3. Weighted sum: combined = 0.6·lexical + 0.4·semantic
///   4. Exact-match bonus from literal word overlap with title and text
///   5. Sort by combined score, earlier corpus position first on ties
///
/// No I/O and no shared state: identical inputs always give identical output.

use std::collections::{BTreeMap, HashSet};

use super::text::word_set;
use crate::corpus::Corpus;

pub const LEXICAL_WEIGHT: f64 = 0.6;
pub const SEMANTIC_WEIGHT: f64 = 0.4;

/// Candidates taken from each raw-score array by `search`.
pub const SEARCH_CANDIDATES: usize = 20;
/// Candidates taken from each raw-score array by `search_by_category`.
pub const CATEGORY_CANDIDATES: usize = 50;

const TITLE_BONUS_WEIGHT: f64 = 0.5;
const BODY_BONUS_WEIGHT: f64 = 0.2;
pub const MAX_BONUS: f64 = 0.7;

/// Which candidate sets a fused document came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchSource {
    Hybrid,
    LexicalOnly,
    SemanticOnly,
}

/// A fused candidate, identified by corpus position.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedHit {
    pub position: usize,
    pub combined_score: f64,
    /// Raw lexical cosine similarity
    pub lexical_score: f64,
    /// Raw semantic cosine similarity
    pub semantic_score: f64,
    pub bonus: f64,
    pub match_source: MatchSource,
}

fn finite_or_zero(score: f64) -> f64 {
    if score.is_finite() { score } else { 0.0 }
}

/// The `n` highest scores as (position, score), highest first, earlier position on ties.
pub fn top_candidates(scores: &[f64], n: usize, positive_only: bool) -> Vec<(usize, f64)> {
    let mut ranked: Vec<(usize, f64)> = scores
        .iter()
        .map(|&s| finite_or_zero(s))
        .enumerate()
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    ranked.truncate(n);
    if positive_only {
        ranked.retain(|&(_, s)| s > 0.0);
    }
    ranked
}

/// Divide every score by the set's maximum.
///
/// A set whose maximum is not positive normalizes to all zeros; negative
/// results (possible for cosine similarity) are clamped to zero.
pub fn max_normalize(candidates: &[(usize, f64)]) -> Vec<(usize, f64)> {
    let max = candidates
        .iter()
        .map(|&(_, s)| s)
        .fold(f64::NEG_INFINITY, f64::max);
    candidates
        .iter()
        .map(|&(pos, s)| {
            let norm = if max > 0.0 { (s / max).max(0.0) } else { 0.0 };
            (pos, norm)
        })
        .collect()
}

/// Bonus for literal query words appearing in the title and in the full text.
///
/// `min(0.5·title_overlap + 0.2·body_overlap, 0.7)` where each overlap is the
/// fraction of distinct query words present. Zero for a query with no words.
pub fn exact_match_bonus(query_words: &HashSet<String>, title: &str, text: &str) -> f64 {
    if query_words.is_empty() {
        return 0.0;
    }
    let total = query_words.len() as f64;
    let title_words = word_set(title);
    let text_words = word_set(text);
    let title_ratio = query_words.intersection(&title_words).count() as f64 / total;
    let text_ratio = query_words.intersection(&text_words).count() as f64 / total;
    (TITLE_BONUS_WEIGHT * title_ratio + BODY_BONUS_WEIGHT * text_ratio).min(MAX_BONUS)
}

#[derive(Default)]
struct Partial {
    lexical_norm: Option<f64>,
    semantic_norm: Option<f64>,
}

/// Fuse raw lexical and semantic scores into hits, in corpus order.
/// Use `rank` to order them.
///
/// `lexical_raw` and `semantic_raw` must both have one entry per corpus position.
pub fn fuse(
    query: &str,
    lexical_raw: &[f64],
    semantic_raw: &[f64],
    corpus: &Corpus,
    candidates: usize,
) -> Vec<FusedHit> {
    debug_assert_eq!(lexical_raw.len(), corpus.len());
    debug_assert_eq!(semantic_raw.len(), corpus.len());

    let lexical = max_normalize(&top_candidates(lexical_raw, candidates, true));
    let semantic = max_normalize(&top_candidates(semantic_raw, candidates, false));

    let mut merged: BTreeMap<usize, Partial> = BTreeMap::new();
    for (pos, norm) in lexical {
        merged.entry(pos).or_default().lexical_norm = Some(norm);
    }
    for (pos, norm) in semantic {
        merged.entry(pos).or_default().semantic_norm = Some(norm);
    }

    let query_words = word_set(query);

    merged
        .into_iter()
        .filter_map(|(position, partial)| {
            let doc = corpus.get(position)?;
            let mut combined = LEXICAL_WEIGHT * partial.lexical_norm.unwrap_or(0.0)
                + SEMANTIC_WEIGHT * partial.semantic_norm.unwrap_or(0.0);
            let bonus = if combined > 0.0 {
                exact_match_bonus(&query_words, &doc.title, &doc.dense_text)
            } else {
                0.0
            };
            combined += bonus;

            let match_source = match (partial.lexical_norm, partial.semantic_norm) {
                (Some(_), Some(_)) => MatchSource::Hybrid,
                (Some(_), None) => MatchSource::LexicalOnly,
                _ => MatchSource::SemanticOnly,
            };

            Some(FusedHit {
                position,
                combined_score: combined,
                lexical_score: finite_or_zero(lexical_raw[position]),
                semantic_score: finite_or_zero(semantic_raw[position]),
                bonus,
                match_source,
            })
        })
        .collect()
}

/// Sort by combined score descending, earlier corpus position first on ties.
pub fn rank(hits: &mut [FusedHit]) {
    hits.sort_by(|a, b| {
        b.combined_score
            .total_cmp(&a.combined_score)
            .then(a.position.cmp(&b.position))
    });
}
