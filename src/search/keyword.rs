/// Sparse keyword index: TF-IDF over unigrams and bigrams.
///
/// Fit once over the lexical text of the whole unified corpus so vocabulary
/// and document frequencies reflect every partition. Rows are L2-normalized,
/// which makes cosine similarity a plain dot product. The matrix is stored
/// column-wise (one posting list per term) so a query only touches the
/// documents that share at least one of its terms.

use std::collections::HashMap;

use super::text::words;

/// Sparse vector as (term id, weight), sorted by term id.
pub type SparseVector = Vec<(u32, f64)>;

/// Vectorizer parameters.
#[derive(Debug, Clone)]
pub struct KeywordParams {
    /// Largest n-gram length (1 = unigrams only)
    pub max_ngram: usize,
    /// Terms in fewer documents than this are dropped
    pub min_df: usize,
    /// Terms in more than this fraction of documents are dropped
    pub max_df_ratio: f64,
    /// Vocabulary cap, keeping the most frequent terms corpus-wide
    pub max_features: usize,
}

impl Default for KeywordParams {
    fn default() -> Self {
        KeywordParams {
            max_ngram: 2,
            min_df: 1,
            max_df_ratio: 0.8,
            max_features: 10_000,
        }
    }
}

/// Fitted vocabulary and IDF weights.
#[derive(Debug, Clone)]
pub struct KeywordVectorizer {
    params: KeywordParams,
    vocabulary: HashMap<String, u32>,
    idf: Vec<f64>,
}

/// Term-weighted document matrix plus the vectorizer that produced it.
#[derive(Debug, Clone)]
pub struct KeywordIndex {
    vectorizer: KeywordVectorizer,
    /// postings[term] = (document position, weight), ascending by position
    postings: Vec<Vec<(u32, f32)>>,
    documents: usize,
}

/// Unigrams followed by space-joined n-grams up to `max_ngram`.
fn analyze(text: &str, max_ngram: usize) -> Vec<String> {
    let tokens = words(text);
    let mut terms = tokens.clone();
    for n in 2..=max_ngram {
        if tokens.len() < n {
            break;
        }
        terms.extend(tokens.windows(n).map(|w| w.join(" ")));
    }
    terms
}

fn term_counts(text: &str, max_ngram: usize) -> HashMap<String, u32> {
    let mut counts = HashMap::new();
    for term in analyze(text, max_ngram) {
        *counts.entry(term).or_insert(0) += 1;
    }
    counts
}

/// Sublinear TF times IDF, L2-normalized, sorted by term id.
fn weigh(counts: impl Iterator<Item = (u32, u32)>, idf: &[f64]) -> SparseVector {
    let mut vector: SparseVector = counts
        .map(|(id, tf)| (id, (1.0 + (tf as f64).ln()) * idf[id as usize]))
        .collect();
    let norm = vector.iter().map(|(_, w)| w * w).sum::<f64>().sqrt();
    if norm > 0.0 {
        for (_, w) in vector.iter_mut() {
            *w /= norm;
        }
    }
    vector.sort_by_key(|(id, _)| *id);
    vector
}

impl KeywordVectorizer {
    pub fn vocabulary_len(&self) -> usize {
        self.idf.len()
    }

    /// Weighted vector for `text` using the fitted vocabulary.
    ///
    /// Terms outside the vocabulary contribute nothing; the vocabulary is never refit.
    pub fn transform(&self, text: &str) -> SparseVector {
        let counts = term_counts(text, self.params.max_ngram);
        weigh(
            counts
                .into_iter()
                .filter_map(|(term, tf)| self.vocabulary.get(&term).map(|&id| (id, tf))),
            &self.idf,
        )
    }
}

impl KeywordIndex {
    /// Fit the vocabulary over `texts` and weight every document.
    pub fn build<S: AsRef<str>>(texts: &[S], params: KeywordParams) -> KeywordIndex {
        let n_docs = texts.len();
        let doc_counts: Vec<HashMap<String, u32>> = texts
            .iter()
            .map(|t| term_counts(t.as_ref(), params.max_ngram))
            .collect();

        let mut df: HashMap<&str, usize> = HashMap::new();
        let mut total_tf: HashMap<&str, u64> = HashMap::new();
        for counts in &doc_counts {
            for (term, tf) in counts {
                *df.entry(term.as_str()).or_insert(0) += 1;
                *total_tf.entry(term.as_str()).or_insert(0) += *tf as u64;
            }
        }

        let max_doc_count = params.max_df_ratio * n_docs as f64;
        let mut kept: Vec<&str> = df
            .iter()
            .filter(|(_, d)| **d >= params.min_df && (**d as f64) <= max_doc_count)
            .map(|(term, _)| *term)
            .collect();

        if kept.len() > params.max_features {
            kept.sort_by(|a, b| total_tf[b].cmp(&total_tf[a]).then_with(|| a.cmp(b)));
            kept.truncate(params.max_features);
        }
        kept.sort_unstable();

        let vocabulary: HashMap<String, u32> = kept
            .iter()
            .enumerate()
            .map(|(id, term)| (term.to_string(), id as u32))
            .collect();
        let idf: Vec<f64> = kept
            .iter()
            .map(|term| ((1.0 + n_docs as f64) / (1.0 + df[term] as f64)).ln() + 1.0)
            .collect();

        if vocabulary.is_empty() {
            tracing::warn!(
                documents = n_docs,
                "Keyword vocabulary is empty after pruning, lexical scores will be zero"
            );
        }

        let mut postings: Vec<Vec<(u32, f32)>> = vec![Vec::new(); idf.len()];
        for (position, counts) in doc_counts.iter().enumerate() {
            let row = weigh(
                counts
                    .iter()
                    .filter_map(|(term, tf)| vocabulary.get(term).map(|&id| (id, *tf))),
                &idf,
            );
            for (term, weight) in row {
                postings[term as usize].push((position as u32, weight as f32));
            }
        }

        tracing::info!(
            documents = n_docs,
            vocabulary = idf.len(),
            "Keyword index built"
        );

        KeywordIndex {
            vectorizer: KeywordVectorizer { params, vocabulary, idf },
            postings,
            documents: n_docs,
        }
    }

    pub fn vectorizer(&self) -> &KeywordVectorizer {
        &self.vectorizer
    }

    pub fn len(&self) -> usize {
        self.documents
    }

    pub fn is_empty(&self) -> bool {
        self.documents == 0
    }

    /// Cosine similarity of the query against every document, in corpus order.
    pub fn scores(&self, query: &str) -> Vec<f64> {
        let mut scores = vec![0.0f64; self.documents];
        for (term, q_weight) in self.vectorizer.transform(query) {
            for &(doc, d_weight) in &self.postings[term as usize] {
                scores[doc as usize] += q_weight * d_weight as f64;
            }
        }
        scores
    }
}
