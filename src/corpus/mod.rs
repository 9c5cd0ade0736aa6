/// Unified document corpus
///
/// Documents live in a single arena (`Vec<Document>`); a document's position in
/// that arena is the handle shared by the embedding matrix and the keyword
/// matrix. Partitions record which contiguous span came from which sub-corpus
/// so the dense index can cache each span separately.

pub mod loader;
pub mod normalize;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use loader::{load, load_corpus, load_secondary, SecondaryLoad, SourceSpec};
pub use normalize::{normalize, RawRecord};

/// A single searchable record, immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Source-defined identifier (post id, ticket number)
    pub id: String,
    pub title: String,
    pub body: String,
    pub comments: Option<String>,
    /// Source tag such as "DBS", "Manager", "SA" or "Bugs"
    pub category: String,
    /// Canonical link; category-partitioned search routes on it
    pub url: String,
    /// Title, body and comments for the embedding model
    pub dense_text: String,
    /// Title-weighted text for the keyword vectorizer
    pub lexical_text: String,
}

/// Independently cached sub-corpora, in concatenation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Partition {
    Articles,
    Bugs,
}

impl Partition {
    /// File name of this partition's embedding cache inside its cache directory.
    pub fn cache_file_name(&self) -> &'static str {
        match self {
            Partition::Articles => "article_embeddings.bin",
            Partition::Bugs => "bugs_embeddings.bin",
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Partition::Articles => write!(f, "articles"),
            Partition::Bugs => write!(f, "bugs"),
        }
    }
}

/// Contiguous range of corpus positions belonging to one partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionSpan {
    pub partition: Partition,
    pub start: usize,
    pub len: usize,
}

/// Ordered document arena. Append-only while building, read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    documents: Vec<Document>,
    spans: Vec<PartitionSpan>,
}

impl Corpus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a partition's documents after everything already loaded.
    ///
    /// A partition may only be appended once; its span is recorded even when empty.
    pub fn push_partition(&mut self, partition: Partition, documents: Vec<Document>) {
        debug_assert!(
            self.spans.iter().all(|s| s.partition != partition),
            "partition {partition} appended twice"
        );
        let start = self.documents.len();
        let len = documents.len();
        self.documents.extend(documents);
        self.spans.push(PartitionSpan { partition, start, len });
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn get(&self, position: usize) -> Option<&Document> {
        self.documents.get(position)
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    /// Spans in concatenation order.
    pub fn spans(&self) -> &[PartitionSpan] {
        &self.spans
    }

    /// Documents of one partition, empty if it was never appended.
    pub fn partition(&self, partition: Partition) -> &[Document] {
        self.spans
            .iter()
            .find(|s| s.partition == partition)
            .map(|s| &self.documents[s.start..s.start + s.len])
            .unwrap_or(&[])
    }
}

#[cfg(test)]
pub(crate) fn test_document(id: &str, title: &str, body: &str, category: &str, url: &str) -> Document {
    normalize(
        RawRecord {
            id: id.to_string(),
            title: title.to_string(),
            body: body.to_string(),
            comments: String::new(),
            url: url.to_string(),
        },
        category,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partitions_keep_concatenation_order() {
        let mut corpus = Corpus::new();
        corpus.push_partition(
            Partition::Articles,
            vec![
                test_document("1", "a", "", "DBS", "https://cafe.naver.com/1"),
                test_document("2", "b", "", "SA", "https://cafe.naver.com/2"),
            ],
        );
        corpus.push_partition(
            Partition::Bugs,
            vec![test_document("77", "c", "", "Bugs", "https://bugs.pnpsecure.com/77")],
        );

        assert_eq!(corpus.len(), 3);
        assert_eq!(corpus.partition(Partition::Articles).len(), 2);
        assert_eq!(corpus.partition(Partition::Bugs)[0].id, "77");
        assert_eq!(corpus.get(2).map(|d| d.id.as_str()), Some("77"));
        assert_eq!(
            corpus.spans()[1],
            PartitionSpan { partition: Partition::Bugs, start: 2, len: 1 }
        );
    }

    #[test]
    fn test_missing_partition_is_empty() {
        let mut corpus = Corpus::new();
        corpus.push_partition(Partition::Articles, Vec::new());
        assert!(corpus.partition(Partition::Bugs).is_empty());
        assert!(corpus.is_empty());
    }
}
