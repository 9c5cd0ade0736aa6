/// Domain-specific error types for qnasearch
///
/// Separates fatal startup failures (configuration, model, primary corpus,
/// misaligned indices) from degrading ones (secondary corpus, embedding cache) so callers can
/// decide whether to abort or continue with a smaller corpus.

#[derive(Debug, thiserror::Error)]
pub enum QnaError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Embedding model load error: {0}")]
    ModelLoad(String),

    #[error("Primary corpus error: {0}")]
    PrimaryData(String),

    #[error("Secondary corpus error: {0}")]
    SecondaryData(String),

    #[error("Embedding cache error: {0}")]
    Cache(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<sqlx::Error> for QnaError {
    fn from(e: sqlx::Error) -> Self {
        QnaError::Storage(e.to_string())
    }
}

impl From<crate::embedding::EmbeddingError> for QnaError {
    fn from(e: crate::embedding::EmbeddingError) -> Self {
        match e {
            crate::embedding::EmbeddingError::ModelInit(msg) => QnaError::ModelLoad(msg),
            crate::embedding::EmbeddingError::NotConfigured(msg) => QnaError::ModelLoad(msg),
            other => QnaError::Query(other.to_string()),
        }
    }
}

impl QnaError {
    /// Helper to create validation errors with field names
    ///
    /// Example:
    /// ```
    /// use qnasearch::errors::QnaError;
    /// let err = QnaError::validation("query", "Query cannot be empty");
    /// ```
    pub fn validation(field: &str, message: &str) -> Self {
        QnaError::Validation {
            message: message.to_string(),
            field: Some(field.to_string()),
        }
    }

    /// True for failures that must abort `initialize`.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            QnaError::Config(_) | QnaError::ModelLoad(_) | QnaError::PrimaryData(_) | QnaError::Index(_)
        )
    }
}
