/// OpenAI embedding provider
///
/// Calls the OpenAI Embeddings API using reqwest, one request per batch.
/// Supports text-embedding-3-small (1536 dimensions) by default.
/// Requires QNASEARCH_EMBEDDING__OPENAI_API_KEY env var or embedding.openai_api_key in config.

use async_trait::async_trait;

use super::{EmbeddingError, EmbeddingProvider};

/// Request body for OpenAI Embeddings API
#[derive(serde::Serialize)]
struct EmbedRequest<'a> {
    input: &'a [String],
    model: &'a str,
}

/// Response from OpenAI Embeddings API
#[derive(serde::Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedData>,
}

/// Single embedding result from OpenAI
#[derive(serde::Deserialize)]
struct EmbedData {
    index: usize,
    embedding: Vec<f32>,
}

/// Known output dimension for the OpenAI embedding models.
fn model_dimension(model: &str) -> Option<usize> {
    match model {
        "text-embedding-3-small" | "text-embedding-ada-002" => Some(1536),
        "text-embedding-3-large" => Some(3072),
        _ => None,
    }
}

/// OpenAI-backed embedding provider.
///
/// Requires a valid API key — validate on construction, not at embed time.
pub struct OpenAIEmbeddingProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dim: usize,
}

impl OpenAIEmbeddingProvider {
    /// Create a new OpenAIEmbeddingProvider.
    ///
    /// # Arguments
    /// * `api_key` - OpenAI API key (must be non-empty)
    /// * `model_name` - OpenAI embedding model; anything that is not an OpenAI
    ///   model name (e.g. the local default) selects text-embedding-3-small
    ///
    /// # Errors
    /// Returns `EmbeddingError::NotConfigured` if api_key is empty.
    pub fn new(api_key: String, model_name: &str) -> Result<Self, EmbeddingError> {
        if api_key.trim().is_empty() {
            return Err(EmbeddingError::NotConfigured(
                "OpenAI API key is required when using the openai embedding provider. \
                 Set QNASEARCH_EMBEDDING__OPENAI_API_KEY or embedding.openai_api_key in qnasearch.toml"
                    .to_string(),
            ));
        }

        let model = if model_dimension(model_name).is_some() {
            model_name.to_string()
        } else {
            tracing::warn!(
                model = %model_name,
                "Not an OpenAI embedding model, using text-embedding-3-small"
            );
            "text-embedding-3-small".to_string()
        };
        let dim = model_dimension(&model).unwrap_or(1536);

        Ok(OpenAIEmbeddingProvider {
            client: reqwest::Client::new(),
            api_key,
            model,
            dim,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbeddingProvider {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbedRequest {
            input: texts,
            model: &self.model,
        };

        let response = self
            .client
            .post("https://api.openai.com/v1/embeddings")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| EmbeddingError::Generation(format!("HTTP request failed: {}", e)))?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(EmbeddingError::Api {
                status,
                message: body,
            });
        }

        let mut embed_response: EmbedResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::Generation(format!("Failed to parse API response: {}", e)))?;

        if embed_response.data.len() != texts.len() {
            return Err(EmbeddingError::Generation(format!(
                "API returned {} embeddings for {} inputs",
                embed_response.data.len(),
                texts.len()
            )));
        }

        // The API documents `index` as the input position; don't rely on response order
        embed_response.data.sort_by_key(|d| d.index);
        Ok(embed_response.data.into_iter().map(|d| d.embedding).collect())
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dim
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_key_rejected() {
        assert!(matches!(
            OpenAIEmbeddingProvider::new("  ".to_string(), "text-embedding-3-small"),
            Err(EmbeddingError::NotConfigured(_))
        ));
    }

    #[test]
    fn test_non_openai_model_falls_back() {
        let provider = OpenAIEmbeddingProvider::new("sk-test".to_string(), "all-MiniLM-L6-v2").unwrap();
        assert_eq!(provider.model_name(), "text-embedding-3-small");
        assert_eq!(provider.dimension(), 1536);
    }

    #[test]
    fn test_large_model_dimension() {
        let provider = OpenAIEmbeddingProvider::new("sk-test".to_string(), "text-embedding-3-large").unwrap();
        assert_eq!(provider.dimension(), 3072);
    }
}
