//! Embeddings served by a chat provider's `/embeddings` endpoint.

use async_trait::async_trait;
use docent_core::error::EmbeddingError;
use docent_core::provider::EmbeddingRequest;
use docent_core::{Embedder, Provider};
use std::sync::Arc;

/// Adapts [`Provider::embed`] to the [`Embedder`] interface.
pub struct ProviderEmbedder {
    provider: Arc<dyn Provider>,
    model: String,
}

impl ProviderEmbedder {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }
}

#[async_trait]
impl Embedder for ProviderEmbedder {
    fn name(&self) -> &str {
        self.provider.name()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_batch(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| EmbeddingError::Unavailable("empty embedding response".into()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if texts.iter().any(|t| t.trim().is_empty()) {
            return Err(EmbeddingError::MalformedInput("cannot embed empty text".into()));
        }

        let response = self
            .provider
            .embed(EmbeddingRequest {
                model: self.model.clone(),
                inputs: texts.to_vec(),
            })
            .await?;

        if response.embeddings.len() != texts.len() {
            return Err(EmbeddingError::Unavailable(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                response.embeddings.len()
            )));
        }
        Ok(response.embeddings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docent_core::error::ProviderError;
    use docent_core::provider::{EmbeddingResponse, ProviderRequest, ProviderResponse};

    /// Returns one `[len, 1.0]` vector per input, or fails with `fail`.
    struct EmbeddingOnly {
        fail: Option<ProviderError>,
    }

    #[async_trait]
    impl Provider for EmbeddingOnly {
        fn name(&self) -> &str {
            "embedding-only"
        }

        async fn complete(&self, _: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            Err(ProviderError::NotConfigured("chat".into()))
        }

        async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse, ProviderError> {
            if let Some(err) = &self.fail {
                return Err(err.clone());
            }
            Ok(EmbeddingResponse {
                embeddings: request.inputs.iter().map(|t| vec![t.len() as f32, 1.0]).collect(),
                model: request.model,
                usage: None,
            })
        }
    }

    fn embedder(fail: Option<ProviderError>) -> ProviderEmbedder {
        ProviderEmbedder::new(Arc::new(EmbeddingOnly { fail }), "text-embedding-3-small")
    }

    #[tokio::test]
    async fn embeds_single_text() {
        assert_eq!(embedder(None).embed("abcd").await.unwrap(), vec![4.0, 1.0]);
    }

    #[tokio::test]
    async fn batch_is_one_request_in_order() {
        let texts = vec!["a".to_string(), "abc".to_string()];
        let vectors = embedder(None).embed_batch(&texts).await.unwrap();
        assert_eq!(vectors, vec![vec![1.0, 1.0], vec![3.0, 1.0]]);
    }

    #[tokio::test]
    async fn empty_text_is_malformed() {
        let err = embedder(None).embed("   ").await.unwrap_err();
        assert!(matches!(err, EmbeddingError::MalformedInput(_)));
    }

    #[tokio::test]
    async fn network_failure_is_unavailable() {
        let err = embedder(Some(ProviderError::Network("refused".into())))
            .embed("text")
            .await
            .unwrap_err();
        assert!(matches!(err, EmbeddingError::Unavailable(_)));
    }
}
