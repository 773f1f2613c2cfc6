//! Gateway test fixtures: an API state backed by in-memory parts.

use crate::api_v1::{ApiV1State, SharedApiState};
use docent_agent::ChatPipeline;
use docent_config::AppConfig;
use docent_core::error::ProviderError;
use docent_core::event::EventBus;
use docent_core::message::Message;
use docent_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use docent_index::{HashEmbedder, InMemoryIndex, Ingestor, Retriever};
use std::sync::Arc;
use std::time::Duration;

/// Answers every request with the same text.
struct MockProvider {
    response_text: String,
}

#[async_trait::async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        "gateway_mock"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        Ok(ProviderResponse {
            message: Message::assistant(&self.response_text),
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
            model: "mock-model".into(),
            metadata: serde_json::Map::new(),
        })
    }
}

/// Never answers.
struct HangingProvider;

#[async_trait::async_trait]
impl Provider for HangingProvider {
    fn name(&self) -> &str {
        "hanging"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        std::future::pending().await
    }
}

pub struct TestApi {
    pub state: SharedApiState,
    /// Documents directory, removed on drop
    pub _docs: tempfile::TempDir,
}

fn state_with(provider: Arc<dyn Provider>) -> TestApi {
    let config = AppConfig::default();
    let docs = tempfile::tempdir().unwrap();
    let events = Arc::new(EventBus::new(64));
    let embedder = Arc::new(HashEmbedder::new(128));
    let index = Arc::new(InMemoryIndex::new());
    let retriever = Retriever::from_config(embedder.clone(), index.clone(), &config);
    let tools = Arc::new(
        docent_tools::default_registry(retriever.clone(), 4, 0.7, Duration::from_secs(5)).unwrap(),
    );
    let ingestor = Ingestor::from_config(embedder, index, &config.ingestion)
        .with_events(Arc::clone(&events));
    let pipeline = ChatPipeline::from_config(&config, provider, retriever, Arc::clone(&tools), events);

    TestApi {
        state: Arc::new(ApiV1State::new(
            pipeline,
            Arc::new(ingestor),
            tools,
            docs.path(),
        )),
        _docs: docs,
    }
}

pub fn test_state() -> TestApi {
    state_with(Arc::new(MockProvider {
        response_text: "Mock response from agent".into(),
    }))
}

pub fn hanging_state() -> TestApi {
    state_with(Arc::new(HangingProvider))
}
