//! Builds the runtime pieces described by the configuration.

use anyhow::Context;
use docent_agent::ChatPipeline;
use docent_config::{AppConfig, EmbedderKind, IndexBackend};
use docent_core::embedding::Embedder;
use docent_core::event::EventBus;
use docent_core::index::VectorIndex;
use docent_core::provider::Provider;
use docent_core::tool::ToolRegistry;
use docent_index::{FileIndex, HashEmbedder, InMemoryIndex, Ingestor, Retriever};
use docent_providers::{OpenAiCompatProvider, ProviderEmbedder};
use std::sync::Arc;
use tracing::debug;

/// Index, embedder and the services over them.
pub struct Runtime {
    pub config: AppConfig,
    pub events: Arc<EventBus>,
    pub retriever: Retriever,
    pub ingestor: Arc<Ingestor>,
}

impl Runtime {
    /// Open the index side. Needs the model service only when the
    /// embedder is provider-backed.
    pub async fn open(config: AppConfig) -> anyhow::Result<Self> {
        let events = Arc::new(EventBus::default());

        let index: Arc<dyn VectorIndex> = match config.index.backend {
            IndexBackend::File => {
                let path = config.index.resolved_path();
                let index = FileIndex::open(path.clone())
                    .await
                    .with_context(|| format!("failed to open index at {}", path.display()))?;
                Arc::new(index)
            }
            IndexBackend::Memory => Arc::new(InMemoryIndex::new()),
        };

        let embedder: Arc<dyn Embedder> = match config.index.embedder {
            EmbedderKind::Hash => Arc::new(HashEmbedder::new(config.index.dimensions)),
            EmbedderKind::Provider => {
                let provider = OpenAiCompatProvider::from_config(&config)
                    .context("the provider embedder needs a configured model service")?;
                Arc::new(ProviderEmbedder::new(
                    Arc::new(provider),
                    config.provider.embedding_model.clone(),
                ))
            }
        };
        debug!(index = index.name(), embedder = embedder.name(), "Runtime opened");

        let retriever = Retriever::from_config(Arc::clone(&embedder), Arc::clone(&index), &config);
        let ingestor = Ingestor::from_config(embedder, index, &config.ingestion)
            .with_events(Arc::clone(&events));

        Ok(Self {
            config,
            events,
            retriever,
            ingestor: Arc::new(ingestor),
        })
    }

    pub fn tools(&self) -> anyhow::Result<Arc<ToolRegistry>> {
        let registry = docent_tools::default_registry(
            self.retriever.clone(),
            self.config.retrieval.top_k,
            self.config.retrieval.tool_threshold,
            self.config.timeouts.tool(),
        )?;
        Ok(Arc::new(registry))
    }

    /// The chat pipeline over the configured model service.
    pub fn pipeline(&self, tools: Arc<ToolRegistry>) -> anyhow::Result<ChatPipeline> {
        let provider: Arc<dyn Provider> = Arc::new(
            OpenAiCompatProvider::from_config(&self.config)
                .context("chat needs a configured model service")?,
        );
        Ok(ChatPipeline::from_config(
            &self.config,
            provider,
            self.retriever.clone(),
            tools,
            Arc::clone(&self.events),
        ))
    }
}
