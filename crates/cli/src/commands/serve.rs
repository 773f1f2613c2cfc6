//! `docent serve` — Start the HTTP API server.

use crate::bootstrap::Runtime;
use docent_config::AppConfig;
use docent_gateway::api_v1::ApiV1State;
use std::sync::Arc;

pub async fn run(port_override: Option<u16>) -> anyhow::Result<()> {
    let mut config = AppConfig::load()?;
    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    let runtime = Runtime::open(config).await?;
    let tools = runtime.tools()?;
    let pipeline = runtime.pipeline(Arc::clone(&tools))?;
    let config = &runtime.config;

    println!("Docent gateway");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!("   Model:     {}", config.provider.chat_model);
    println!("   Documents: {}", config.ingestion.docs_dir.display());
    println!("   Tools:     {}", tools.names().join(", "));

    let state = ApiV1State::new(
        pipeline,
        Arc::clone(&runtime.ingestor),
        tools,
        config.ingestion.docs_dir.clone(),
    );
    docent_gateway::start(&config.gateway, Arc::new(state)).await?;

    Ok(())
}
