//! `docent ingest` — Chunk, embed and index documents.

use crate::bootstrap::Runtime;
use anyhow::Context;
use docent_config::AppConfig;
use docent_core::document::Document;
use docent_index::IngestReport;
use std::path::PathBuf;

pub async fn run(paths: Vec<PathBuf>) -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    let paths = if paths.is_empty() {
        vec![config.ingestion.docs_dir.clone()]
    } else {
        paths
    };
    let runtime = Runtime::open(config).await?;

    let mut report = IngestReport::default();
    for path in paths {
        if path.is_dir() {
            let found = runtime.ingestor.ingest_dir(&path).await?;
            report.sources.extend(found.sources);
            report.skipped.extend(found.skipped);
        } else {
            let text = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?;
            let source = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .with_context(|| format!("{} has no file name", path.display()))?;
            let count = runtime.ingestor.ingest(&Document::new(source.clone(), text)).await?;
            report.sources.insert(source, count);
        }
    }

    for (source, chunks) in &report.sources {
        println!("  {source:<40} {chunks:>5} chunks");
    }
    for source in &report.skipped {
        println!("  {source:<40} skipped (unreadable)");
    }
    println!(
        "Ingested {} sources, {} chunks",
        report.sources.len(),
        report.total_chunks()
    );

    Ok(())
}
