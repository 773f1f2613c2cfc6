//! `docent sources` and `docent forget` — Index administration.

use crate::bootstrap::Runtime;
use docent_config::AppConfig;

pub async fn list() -> anyhow::Result<()> {
    let runtime = Runtime::open(AppConfig::load()?).await?;
    let summary = runtime.ingestor.index().summary().await?;

    if summary.is_empty() {
        println!("No documents indexed. Run `docent ingest` first.");
        return Ok(());
    }
    for entry in &summary {
        println!("  {:<40} {:>5} chunks", entry.source, entry.chunks);
    }
    let total: usize = summary.iter().map(|s| s.chunks).sum();
    println!("{} sources, {total} chunks", summary.len());

    Ok(())
}

pub async fn forget(sources: Vec<String>) -> anyhow::Result<()> {
    let runtime = Runtime::open(AppConfig::load()?).await?;
    let deleted = runtime.ingestor.delete_sources(&sources).await?;

    let mut missing = Vec::new();
    for (source, count) in &deleted {
        if *count == 0 {
            missing.push(source.as_str());
        } else {
            println!("  {source:<40} {count:>5} chunks removed");
        }
    }
    if !missing.is_empty() {
        anyhow::bail!("not indexed: {}", missing.join(", "));
    }

    Ok(())
}
