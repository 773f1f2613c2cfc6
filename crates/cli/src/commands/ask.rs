//! `docent ask` — Ask one question and stream the answer to stdout.
//!
//! Tool activity and status go to stderr. Ctrl-C cancels the query.

use crate::bootstrap::Runtime;
use docent_agent::StreamEvent;
use docent_config::AppConfig;
use docent_core::message::Query;
use futures::StreamExt;
use std::io::Write;
use tokio_util::sync::CancellationToken;

pub async fn run(message: String) -> anyhow::Result<()> {
    let runtime = Runtime::open(AppConfig::load()?).await?;
    let pipeline = runtime.pipeline(runtime.tools()?)?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let mut stream = pipeline.submit_with_cancel(Query::new(message), cancel);
    let mut stdout = std::io::stdout();
    while let Some(increment) = stream.next().await {
        match increment.event {
            StreamEvent::Text { content } => {
                write!(stdout, "{content}")?;
                stdout.flush()?;
            }
            StreamEvent::ToolStarted { name, arguments, .. } => {
                eprintln!("  [tool] {name}({arguments})");
            }
            StreamEvent::ToolFinished { name, success, output, .. } => {
                let status = if success { "ok" } else { "failed" };
                eprintln!("  [tool] {name} {status}: {}", preview(&output));
            }
            StreamEvent::RetrievalUnavailable { message } => {
                eprintln!("  [warn] answering without documents: {message}");
            }
            StreamEvent::Done => {
                writeln!(stdout)?;
            }
            StreamEvent::Error { kind, message } => {
                writeln!(stdout)?;
                anyhow::bail!("{kind}: {message}");
            }
            StreamEvent::Cancelled => {
                writeln!(stdout)?;
                eprintln!("  cancelled");
            }
        }
    }

    Ok(())
}

fn preview(output: &str) -> String {
    const MAX: usize = 120;
    match output.char_indices().nth(MAX) {
        Some((end, _)) => format!("{}…", &output[..end]),
        None => output.to_string(),
    }
}
