//! CLI binary for voxstream.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use futures_util::StreamExt;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use voxstream::llm::{ChatMessage, LlmError};
use voxstream::{
    AppConfig, CommandBackend, RequestSpec, SessionState, SpeechReader, StreamSession,
};

/// Stream a chat completion to the terminal, optionally reading it aloud.
#[derive(Parser)]
#[command(name = "voxstream", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured model.
    #[arg(short, long)]
    model: Option<String>,

    /// Speak the response through the configured synthesizer command.
    #[arg(long)]
    speak: bool,

    /// Print the final response as a completion JSON object.
    #[arg(long)]
    json: bool,

    /// Prompt text.
    #[arg(required = true)]
    prompt: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout carries only the response.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("voxstream=info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref())?;
    if let Some(model) = cli.model {
        config.llm.model = model;
    }

    let spec = RequestSpec::from_config(&config.llm, vec![ChatMessage::user(cli.prompt.join(" "))])?;
    let session = StreamSession::from_config(&config.llm);

    let mut reader = if cli.speak {
        let backend = Arc::new(CommandBackend::new(config.tts.command.clone()));
        let mut reader = SpeechReader::from_config(backend, &config.tts);
        let voices = reader.scheduler().refresh_voices().await;
        info!(count = voices.len(), "voices available");
        reader.on_request_started();
        Some(reader)
    } else {
        None
    };

    let canceller = session.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            canceller.cancel();
        }
    });

    let mut snapshots = match session.start(&spec).await {
        Ok(stream) => stream,
        Err(LlmError::Cancelled) => {
            warn!("request cancelled before the response started");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };
    let mut stdout = std::io::stdout();
    let mut printed = 0;
    let mut last = None;
    while let Some(item) = snapshots.next().await {
        let snapshot = item?;
        if let Some(delta) = snapshot.content.get(printed..) {
            write!(stdout, "{delta}")?;
            stdout.flush()?;
        }
        printed = snapshot.content.len();
        if let Some(reader) = reader.as_mut() {
            reader.update(&snapshot.content, false, true);
        }
        last = Some(snapshot);
    }
    writeln!(stdout)?;

    match session.state() {
        SessionState::Completed(stats) => {
            info!(
                deltas = stats.deltas,
                elapsed_ms = stats.elapsed.as_millis() as u64,
                "response complete"
            );
            if let (Some(reader), Some(snapshot)) = (reader.as_mut(), last.as_ref()) {
                reader.update(&snapshot.content, true, true);
                let interrupted = tokio::select! {
                    () = reader.scheduler().wait_idle() => false,
                    _ = tokio::signal::ctrl_c() => true,
                };
                if interrupted {
                    reader.stop();
                }
            }
        }
        SessionState::Cancelled => {
            warn!("response cancelled");
            if let Some(reader) = reader.as_mut() {
                reader.stop();
            }
        }
        other => warn!(state = ?other, "stream ended unexpectedly"),
    }
    interrupt.abort();

    if cli.json
        && let Some(snapshot) = last
    {
        let completion = snapshot.with_fallback_model(&spec.model).to_completion();
        println!("{}", serde_json::to_string_pretty(&completion)?);
    }

    Ok(())
}

fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<AppConfig> {
    if let Some(path) = path {
        return AppConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()));
    }
    let default_path = AppConfig::default_config_path();
    if default_path.exists() {
        return AppConfig::from_file(&default_path)
            .with_context(|| format!("loading config from {}", default_path.display()));
    }
    Ok(AppConfig::default())
}
