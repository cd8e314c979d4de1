mod server;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use deal_screen_core::{
    cancel_pair, extract_pages_with_timeout, AnalysisPipeline, AnalysisRequest, AnthropicGateway,
    FsStore, LopdfExtractor, ModelTier, PipelineConfig, ProgressEvent,
};
use server::{AppState, RunLock};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "deal-screen", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Root of the filesystem store (submissions, documents, blobs, reports)
    #[arg(long, env = "DEAL_SCREEN_DATA_DIR", default_value = "./data", global = true)]
    data_dir: PathBuf,

    /// Model id; unknown ids fall back to the default tier
    #[arg(long, env = "DEAL_SCREEN_MODEL", global = true)]
    model: Option<String>,

    /// Inference service API key
    #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true, global = true)]
    api_key: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the screening pipeline for one submission and print its progress.
    Analyze {
        /// Submission id
        #[arg(long)]
        submission: String,
    },
    /// Print the per-page text layer of a PDF.
    ExtractText {
        #[arg(long)]
        file: PathBuf,
        /// Maximum number of pages to print.
        #[arg(long)]
        max_pages: Option<usize>,
    },
    /// Serve the pipeline as a server-sent-events endpoint.
    Serve {
        #[arg(long, default_value = "0.0.0.0:8080")]
        bind: SocketAddr,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        "deal-screen boot"
    );

    let mut config = PipelineConfig::from_env();
    if let Some(api_key) = cli.api_key.clone() {
        config.gateway.api_key = api_key;
    }
    let model = ModelTier::resolve(cli.model.as_deref());

    match cli.command {
        Command::Analyze { submission } => {
            let pipeline = Arc::new(build_pipeline(&cli.data_dir, config)?);
            let (cancel, signal) = cancel_pair();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    cancel.cancel();
                }
            });

            let (handle, mut events) =
                pipeline.spawn(AnalysisRequest::new(submission, model), signal);
            while let Some(event) = events.recv().await {
                print_event(&event);
            }

            let report = handle.await.context("analysis task failed")??;
            println!(
                "report {} saved at {}: score={} degraded={:?}",
                report.id,
                report.generated_at.to_rfc3339(),
                report.overall_score,
                report.degraded_stages
            );
        }
        Command::ExtractText { file, max_pages } => {
            let bytes = tokio::fs::read(&file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;
            let pages = extract_pages_with_timeout(
                Arc::new(LopdfExtractor),
                Arc::from(bytes),
                config.chunking.extraction_timeout,
            )
            .await
            .map_err(|error| anyhow::anyhow!(error.to_string()))?;

            let limit = max_pages.unwrap_or(pages.len());
            for page in pages.iter().take(limit) {
                if !page.text.trim().is_empty() {
                    println!("[page {}]\n{}", page.number, page.text);
                }
            }
            if pages.len() > limit {
                println!("... output truncated to first {limit} page(s)");
            }
        }
        Command::Serve { bind } => {
            let pipeline = Arc::new(build_pipeline(&cli.data_dir, config)?);
            let (shutdown, signal) = cancel_pair();
            let state = AppState {
                pipeline,
                default_model: model,
                runs: RunLock::default(),
                shutdown: signal,
            };

            let listener = tokio::net::TcpListener::bind(bind)
                .await
                .with_context(|| format!("binding {bind}"))?;
            info!(%bind, "serving analysis endpoint");

            axum::serve(listener, server::router(state))
                .with_graceful_shutdown(async move {
                    let _ = tokio::signal::ctrl_c().await;
                    shutdown.cancel();
                })
                .await
                .context("server error")?;
        }
    }

    Ok(())
}

fn build_pipeline(data_dir: &Path, config: PipelineConfig) -> anyhow::Result<AnalysisPipeline> {
    let gateway = AnthropicGateway::new(&config.gateway)
        .map_err(|error| anyhow::anyhow!(error.to_string()))?;
    let store = FsStore::new(data_dir);
    info!(data_dir = %store.root().display(), "using filesystem store");
    Ok(AnalysisPipeline::new(Arc::new(gateway), Arc::new(store), config))
}

fn print_event(event: &ProgressEvent) {
    if let Some(error) = &event.error {
        eprintln!("[{}/{}] error: {}", event.step, event.total, error);
        return;
    }
    if let Some(stats) = &event.extraction_stats {
        println!(
            "[{}/{}] extracted {} of {} fields, ~{} words",
            event.step, event.total, stats.fields_populated, stats.fields_total, stats.word_count
        );
    }
    if let Some(message) = &event.message {
        println!("[{}/{}] {}", event.step, event.total, message);
    }
    if event.done == Some(true) {
        println!(
            "score={} recommendation={}",
            event.final_score.unwrap_or_default(),
            event.final_recommendation.as_deref().unwrap_or_default()
        );
    }
}
