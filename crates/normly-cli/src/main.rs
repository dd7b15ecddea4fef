use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use normly_adapters::{analyze_ideas, extract_asset_urls, to_csv_export_url};
use normly_storage::HttpFetcher;
use normly_sync::{
    orchestrator_from_config, run_sync_once_from_env, GenerationClient, GenerationOutput,
    SyncConfig, SyncOutcome, TASKS_SOURCE_ID,
};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "normly")]
#[command(about = "Normalize spreadsheet exports and webhook payloads")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Sync one source now and print its records as JSON.
    Sync {
        #[arg(long, default_value = TASKS_SOURCE_ID)]
        source: String,
        /// Sheet link to use instead of the configured one.
        #[arg(long)]
        url: Option<String>,
    },
    /// Poll every enabled source until interrupted.
    Watch,
    /// Print the CSV export form of a sheet link.
    CsvUrl { url: String },
    /// Extract ideas from a captured webhook body.
    Ideas { file: PathBuf },
    /// Extract asset URLs from a captured webhook body.
    Assets { file: PathBuf },
    /// Post a JSON payload to the ideas webhook.
    GenerateIdeas { payload: PathBuf },
}

fn read_body(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Sync { source, url } => {
            let (outcome, snapshot) = run_sync_once_from_env(&source, url.as_deref()).await?;
            if let SyncOutcome::Failed(failure) = &outcome {
                eprintln!("{}", failure.user_message());
            }
            println!("{}", serde_json::to_string_pretty(&*snapshot)?);
            info!(?outcome, source = %source, "sync finished");
        }
        Commands::Watch => {
            let config = SyncConfig::from_env();
            let orchestrator = Arc::new(orchestrator_from_config(&config).await?);
            for source_id in orchestrator.enabled_source_ids() {
                let outcome = orchestrator.poll(&source_id).await?;
                info!(source_id = %source_id, ?outcome, "initial sync");
            }
            let mut sched = orchestrator.start_polling(config.poll_interval).await?;
            info!(interval = ?config.poll_interval, "polling; press Ctrl-C to stop");
            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
            sched.shutdown().await.context("stopping scheduler")?;
        }
        Commands::CsvUrl { url } => match to_csv_export_url(&url) {
            Some(csv) => println!("{csv}"),
            None => bail!("empty sheet url"),
        },
        Commands::Ideas { file } => {
            let analysis = analyze_ideas(&read_body(&file)?);
            info!(route = ?analysis.route, count = analysis.ideas.len(), "ideas extracted");
            println!("{}", serde_json::to_string_pretty(&analysis.ideas)?);
        }
        Commands::Assets { file } => {
            let urls = extract_asset_urls(&read_body(&file)?);
            println!("{}", serde_json::to_string_pretty(&urls)?);
        }
        Commands::GenerateIdeas { payload } => {
            let config = SyncConfig::from_env();
            let request: serde_json::Value = serde_json::from_str(&read_body(&payload)?)
                .with_context(|| format!("parsing {}", payload.display()))?;
            let fetcher = Arc::new(HttpFetcher::new(config.http_client_config())?);
            let client = GenerationClient::new(fetcher, config.webhooks.clone());
            match client.generate_ideas(request).await {
                Ok(report) => {
                    info!(request_id = %report.request_id, "ideas generated");
                    if let GenerationOutput::Ideas(ideas) = &report.output {
                        println!("{}", serde_json::to_string_pretty(ideas)?);
                    }
                }
                Err(failure) => {
                    warn!(error = %failure, "generation failed");
                    eprintln!("{}", failure.user_message());
                    if let Some(raw) = failure.raw_response() {
                        eprintln!("--- raw response ---\n{raw}");
                    }
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}
