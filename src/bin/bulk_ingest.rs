use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use serde_json::Map;

use ragline::config::PipelineConfig;
use ragline::embedding::HttpEmbeddingClient;
use ragline::logging;
use ragline::object_store::S3ObjectStore;
use ragline::pipeline::{IngestionService, IngestionStatus};
use ragline::store::BackendRegistry;

#[derive(Parser)]
#[command(
    name = "bulk-ingest",
    about = "Ingest a batch of objects through the document pipeline"
)]
struct Cli {
    /// Bucket holding the source objects.
    #[arg(long)]
    bucket: String,
    /// Object keys to ingest.
    keys: Vec<String>,
    /// File with one object key per line, merged with the positional keys.
    #[arg(long)]
    manifest: Option<PathBuf>,
    /// Poll each ingestion to a terminal state before moving on.
    #[arg(long)]
    wait: bool,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    logging::init_tracing();
    let cli = Cli::parse();

    let mut keys = cli.keys.clone();
    if let Some(manifest) = &cli.manifest {
        let content = std::fs::read_to_string(manifest)
            .with_context(|| format!("failed to read manifest at {}", manifest.display()))?;
        keys.extend(
            content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(ToString::to_string),
        );
    }
    if keys.is_empty() {
        bail!("no object keys given; pass keys as arguments or use --manifest");
    }

    let config = PipelineConfig::load().context("failed to load pipeline configuration")?;
    let registry = BackendRegistry::with_defaults();
    let objects = Arc::new(
        S3ObjectStore::from_env(&config.region, &config.object_store)
            .context("failed to build object store client")?,
    );
    let embedding_client = Box::new(HttpEmbeddingClient::from_settings(&config.embedding));
    let service = IngestionService::from_config(&config, &registry, objects, embedding_client)
        .context("failed to assemble ingestion pipeline")?;
    service
        .ensure_backend_ready()
        .await
        .context("backend provisioning failed")?;

    let total = keys.len();
    let mut failures = 0usize;
    for key in &keys {
        match ingest_one(&service, &cli.bucket, key, cli.wait).await {
            Ok(status) => {
                println!("{key}: {}", status_label(status));
                if status == IngestionStatus::Failed {
                    failures += 1;
                }
            }
            Err(error) => {
                eprintln!("{key}: {error:#}");
                failures += 1;
            }
        }
    }

    println!("Ingested {}/{total} documents", total - failures);
    if failures > 0 {
        bail!("{failures} of {total} documents failed");
    }
    Ok(())
}

async fn ingest_one(
    service: &IngestionService,
    bucket: &str,
    key: &str,
    wait: bool,
) -> Result<IngestionStatus> {
    let receipt = service.ingest_document(bucket, key, Map::new()).await?;
    if !wait || receipt.status.is_terminal() {
        return Ok(receipt.status);
    }
    let report = service.wait_for_completion(&receipt.ingestion_id).await?;
    Ok(report.status)
}

fn status_label(status: IngestionStatus) -> &'static str {
    match status {
        IngestionStatus::IngestionStarted => "ingestion_started",
        IngestionStatus::Completed => "completed",
        IngestionStatus::Failed => "failed",
        IngestionStatus::TimedOut => "timed_out",
    }
}
