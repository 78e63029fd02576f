use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

use candidate_eval::config::Config;
use candidate_eval::jobs::redis_store::RedisStore;
use candidate_eval::jobs::{job_status, submit_job};
use candidate_eval::rag::embedding::EMBEDDING_MODEL;
use candidate_eval::rag::index::{ingest_directory, write_snapshot};
use candidate_eval::state::{build_embedder, Services};
use candidate_eval::worker::{EvaluationPipeline, WorkerPool};

#[derive(Parser)]
#[command(name = "candidate-eval")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Asynchronous CV and project evaluation pipeline", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the evaluation worker pool until Ctrl+C or SIGTERM
    Worker,

    /// Embed reference documents and write the vector index snapshot
    Ingest {
        /// Directory holding job-descriptions/, case-study-briefs/ and scoring-rubrics/
        #[arg(long, default_value = "./data/documents")]
        dir: PathBuf,
    },

    /// Create an evaluation job and enqueue it
    Submit {
        #[arg(long)]
        job_title: String,

        /// CV document reference, relative to DOCUMENTS_DIR
        #[arg(long)]
        cv: String,

        /// Project report reference, relative to DOCUMENTS_DIR
        #[arg(long)]
        project: String,
    },

    /// Print a job's status as JSON
    Status { job_id: Uuid },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_CRATE_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Worker => run_worker(&config).await,
        Commands::Ingest { dir } => run_ingest(&config, &dir).await,
        Commands::Submit {
            job_title,
            cv,
            project,
        } => {
            let store = RedisStore::connect(&config.redis_url).await?;
            let id = submit_job(&store, &store, &job_title, &cv, &project).await?;
            println!("{id}");
            Ok(())
        }
        Commands::Status { job_id } => {
            let store = RedisStore::connect(&config.redis_url).await?;
            let Some(view) = job_status(&store, &store, job_id).await? else {
                bail!("Job {job_id} not found");
            };
            println!("{}", serde_json::to_string_pretty(&view)?);
            Ok(())
        }
    }
}

async fn run_worker(config: &Config) -> Result<()> {
    info!("Starting candidate-eval worker v{}", env!("CARGO_PKG_VERSION"));

    let store = Arc::new(RedisStore::connect(&config.redis_url).await?);
    let services = Services::from_config(config, store).await?;
    let worker_config = config.worker_config();
    info!(
        concurrency = worker_config.concurrency,
        rate_limit_max = worker_config.rate_limit_max,
        rate_limit_window_ms = worker_config.rate_limit_window.as_millis() as u64,
        max_attempts = worker_config.max_attempts,
        "worker configuration"
    );

    let pool = WorkerPool::new(EvaluationPipeline::new(services, worker_config));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let pool_task = tokio::spawn(pool.run(shutdown_rx));

    shutdown_signal().await?;
    info!("Shutting down: idle slots stop now, claimed jobs run to completion");
    shutdown_tx
        .send(true)
        .context("worker pool exited before shutdown")?;

    pool_task.await.context("worker pool task failed")?;
    Ok(())
}

async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("failed to install SIGTERM handler")?;
        tokio::select! {
            res = signal::ctrl_c() => res.context("failed to listen for Ctrl+C")?,
            _ = terminate.recv() => info!("Received SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;
    Ok(())
}

async fn run_ingest(config: &Config, dir: &Path) -> Result<()> {
    let embedder = build_embedder(config)?;
    let snapshot = ingest_directory(dir, &embedder, EMBEDDING_MODEL).await?;
    if snapshot.chunks.is_empty() {
        bail!("No .txt documents found under {}", dir.display());
    }

    write_snapshot(&snapshot, &config.vector_index_path).await?;
    info!(
        chunks = snapshot.chunks.len(),
        "vector index written to {}",
        config.vector_index_path.display()
    );
    Ok(())
}
