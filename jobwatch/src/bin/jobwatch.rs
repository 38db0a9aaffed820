//! jobwatch command line
//!
//! Bootstraps the reconciliation engine against the local Slurm tools and
//! prints dashboard payloads as JSON.
//!
//! Usage:
//!   jobwatch [--config <FILE>] list [--since <RFC3339>] [--all]
//!   jobwatch show <ID> [--live]
//!   jobwatch stream <ID> stdout|stderr
//!   jobwatch watch [--interval-secs <N>]

use anyhow::{anyhow, bail, Context};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

use jobwatch::views::{stream_path, JobDetail, JobListing, JobRef, Stream};
use jobwatch::{JobwatchConfig, ReconciliationEngine, Sources};

#[derive(Parser, Debug)]
#[command(name = "jobwatch")]
#[command(version)]
#[command(about = "Reconciled view of Slurm jobs for the pipeline dashboard")]
struct Cli {
    /// Path to the configuration file (TOML format)
    #[arg(long, env = "JOBWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Scheduler user whose jobs are tracked
    #[arg(long, env = "JOBWATCH_USER")]
    user: Option<String>,

    /// Submission log to replay
    #[arg(long, env = "JOBWATCH_SUBMISSION_LOG")]
    submission_log: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Jobs changed since a point in time
    List {
        /// Lower bound (exclusive); defaults to the bootstrap lookback
        #[arg(long)]
        since: Option<DateTime<Utc>>,

        /// Include jobs whose name does not follow the pipeline conventions
        #[arg(long)]
        all: bool,
    },
    /// One job by id (`4711` or `4711_3`)
    Show {
        id: String,

        /// Query the accounting store and the controller for a fresh record
        #[arg(long)]
        live: bool,
    },
    /// Print a job's recorded output file
    Stream { id: String, stream: String },
    /// Refresh periodically and print each delta as one JSON line
    Watch {
        #[arg(long)]
        interval_secs: Option<u64>,
    },
}

impl Cli {
    fn load_config(&self) -> anyhow::Result<JobwatchConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let config = JobwatchConfig::load(path)?;
                info!("Loaded configuration from: {}", path.display());
                config
            }
            None => JobwatchConfig::default(),
        };
        if let Some(user) = &self.user {
            config.scheduler.user = Some(user.clone());
        }
        if let Some(path) = &self.submission_log {
            config.submission_log.path = path.clone();
        }
        Ok(config)
    }
}

fn print_json<T: Serialize>(payload: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(payload)?);
    Ok(())
}

async fn start_engine(config: &JobwatchConfig) -> anyhow::Result<ReconciliationEngine> {
    let sources = Sources::slurm(config)?;
    Ok(ReconciliationEngine::bootstrap(sources, config.engine.bootstrap_lookback()).await)
}

async fn watch(
    engine: &ReconciliationEngine,
    interval: Duration,
    classified_only: bool,
) -> anyhow::Result<()> {
    let mut since = engine.last_refresh().await;
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let outcome = engine.refresh().await;
                for report in outcome.reports.iter().filter(|r| !r.is_ok()) {
                    warn!("[Watch] {} unavailable: {}", report.source, report.error.as_deref().unwrap_or(""));
                }
                let listing = JobListing::from_delta(engine.changed_since(since).await, classified_only);
                since = listing.timestamp;
                if !listing.jobs.is_empty() {
                    println!("{}", serde_json::to_string(&listing)?);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("[Watch] Interrupted, stopping");
                return Ok(());
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("jobwatch=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let cli = Cli::parse();
    let config = cli.load_config()?;

    match cli.command {
        Commands::List { since, all } => {
            let engine = start_engine(&config).await?;
            engine.refresh().await;
            let since = since.unwrap_or_else(|| Utc::now() - config.engine.bootstrap_lookback());
            let classified_only = config.listing.classified_only && !all;
            print_json(&JobListing::from_delta(engine.changed_since(since).await, classified_only))?;
        }
        Commands::Show { id, live } => {
            let job_id = JobRef::parse(&id)?;
            let engine = start_engine(&config).await?;
            let job = if live {
                engine.inspect(&job_id).await
            } else {
                engine.get(&job_id).await
            };
            let job = job.ok_or_else(|| anyhow!("job {} not found", id))?;
            print_json(&JobDetail::new(job))?;
        }
        Commands::Stream { id, stream } => {
            let stream: Stream = stream.parse()?;
            let engine = start_engine(&config).await?;
            let job = JobRef::resolve(&engine, &id)
                .await
                .ok_or_else(|| anyhow!("job {} not found", id))?;
            let Some(path) = stream_path(&job, stream) else {
                bail!("job {} has no recorded {} path", id, stream);
            };
            let contents = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("cannot read {} of job {} at {}", stream, id, path))?;
            print!("{}", contents);
        }
        Commands::Watch { interval_secs } => {
            let interval = interval_secs
                .map(|secs| Duration::from_secs(secs.max(1)))
                .unwrap_or_else(|| config.engine.refresh_interval());
            let engine = start_engine(&config).await?;
            info!("[Watch] Refreshing every {:?}", interval);
            watch(&engine, interval, config.listing.classified_only).await?;
        }
    }

    Ok(())
}
