//! # Notice Jobs CLI (`notice-jobs`)
//!
//! Runs one ingestion job per invocation.
//!
//! ## Usage
//!
//! ```bash
//! notice-jobs --job <JOB> [--config ./config/notices.toml] [--deadline-secs N]
//! ```
//!
//! ## Jobs
//!
//! | Job | Description |
//! |-----|-------------|
//! | `migrate` | Create the SQLite database and schema |
//! | `sync-agencies` | Upsert the registry's agency directory |
//! | `scrape` | Capture raw payloads for the configured time window |
//! | `canonicalize` | Link every unlinked raw payload to a canonical document |
//! | `enrich` | Count (or, with a provider, write) AI analysis |
//! | `materialize` | Project changed documents into feed entries |
//! | `pipeline` | All of the above except `migrate`, in order |
//!
//! Logs go to stderr (`RUST_LOG` controls verbosity); summary lines go to
//! stdout. Ctrl-C cancels the job at the next batch boundary.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use notice_pipeline::config::{self, Config};
use notice_pipeline::context::JobContext;
use notice_pipeline::error::PipelineError;
use notice_pipeline::jobs::Jobs;

#[derive(Parser)]
#[command(
    name = "notice-jobs",
    about = "Batch jobs for the government notice ingestion pipeline",
    version
)]
struct Cli {
    /// Job to run.
    #[arg(long, value_enum)]
    job: Job,

    /// Path to configuration file (TOML).
    #[arg(long, default_value = "./config/notices.toml")]
    config: PathBuf,

    /// Overall time budget in seconds; overrides `pipeline.deadline_secs`.
    /// Zero disables the deadline.
    #[arg(long)]
    deadline_secs: Option<u64>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Job {
    Migrate,
    SyncAgencies,
    Scrape,
    Canonicalize,
    Enrich,
    Materialize,
    Pipeline,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn job_context(cfg: &Config, deadline_override: Option<u64>) -> JobContext {
    let ctx = JobContext::new();
    match deadline_override.unwrap_or(cfg.pipeline.deadline_secs) {
        0 => ctx,
        secs => ctx.with_deadline(Duration::from_secs(secs)),
    }
}

async fn run_job(jobs: &Jobs, job: Job, ctx: &JobContext) -> anyhow::Result<()> {
    match job {
        Job::Migrate => {
            jobs.migrate().await?;
            println!("migrate completed");
        }
        Job::SyncAgencies => println!("{}", jobs.sync_agencies(ctx).await?.summary_line()),
        Job::Scrape => println!("{}", jobs.scrape_raw(ctx).await?.summary_line()),
        Job::Canonicalize => println!("{}", jobs.canonicalize(ctx).await?.summary_line()),
        Job::Enrich => println!("{}", jobs.enrich(ctx).await?.summary_line()),
        Job::Materialize => println!("{}", jobs.materialize(ctx).await?.summary_line()),
        Job::Pipeline => {
            let report = jobs.pipeline(ctx).await?;
            for stage in &report.stages {
                println!("{}", stage.summary_line());
            }
            println!("pipeline completed");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let cfg = config::load_config(&cli.config)?;

    let ctx = job_context(&cfg, cli.deadline_secs);
    let token = ctx.token().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; cancelling after the current batch");
            token.cancel();
        }
    });

    let jobs = Jobs::from_config(&cfg).await?;
    let result = run_job(&jobs, cli.job, &ctx).await;
    jobs.close().await;

    if let Err(e) = &result {
        if e.downcast_ref::<PipelineError>().is_some_and(|p| p.is_interrupted()) {
            warn!("job interrupted; committed batches are kept and a re-run resumes");
        }
    }
    result
}
