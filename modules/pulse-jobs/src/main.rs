use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pulse_common::{Config, JobType, PulseError, RunSummary};
use pulse_engine::{Engine, EngineSettings};
use pulse_store::PgStore;

#[derive(Parser)]
#[command(name = "pulse-jobs", about = "Scheduled trend, anomaly, alert and attribution runs")]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Recompute velocity and trending state for recently mentioned entities
    Trends,
    /// Flag statistical outliers against each entity's trailing baseline
    Anomalies,
    /// Match watchlists against trending and anomalous entities and raise alerts
    Match,
    /// Attribute pending donations to their touchpoints
    Attribute {
        /// Recompute these transactions even if already attributed
        #[arg(long, num_args = 1..)]
        force: Vec<String>,
    },
    /// Run every job in pipeline order
    All,
    /// Re-enable a job type disabled by repeated failures
    Reset {
        #[arg(value_parser = parse_job)]
        job: JobType,
    },
}

fn parse_job(s: &str) -> std::result::Result<JobType, String> {
    JobType::parse(s).ok_or_else(|| {
        format!("unknown job '{s}' (expected trends, anomalies, match or attribute)")
    })
}

fn init_tracing(json: bool) -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("pulse=info".parse()?);
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

/// A lease conflict means another scheduler tick is already doing the work.
fn report(job: JobType, outcome: pulse_common::Result<RunSummary>) -> Result<()> {
    match outcome {
        Ok(summary) => {
            println!("{summary}");
            Ok(())
        }
        Err(PulseError::LeaseConflict(_)) => {
            info!(job = %job, "Run already in progress elsewhere, nothing to do");
            Ok(())
        }
        Err(e) => Err(e).with_context(|| format!("{job} run failed")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.json)?;

    let config = Config::from_env()?;
    config.log_redacted();

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to Postgres")?;
    pulse_store::migrate(&pool).await?;

    let engine = Engine::new(
        Arc::new(PgStore::new(pool)),
        EngineSettings::from(&config),
    );

    match cli.command {
        Command::Trends => report(JobType::TrendAggregation, engine.run_trends().await),
        Command::Anomalies => report(JobType::AnomalyDetection, engine.run_anomalies().await),
        Command::Match => report(JobType::WatchlistMatching, engine.run_matcher().await),
        Command::Attribute { force } => {
            report(JobType::Attribution, engine.run_attribution(&force).await)
        }
        Command::All => {
            let mut failed = Vec::new();
            for (job, outcome) in engine.run_all().await {
                if let Err(e) = report(job, outcome) {
                    warn!(error = %e, "Job failed");
                    failed.push(job.to_string());
                }
            }
            if failed.is_empty() {
                Ok(())
            } else {
                anyhow::bail!("failed jobs: {}", failed.join(", "))
            }
        }
        Command::Reset { job } => {
            engine.reset(job).await?;
            println!("{job} re-enabled");
            Ok(())
        }
    }
}
