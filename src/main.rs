use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use wikigraph::config::SinkBackend;
use wikigraph::db::Db;
use wikigraph::error::WikigraphError;
use wikigraph::pipeline::{run_job, run_scheduled, JobPlan, JobReport, PipelineContext};
use wikigraph::sparql::SparqlClient;
use wikigraph::{logging, sink, Config};

#[derive(Parser, Debug)]
#[command(name = "wikigraph")]
#[command(about = "Crawl Wikidata persons and relationships into a graph store", version)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one job: every lane until it stops
    Run,
    /// Run a job now and then every `schedule.interval_hours`
    Schedule {
        /// Stop after this many jobs
        #[arg(long)]
        runs: Option<usize>,
    },
    /// Check the configuration and the graph store, then exit
    Verify,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load()?;
    logging::init(&config);
    log::info!("Starting Wikigraph v{}", env!("CARGO_PKG_VERSION"));

    match args.command.unwrap_or(Command::Verify) {
        Command::Run => run_once(&config).await,
        Command::Schedule { runs } => run_schedule(&config, runs).await,
        Command::Verify => run_verification(&config).await,
    }
}

async fn build_context(config: &Config) -> Result<PipelineContext> {
    let sink = sink::connect(config).await?;
    let source = Arc::new(SparqlClient::new(&config.source)?);
    log::info!("SPARQL endpoint: {}", source.endpoint());
    Ok(PipelineContext::new(config, source, sink))
}

fn check_report(report: &JobReport) -> Result<()> {
    if report.is_success() {
        return Ok(());
    }
    for lane in &report.lanes {
        if let Err(e) = &lane.result {
            log::error!("[{}] lane {} failed: {}", e.log_code(), lane.worker_id, e);
        }
    }
    anyhow::bail!(
        "job {} finished with failed lanes {:?}",
        report.run_id,
        report.failed_lanes()
    )
}

async fn run_once(config: &Config) -> Result<()> {
    let ctx = build_context(config).await?;
    let plan = JobPlan::from_config(config);
    let report = run_job(&ctx, &plan).await;
    log_counts(&ctx).await?;
    check_report(&report)
}

/// Jobs on the configured interval until Ctrl-C or `runs` jobs.
async fn run_schedule(config: &Config, runs: Option<usize>) -> Result<()> {
    let ctx = build_context(config).await?;
    let plan = JobPlan::from_config(config);
    let interval = Duration::from_secs(config.schedule.interval_hours * 3600);
    log::info!("Scheduling a job every {}h", config.schedule.interval_hours);

    tokio::select! {
        summary = run_scheduled(&ctx, &plan, interval, runs) => {
            log::info!("Scheduler finished: {} jobs, {} with failed lanes", summary.jobs, summary.failed_jobs);
        }
        _ = tokio::signal::ctrl_c() => {
            log::info!("Interrupted, stopping scheduler; merged pages are kept");
        }
    }
    log_counts(&ctx).await
}

async fn log_counts(ctx: &PipelineContext) -> Result<()> {
    let nodes = ctx.sink.node_count().await?;
    let edges = ctx.sink.edge_count().await?;
    log::info!("Graph store holds {} persons and {} relations", nodes, edges);
    Ok(())
}

/// Run configuration and store checks
async fn run_verification(config: &Config) -> Result<()> {
    log::info!("Configuration loaded successfully");
    log::info!("Job: {} (correlation {})", config.wikigraph.job_id, config.wikigraph.correlation_id);
    log::info!(
        "Lanes: {} x {} items, stride {:?}, relationship paging {:?}",
        config.workers.num_workers,
        config.workers.items_per_worker,
        config.workers.lane_stride,
        config.workers.relationship_paging
    );
    log::info!("SPARQL endpoint: {}", config.source.endpoint);

    let sink = sink::connect(config).await?;
    if config.sink.backend == SinkBackend::Sqlite {
        verify_sqlite_schema(&Db::new(&config.sink.sqlite_path)).await?;
    }
    let nodes = sink.node_count().await?;
    let edges = sink.edge_count().await?;
    log::info!("Graph store ready: {} persons, {} relations", nodes, edges);
    Ok(())
}

/// Verify that all expected SQLite objects exist
async fn verify_sqlite_schema(db: &Db) -> Result<()> {
    db.with_connection(|conn| {
        let mut stmt = conn.prepare("SELECT name FROM sqlite_master WHERE type IN ('table', 'index') ORDER BY name")?;
        let names: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;

        let expected = ["persons", "relations", "schema_migrations", "idx_relations_target", "idx_relations_type"];
        let missing: Vec<&str> = expected
            .iter()
            .copied()
            .filter(|name| !names.iter().any(|n| n == name))
            .collect();

        if !missing.is_empty() {
            return Err(WikigraphError::Config(format!("Missing schema objects: {}", missing.join(", "))));
        }
        for name in &expected {
            log::debug!("✓ {} exists", name);
        }
        Ok(())
    })
    .await?;

    log::info!("SQLite schema verified");
    Ok(())
}
