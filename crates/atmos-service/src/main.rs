//! atmosd - air-quality collector daemon.
//!
//! Run with: `cargo run -p atmos-service`

use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use atmos_core::{SimulatedSource, SimulationConfig};
use atmos_service::{AppState, Collector, Config, Maintainer, TracingAlertSink};
use atmos_store::{RetentionMaintainer, SampleQuery, Store};

/// atmosd - air-quality collector daemon.
#[derive(Parser, Debug)]
#[command(name = "atmosd")]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Sample store directory (overrides config).
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the collector in the foreground (default behavior).
    Run {
        /// Seed for the simulated sensor.
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Run one retention pass and exit.
    Enforce,

    /// Print stored samples as JSON lines.
    Query {
        /// Only samples at or after this RFC 3339 time.
        #[arg(long, value_parser = parse_time)]
        since: Option<OffsetDateTime>,

        /// Only samples at or before this RFC 3339 time.
        #[arg(long, value_parser = parse_time)]
        until: Option<OffsetDateTime>,

        /// Maximum number of samples.
        #[arg(short, long)]
        limit: Option<usize>,

        /// Print summary statistics instead of samples.
        #[arg(long)]
        stats: bool,
    },

    /// Show storage usage.
    Usage,

    /// Validate the configuration and exit.
    CheckConfig,
}

fn parse_time(s: &str) -> Result<OffsetDateTime, String> {
    OffsetDateTime::parse(s, &Rfc3339).map_err(|e| format!("invalid RFC 3339 time '{s}': {e}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("atmos_service=info".parse()?)
                .add_directive("atmos_store=info".parse()?)
                .add_directive("atmos_core=info".parse()?),
        )
        .init();

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };
    if let Some(dir) = args.data_dir {
        config.storage.path = dir;
    }

    match args.command.unwrap_or(Command::Run { seed: None }) {
        Command::Run { seed } => {
            config.validate()?;
            run(config, seed).await
        }
        Command::Enforce => {
            config.validate()?;
            enforce(&config)
        }
        Command::Query {
            since,
            until,
            limit,
            stats,
        } => query(&config, since, until, limit, stats),
        Command::Usage => usage(&config),
        Command::CheckConfig => {
            config.validate()?;
            println!("Configuration is valid");
            Ok(())
        }
    }
}

async fn run(config: Config, seed: Option<u64>) -> anyhow::Result<()> {
    info!(
        "Polling every {}s, storing in {} (UTC{:+} min)",
        config.sampling.poll_interval_secs,
        config.storage.path.display(),
        config.storage.utc_offset_minutes
    );

    let store = Store::open(&config.storage.path, config.storage.store_options())
        .context("failed to open the sample store")?;
    for recovered in store.recovered() {
        warn!(
            "Recovered {}: discarded {} bytes of incomplete data",
            recovered.path.display(),
            recovered.discarded_bytes()
        );
    }

    let simulation = SimulationConfig {
        seed: seed.unwrap_or_else(|| SimulationConfig::default().seed),
        ..Default::default()
    };
    let source = Arc::new(SimulatedSource::new(simulation));

    let grace = config.shutdown.grace();
    let state = AppState::new(config);
    let collector = Collector::new(Arc::clone(&state), source, store)?
        .with_sink(Arc::new(TracingAlertSink));
    let maintainer = Maintainer::new(Arc::clone(&state));

    let cancel = CancellationToken::new();
    let collector_task = tokio::spawn(collector.run(cancel.clone()));
    let maintainer_task = tokio::spawn(maintainer.run(cancel.clone()));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("Shutting down");
    cancel.cancel();

    let shutdown = async {
        let (collector, maintainer) = tokio::join!(collector_task, maintainer_task);
        collector?;
        maintainer
    };
    match tokio::time::timeout(grace, shutdown).await {
        Ok(result) => result.context("background task panicked")?,
        Err(_) => warn!("Tasks did not stop within {:?}, exiting anyway", grace),
    }

    let stats = state.collector.snapshot();
    info!(
        "Stored {} samples ({} read failures, {} append failures)",
        stats.appended, stats.read_failures, stats.append_failures
    );
    Ok(())
}

fn enforce(config: &Config) -> anyhow::Result<()> {
    let maintainer =
        RetentionMaintainer::new(&config.storage.path, config.storage.utc_offset());
    let summary = maintainer.enforce(&config.retention.policy(), maintainer.today())?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn query(
    config: &Config,
    since: Option<OffsetDateTime>,
    until: Option<OffsetDateTime>,
    limit: Option<usize>,
    stats: bool,
) -> anyhow::Result<()> {
    let reader = atmos_store::StoreReader::new(&config.storage.path, config.storage.utc_offset());

    let mut query = SampleQuery::new();
    if let Some(since) = since {
        query = query.since(since);
    }
    if let Some(until) = until {
        query = query.until(until);
    }
    if let Some(limit) = limit {
        query = query.limit(limit);
    }

    if stats {
        let summary = reader.stats(&query)?.summary();
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    let stdout = std::io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    for sample in reader.query(&query)? {
        serde_json::to_writer(&mut out, &sample?)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

fn usage(config: &Config) -> anyhow::Result<()> {
    let reader = atmos_store::StoreReader::new(&config.storage.path, config.storage.utc_offset());
    let usage = reader.usage()?;
    println!("{}", serde_json::to_string_pretty(&usage)?);
    Ok(())
}
