use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use agri_autonomy::{AgentConfig, AutonomyRuntime, SensorReading};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use shared_event_bus::FileEventPublisher;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "agri", version, about = "Autonomous farm decision agent")]
struct Cli {
    /// Agent configuration (TOML).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Knowledge document overriding the configured one.
    #[arg(long, global = true)]
    knowledge: Option<PathBuf>,
    /// Heuristic store overriding the configured one.
    #[arg(long, global = true)]
    heuristics: Option<PathBuf>,
    /// Append agent events to this JSON-lines file.
    #[arg(long, global = true)]
    event_log: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Starts the monitor and processes a file of JSON-lines readings.
    Run {
        /// Readings, one JSON object per line.
        #[arg(long)]
        readings: PathBuf,
        /// Monitor heartbeat override.
        #[arg(long)]
        heartbeat_secs: Option<u64>,
        /// Keep the monitor running until Ctrl-C.
        #[arg(long)]
        follow: bool,
    },
    /// Runs a single decision cycle.
    Decide {
        /// Reading as a JSON object.
        #[arg(long)]
        reading: String,
        /// Prediction label; the threshold model is used when absent.
        #[arg(long)]
        prediction: Option<String>,
    },
    /// Asks the agent a question.
    Ask {
        /// Free-text question.
        #[arg(required = true)]
        query: Vec<String>,
    },
    /// Prints the agent status and learned confidence.
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => AgentConfig::load(path)?,
        None => AgentConfig::default(),
    };
    config.apply_env()?;
    if let Some(path) = cli.knowledge.clone() {
        config.knowledge_path = path;
    }
    if let Some(path) = cli.heuristics.clone() {
        config.heuristics_path = path;
    }
    if let Commands::Run {
        heartbeat_secs: Some(secs),
        ..
    } = &cli.command
    {
        config.heartbeat_secs = *secs;
    }

    let mut builder = AutonomyRuntime::builder(config);
    if let Some(path) = &cli.event_log {
        let publisher = FileEventPublisher::new(path)
            .with_context(|| format!("opening event log {}", path.display()))?;
        builder = builder.event_publisher(Arc::new(publisher));
    }
    let runtime = builder.build()?;

    match cli.command {
        Commands::Run {
            readings, follow, ..
        } => handle_run(&runtime, readings, follow).await,
        Commands::Decide {
            reading,
            prediction,
        } => {
            let reading: SensorReading =
                serde_json::from_str(&reading).context("parsing --reading as a JSON object")?;
            let outcome = match prediction {
                Some(prediction) => runtime.decide_and_act(&prediction, &reading),
                None => runtime.process_reading(&reading),
            };
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            Ok(())
        }
        Commands::Ask { query } => {
            println!("{}", runtime.answer(&query.join(" ")));
            Ok(())
        }
        Commands::Status => {
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "status": runtime.runtime_status(),
                    "heuristics": runtime.heuristics().snapshot(),
                }))?
            );
            Ok(())
        }
    }
}

async fn handle_run(runtime: &AutonomyRuntime, readings: PathBuf, follow: bool) -> Result<()> {
    runtime.start_monitor();
    let file = File::open(&readings)
        .with_context(|| format!("opening readings {}", readings.display()))?;

    let mut processed = 0_usize;
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let reading: SensorReading = match serde_json::from_str(&line) {
            Ok(reading) => reading,
            Err(err) => {
                tracing::warn!(line = idx + 1, error = %err, "skipping malformed reading");
                continue;
            }
        };
        let outcome = runtime.process_reading(&reading);
        println!("{}", serde_json::to_string(&outcome)?);
        processed += 1;
        // Give the monitor a chance to run between cycles.
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tracing::info!(processed, "readings processed");

    if follow {
        tracing::info!("monitor running; press Ctrl-C to stop");
        let shutdown_token = runtime.shutdown_token();
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.context("waiting for Ctrl-C")?,
            () = shutdown_token.cancelled() => {},
        }
    }
    runtime.shutdown().await;
    println!("{}", serde_json::to_string_pretty(&runtime.runtime_status())?);
    Ok(())
}
