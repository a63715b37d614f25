//! huginn: operator tool for the response router.
//!
//! Prints the resolved configuration, or replays a JSON-lines request log
//! through a fresh router to see how it would have been routed.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use huginn::{GenerationRequest, HuginnError, Outcome, RouteMode, Router, RouterConfig};

/// Huginn response router tool
#[derive(Parser)]
#[command(name = "huginn")]
#[command(version)]
#[command(about = "Inspect configuration and replay request logs through the huginn router")]
struct Args {
    /// Path to configuration file.
    #[arg(short, long, global = true, env = "HUGINN_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the resolved configuration as TOML
    Config,

    /// Route every request in a JSON-lines log
    Replay {
        /// Log file, one request per line
        file: PathBuf,
    },
}

/// One line of a replay log.
#[derive(Deserialize)]
struct LogLine {
    namespace: String,
    user: String,
    parameters: Value,
    #[serde(default)]
    latency_ms: f64,
    #[serde(default)]
    payload: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = RouterConfig::load(args.config.as_deref())?;

    match args.command {
        Command::Config => print!("{}", config.to_toml()?),
        Command::Replay { file } => replay(config, &file)?,
    }
    Ok(())
}

fn replay(config: RouterConfig, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let router = Router::new(config)?;
    let reader = BufReader::new(File::open(path).map_err(|e| {
        HuginnError::Configuration(format!("Failed to open replay log {path:?}: {e}"))
    })?);

    let mut routed = 0usize;
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let entry: LogLine = match serde_json::from_str(&line) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(line = index + 1, error = %e, "skipping malformed log line");
                continue;
            }
        };

        let request = GenerationRequest::new(entry.namespace, entry.parameters);
        let decision = router.route(&request, &entry.user);
        if decision.mode != RouteMode::CachedReplay {
            let payload = entry.payload.unwrap_or_default().into_bytes();
            let latency = Duration::try_from_secs_f64(entry.latency_ms / 1000.0).unwrap_or_default();
            router.record_outcome(&entry.user, &decision, Outcome::new(payload), latency);
        }
        routed += 1;

        println!(
            "{}",
            json!({
                "line": index + 1,
                "user": entry.user,
                "mode": decision.mode,
                "source": decision.source,
                "key": decision.key,
            })
        );
    }

    let trends = router.sample_trends();
    info!(routed, "replay finished");
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "stats": router.stats(),
            "trends": trends,
        }))?
    );
    Ok(())
}
