//! cogz-run: load a TOML model file and run it.
//!
//! One run prints its statistics and task results as JSON; several runs
//! print a [`BatchReport`](cogz_task::BatchReport).

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::Parser;
use cogz_core::trace::JsonLinesSink;
use cogz_task::{ModelFile, run_batch};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Run a cognitive model.
#[derive(Parser)]
#[command(name = "cogz-run")]
#[command(about = "Run a COGZ model file", long_about = None)]
#[command(version)]
struct Cli {
    /// Model file (TOML).
    model: PathBuf,

    /// Number of runs.
    #[arg(short, long, default_value_t = 1)]
    runs: usize,

    /// Seed of the first run; later runs count up from it.
    #[arg(short, long, env = "COGZ_SEED")]
    seed: Option<u64>,

    /// Simulated seconds to run; until idle when absent.
    #[arg(short, long)]
    duration: Option<f64>,

    /// Pace the run against the wall clock (single runs only).
    #[arg(long)]
    realtime: bool,

    /// Write the simulation trace as JSON lines to this file.
    #[arg(long)]
    trace_json: Option<PathBuf>,

    /// Log level.
    #[arg(long, env = "COGZ_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Enable JSON logging.
    #[arg(long, env = "COGZ_LOG_JSON")]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| cli.log_level.clone().into());
    if cli.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    let file = ModelFile::from_file(&cli.model)
        .with_context(|| format!("loading {}", cli.model.display()))?;

    if cli.runs > 1 {
        if cli.realtime || cli.trace_json.is_some() {
            bail!("--realtime and --trace-json apply to single runs only");
        }
        let base = cli.seed.unwrap_or(0);
        let report = run_batch(cli.runs, base, cli.duration, |seed| file.builder(Some(seed)).build())?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let mut builder = file.builder(cli.seed);
    if let Some(path) = &cli.trace_json {
        let out = File::create(path).with_context(|| format!("creating {}", path.display()))?;
        builder = builder.trace_sink(JsonLinesSink::new(BufWriter::new(out)));
    }
    let mut model = builder.build()?;
    for diagnostic in model.diagnostics() {
        eprintln!("{diagnostic}");
    }

    let outcome = match (cli.realtime, cli.duration) {
        (true, Some(seconds)) => model.run_realtime(seconds).await,
        (true, None) => bail!("--realtime needs --duration"),
        (false, Some(seconds)) => model.run(seconds),
        (false, None) => model.run_until_idle(),
    };
    let results = model.task().map(|t| t.results()).unwrap_or_default();
    let summary = serde_json::json!({
        "outcome": outcome,
        "time": model.time(),
        "stats": model.stats(),
        "results": results,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
