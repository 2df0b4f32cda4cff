use anyhow::{Context, Result};
use clap::Parser;
use lotto_simulator::{load_script, Config, Simulator};
use std::io::Write;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the YAML configuration (defaults apply when omitted).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to the YAML script of timestamped requests.
    #[arg(short, long)]
    script: PathBuf,

    /// Seed for quick picks.
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Emit logs as JSON.
    #[arg(long, default_value_t = false)]
    json_logs: bool,

    /// Validate the configuration and script, then exit.
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

fn init_tracing(level: tracing::Level, json: bool) {
    let builder = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    let config = config.validate().context("invalid configuration")?;
    init_tracing(config.log_level, args.json_logs);

    let steps = load_script(&args.script)?;
    info!(
        steps = steps.len(),
        lock_window_ms = config.clock.lock_window_ms(),
        ticket_cost = config.ticket_cost,
        "script loaded"
    );
    if args.dry_run {
        return Ok(());
    }

    let mut simulator = Simulator::new(&config, args.seed);
    let outcomes = simulator.replay(steps).await;

    let mut stdout = std::io::stdout().lock();
    for outcome in &outcomes {
        let line = serde_json::to_string(outcome).context("failed to encode response")?;
        writeln!(stdout, "{line}").context("failed to write response")?;
    }
    info!(responses = outcomes.len(), "replay finished");
    Ok(())
}
