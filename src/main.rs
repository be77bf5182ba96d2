//! Wavecast - per-spot wave and wind forecast refresher
//!
//! Runs one refresh cycle and exits. Meant to be scheduled from cron:
//! 1. Checks whether today's forecasts were already published
//! 2. Checks that the upstream wave product covers enough days ahead
//! 3. Pulls the wave (and wind) grids and extracts every registered spot
//! 4. Writes one JSON file per spot, the update stamp, and the new state
//!
//! Usage:
//!   cargo run --release                               # Use ./wavecast.toml
//!   cargo run --release -- --config /etc/wavecast.toml
//!   cargo run --release -- --force                    # Ignore today's refresh
//!
//! Environment:
//!   DATABASE_URL - PostgreSQL connection string (postgres registry/state only)
//!   RUST_LOG     - overrides the configured log level

use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use wavecast_service::config::{ServiceConfig, DEFAULT_CONFIG_PATH};
use wavecast_service::logging;
use wavecast_service::refresh::CycleOutcome;

#[derive(Debug, Parser)]
#[command(name = "wavecast", version, about = "Refresh per-spot wave and wind forecasts")]
struct Args {
    /// Service configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Skip the already-refreshed-today check (coverage is still checked)
    #[arg(long)]
    force: bool,

    /// Log level or filter directives, overrides [logging] level
    #[arg(long)]
    log_level: Option<String>,
}

fn main() -> ExitCode {
    let args = Args::parse();

    println!("🌊 Wavecast forecast refresh");
    println!("============================\n");

    let config = match ServiceConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ {}", e);
            return ExitCode::FAILURE;
        }
    };

    let level = args.log_level.as_deref().unwrap_or(&config.logging.level);
    if let Err(e) = logging::init(level, config.logging.json) {
        eprintln!("❌ {}", e);
        return ExitCode::FAILURE;
    }

    println!("📋 Config: {}", args.config.display());
    println!("   Output:  {}", config.refresh.output_dir.display());
    println!("   Workers: {}\n", config.refresh.max_concurrency);

    let mut refresher = match config.build_refresher() {
        Ok(refresher) => refresher,
        Err(e) => {
            eprintln!("\n❌ Initialization failed: {}\n", e);
            return ExitCode::FAILURE;
        }
    };

    match refresher.run_cycle(Utc::now(), args.force) {
        Ok(CycleOutcome::Skipped(reason)) => {
            println!("⏭  Skipped: {}", reason);
            ExitCode::SUCCESS
        }
        Ok(CycleOutcome::Completed { date, report }) => {
            println!("✓ Refreshed {} spots for {}", report.written, date);
            if !report.failed.is_empty() {
                println!("   Kept previous forecast for: {}", report.failed.join(", "));
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("\n❌ Refresh failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
