// =============================================================================
// sentry-feed — market-data trust and decision engine
// =============================================================================
//
// Two run modes share one pipeline: `historical` replays a captured CSV
// dataset end to end and exits; `realtime` subscribes to the live combined
// WebSocket stream and runs until interrupted. Both write the same
// state-transition/decision/summary artifacts under `<output_root>/<mode>/`.
// =============================================================================

mod adapters;
mod config;
mod engine;
mod output;
mod runner;
mod types;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use crate::config::EngineConfig;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RunMode {
    Historical,
    Realtime,
}

/// Binance-futures market-data trust and decision engine.
#[derive(Debug, Parser)]
#[command(name = "sentry-feed", version)]
struct Cli {
    /// Which event source to run against.
    #[arg(value_enum)]
    mode: RunMode,

    /// Directory containing base.yaml and an optional experiment.yaml.
    #[arg(long, env = "SENTRY_FEED_CONFIG_DIR", default_value = "./config")]
    config_dir: PathBuf,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    let config = match EngineConfig::load(&cli.config_dir) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, config_dir = %cli.config_dir.display(), "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.mode {
        RunMode::Historical => runner::run_historical(&config).await,
        RunMode::Realtime => runner::run_realtime(&config).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "run failed");
            ExitCode::FAILURE
        }
    }
}
