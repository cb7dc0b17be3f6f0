//! Pipeline server.
//!
//! ```text
//!     Client ──▶ compression ─▶ body ─▶ [logger] ─▶ upload ─▶ sanitize ─▶ headers ─▶ xss
//!                                                                                   │
//!     Client ◀── error handler ◀── routes ◀── cache ◀── static ◀── cors ◀── hpp ◀── rate limit
//! ```
//!
//! Startup connects the database before anything listens; SIGINT/SIGTERM or a
//! failed background task start an orderly shutdown.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use pipeline_server::config::{load_config, ObservabilityConfig};
use pipeline_server::lifecycle::{signals, startup, Lifecycle, Shutdown};
use pipeline_server::observability::logging;

#[derive(Parser)]
#[command(name = "pipeline-server")]
#[command(about = "JSON API server behind an ordered request pipeline", long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Dotenv file loaded before reading the environment.
    #[arg(long, default_value = "config/.env")]
    env_file: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref(), Some(cli.env_file.as_path())) {
        Ok(config) => config,
        Err(e) => {
            logging::init(&ObservabilityConfig::default());
            tracing::error!(error = %e, "Failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    logging::init(&config.observability);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %config.environment,
        "pipeline-server starting"
    );

    let lifecycle = Lifecycle::new();
    let shutdown = Shutdown::new();
    signals::spawn_signal_listener(shutdown.clone());

    match startup::run(&config, &lifecycle, &shutdown).await {
        Ok(reason) => {
            tracing::info!(
                reason = %reason,
                states = ?lifecycle.history(),
                "Exiting"
            );
            ExitCode::from(reason.exit_code())
        }
        Err(e) => {
            tracing::error!(error = %e, "Fatal startup error");
            ExitCode::FAILURE
        }
    }
}
