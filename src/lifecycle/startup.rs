//! Startup orchestration.
//!
//! # Responsibilities
//! - Connect the database before anything listens
//! - Assemble the pipeline and start background sweepers
//! - Bind the listener and serve until shutdown
//! - Release the database and record the final state
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal and nothing is bound
//! - Subsystems initialize in order, not concurrently
//! - Listeners start last (traffic only when ready)

use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::net::TcpListener;

use super::shutdown::{Shutdown, ShutdownReason};
use super::state::{Lifecycle, LifecycleError, LifecycleState};
use super::supervisor::Supervisor;
use crate::config::AppConfig;
use crate::db::{Database, DbError};
use crate::http::HttpServer;
use crate::observability::metrics;
use crate::pipeline::{assemble, assembly::uploads_dir, PipelineError};
use crate::routes::AppState;

const MIN_SWEEP_PERIOD: Duration = Duration::from_secs(1);
const MAX_SWEEP_PERIOD: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Database(#[from] DbError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid pipeline: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("server error: {0}")]
    Serve(#[source] io::Error),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

/// Run the server to completion. Returns why it stopped.
pub async fn run(
    config: &AppConfig,
    lifecycle: &Lifecycle,
    shutdown: &Shutdown,
) -> Result<ShutdownReason, StartupError> {
    lifecycle.transition(LifecycleState::ConnectingDb)?;

    let db = match Database::connect(&config.database).await {
        Ok(db) => db,
        Err(e) => {
            tracing::error!(error = %e, "Database connection failed, not starting");
            let _ = lifecycle.transition(LifecycleState::Terminated);
            return Err(e.into());
        }
    };

    let result = serve(config, db.clone(), lifecycle, shutdown).await;

    db.close().await;
    let _ = lifecycle.transition(LifecycleState::Terminated);
    result
}

async fn serve(
    config: &AppConfig,
    db: Database,
    lifecycle: &Lifecycle,
    shutdown: &Shutdown,
) -> Result<ShutdownReason, StartupError> {
    let state = AppState {
        db,
        uploads_dir: uploads_dir(config),
    };
    let assembly = assemble(config, state, None)?;

    let bind_addr = config.server.bind_address();
    let listener = TcpListener::bind(&bind_addr)
        .await
        .map_err(|source| StartupError::Bind {
            addr: bind_addr.clone(),
            source,
        })?;
    let local_addr = listener.local_addr().map_err(|source| StartupError::Bind {
        addr: bind_addr,
        source,
    })?;

    lifecycle.mark_listening(local_addr)?;
    tracing::info!(
        "Server running in {} mode on http://{}",
        config.environment,
        local_addr
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let supervisor = Supervisor::new(shutdown.clone());
    if let Some(limiter) = assembly.rate_limiter.clone() {
        let period = limiter.window().clamp(MIN_SWEEP_PERIOD, MAX_SWEEP_PERIOD);
        supervisor.spawn_periodic("rate_limit_sweeper", period, move || {
            let removed = limiter.purge_expired(Instant::now());
            if removed > 0 {
                tracing::debug!(removed, "Purged expired rate-limit windows");
            }
            Ok::<(), Infallible>(())
        });
    }
    let cache = assembly.cache.clone();
    let period = cache.ttl().clamp(MIN_SWEEP_PERIOD, MAX_SWEEP_PERIOD);
    supervisor.spawn_periodic("cache_sweeper", period, move || {
        let removed = cache.purge_expired(Instant::now());
        if removed > 0 {
            tracing::debug!(removed, "Purged expired cache snapshots");
        }
        Ok::<(), Infallible>(())
    });

    let grace = Duration::from_secs(config.server.shutdown_grace_secs);
    let reason = HttpServer::new(assembly.pipeline, grace)
        .with_lifecycle(lifecycle.clone())
        .run(listener, shutdown)
        .await
        .map_err(StartupError::Serve)?;

    tracing::info!(reason = %reason, "Shutdown complete");
    Ok(reason)
}
