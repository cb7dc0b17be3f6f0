//! HTTP server setup.
//!
//! # Responsibilities
//! - Wrap the pipeline in an Axum router (every path goes to the pipeline)
//! - Bind to a listener with peer-address connect info
//! - Stop accepting on shutdown, drain in-flight requests within the grace
//!   period, then cut the rest off

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Request, State},
    response::Response,
    Router,
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::lifecycle::{Lifecycle, LifecycleState, Shutdown, ShutdownReason};
use crate::pipeline::Pipeline;

/// HTTP front end for the pipeline.
pub struct HttpServer {
    pipeline: Arc<Pipeline>,
    grace: Duration,
    lifecycle: Option<Lifecycle>,
}

impl HttpServer {
    pub fn new(pipeline: Arc<Pipeline>, grace: Duration) -> Self {
        Self {
            pipeline,
            grace,
            lifecycle: None,
        }
    }

    /// Record the shutting-down transition on this lifecycle.
    pub fn with_lifecycle(mut self, lifecycle: Lifecycle) -> Self {
        self.lifecycle = Some(lifecycle);
        self
    }

    pub fn router(&self) -> Router {
        Router::new()
            .fallback(dispatch)
            .with_state(self.pipeline.clone())
            .layer(TraceLayer::new_for_http())
    }

    /// Serve until `shutdown` fires, then drain.
    pub async fn run(self, listener: TcpListener, shutdown: &Shutdown) -> io::Result<ShutdownReason> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();
        let (drain_tx, drain_rx) = tokio::sync::oneshot::channel::<()>();

        let mut server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = drain_rx.await;
                })
                .await
        });

        let mut stop = shutdown.subscribe();
        let reason = tokio::select! {
            reason = stop.recv() => reason,
            finished = &mut server => {
                let cause = match finished {
                    Ok(Ok(())) => "server exited unexpectedly".to_string(),
                    Ok(Err(e)) => e.to_string(),
                    Err(e) => e.to_string(),
                };
                tracing::error!(error = %cause, "HTTP server stopped on its own");
                shutdown.trigger(ShutdownReason::Fatal(cause.clone()));
                if let Some(lifecycle) = &self.lifecycle {
                    let _ = lifecycle.transition(LifecycleState::ShuttingDown);
                }
                return Err(io::Error::other(cause));
            }
        };

        if let Some(lifecycle) = &self.lifecycle {
            let _ = lifecycle.transition(LifecycleState::ShuttingDown);
        }
        tracing::info!(
            reason = %reason,
            grace_secs = self.grace.as_secs(),
            "Stopped accepting connections, draining"
        );
        let _ = drain_tx.send(());

        match tokio::time::timeout(self.grace, &mut server).await {
            Ok(Ok(Ok(()))) => tracing::info!("HTTP server stopped"),
            Ok(Ok(Err(e))) => return Err(e),
            Ok(Err(e)) => return Err(io::Error::other(e)),
            Err(_) => {
                tracing::warn!(
                    grace_secs = self.grace.as_secs(),
                    "Grace period elapsed, cutting off in-flight requests"
                );
                server.abort();
            }
        }
        Ok(reason)
    }
}

async fn dispatch(State(pipeline): State<Arc<Pipeline>>, request: Request) -> Response {
    pipeline.handle(request).await
}
