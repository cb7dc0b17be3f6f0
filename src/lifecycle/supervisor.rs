//! Supervised background tasks.
//!
//! A supervised task that returns an error or panics is an unhandled
//! asynchronous failure: it triggers a fatal shutdown.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;

use super::shutdown::{Shutdown, ShutdownReason};

#[derive(Clone)]
pub struct Supervisor {
    shutdown: Shutdown,
}

impl Supervisor {
    pub fn new(shutdown: Shutdown) -> Self {
        Self { shutdown }
    }

    /// Run `task` and watch its outcome.
    pub fn spawn<F, E>(&self, name: &'static str, task: F) -> JoinHandle<()>
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let shutdown = self.shutdown.clone();
        let inner = tokio::spawn(task);

        tokio::spawn(async move {
            match inner.await {
                Ok(Ok(())) => tracing::debug!(task = name, "Supervised task finished"),
                Ok(Err(e)) => {
                    tracing::error!(task = name, error = %e, "Supervised task failed");
                    shutdown.trigger(ShutdownReason::Fatal(format!("{name}: {e}")));
                }
                Err(e) if e.is_panic() => {
                    tracing::error!(task = name, "Supervised task panicked");
                    shutdown.trigger(ShutdownReason::Fatal(format!("{name}: panicked")));
                }
                Err(_) => tracing::debug!(task = name, "Supervised task cancelled"),
            }
        })
    }

    /// Run `job` every `period` until shutdown. The first run is one period in.
    pub fn spawn_periodic<F, E>(&self, name: &'static str, period: Duration, mut job: F) -> JoinHandle<()>
    where
        F: FnMut() -> Result<(), E> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let mut listener = self.shutdown.subscribe();
        self.spawn::<_, E>(name, async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = listener.recv() => return Ok(()),
                    _ = ticker.tick() => job()?,
                }
            }
        })
    }
}
