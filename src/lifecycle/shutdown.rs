//! Shutdown coordination for the server.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

/// Why the process is going down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGINT / SIGTERM.
    Signal,
    /// A supervised task failed; carries its description.
    Fatal(String),
}

impl ShutdownReason {
    pub fn exit_code(&self) -> u8 {
        match self {
            ShutdownReason::Signal => 0,
            ShutdownReason::Fatal(_) => 1,
        }
    }
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Signal => f.write_str("signal"),
            ShutdownReason::Fatal(cause) => write!(f, "fatal: {cause}"),
        }
    }
}

/// Coordinator for graceful shutdown.
///
/// Cloneable handle; every long-running task subscribes. The first trigger
/// wins and later reasons are ignored.
#[derive(Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<Option<ShutdownReason>>>,
}

impl Shutdown {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> ShutdownListener {
        ShutdownListener {
            rx: self.tx.subscribe(),
        }
    }

    /// Trigger the shutdown signal. Returns false if it was already triggered.
    pub fn trigger(&self, reason: ShutdownReason) -> bool {
        let mut first = false;
        self.tx.send_if_modified(|current| {
            if current.is_none() {
                tracing::info!(reason = %reason, "Shutdown triggered");
                *current = Some(reason);
                first = true;
            }
            first
        });
        first
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        self.tx.borrow().clone()
    }

    pub fn is_triggered(&self) -> bool {
        self.tx.borrow().is_some()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving half handed to tasks.
pub struct ShutdownListener {
    rx: watch::Receiver<Option<ShutdownReason>>,
}

impl ShutdownListener {
    /// Wait until shutdown is triggered and return the reason.
    pub async fn recv(&mut self) -> ShutdownReason {
        match self.rx.wait_for(Option::is_some).await {
            Ok(reason) => reason
                .clone()
                .unwrap_or_else(|| ShutdownReason::Fatal("shutdown reason missing".into())),
            // The coordinator is gone; nobody can ask us to keep running.
            Err(_) => ShutdownReason::Fatal("shutdown coordinator dropped".into()),
        }
    }
}
