//! Process lifecycle state machine.
//!
//! ```text
//! Starting → ConnectingDb → Listening → ShuttingDown → Terminated
//!                 │                                        ▲
//!                 └────────────── (db failure) ────────────┘
//! ```

use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Starting,
    ConnectingDb,
    Listening,
    ShuttingDown,
    Terminated,
}

impl LifecycleState {
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Starting => "starting",
            LifecycleState::ConnectingDb => "connecting-db",
            LifecycleState::Listening => "listening",
            LifecycleState::ShuttingDown => "shutting-down",
            LifecycleState::Terminated => "terminated",
        }
    }

    fn can_become(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Starting, ConnectingDb)
                | (Starting, Terminated)
                | (ConnectingDb, Listening)
                | (ConnectingDb, Terminated)
                | (Listening, ShuttingDown)
                | (ShuttingDown, Terminated)
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("illegal lifecycle transition {from} -> {to}")]
pub struct LifecycleError {
    pub from: LifecycleState,
    pub to: LifecycleState,
}

#[derive(Debug, Clone, Copy)]
pub struct Transition {
    pub state: LifecycleState,
    pub at: Instant,
}

#[derive(Debug)]
struct Inner {
    history: Vec<Transition>,
    local_addr: Option<SocketAddr>,
}

/// Shared, cloneable view of the process state with its full history.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    inner: Arc<Mutex<Inner>>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                history: vec![Transition {
                    state: LifecycleState::Starting,
                    at: Instant::now(),
                }],
                local_addr: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn current(&self) -> LifecycleState {
        self.lock()
            .history
            .last()
            .map(|t| t.state)
            .unwrap_or(LifecycleState::Starting)
    }

    /// Move to `next`, rejecting transitions the state machine does not allow.
    pub fn transition(&self, next: LifecycleState) -> Result<(), LifecycleError> {
        let mut inner = self.lock();
        let from = inner
            .history
            .last()
            .map(|t| t.state)
            .unwrap_or(LifecycleState::Starting);

        if !from.can_become(next) {
            tracing::error!(from = %from, to = %next, "Illegal lifecycle transition");
            return Err(LifecycleError { from, to: next });
        }

        tracing::info!(from = %from, to = %next, "Lifecycle transition");
        inner.history.push(Transition {
            state: next,
            at: Instant::now(),
        });
        Ok(())
    }

    /// Transition to `Listening` on `addr`.
    pub fn mark_listening(&self, addr: SocketAddr) -> Result<(), LifecycleError> {
        self.transition(LifecycleState::Listening)?;
        self.lock().local_addr = Some(addr);
        Ok(())
    }

    /// Address the server is bound to, once listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.lock().local_addr
    }

    /// Every state visited so far, in order.
    pub fn history(&self) -> Vec<LifecycleState> {
        self.lock().history.iter().map(|t| t.state).collect()
    }

    pub fn has_reached(&self, state: LifecycleState) -> bool {
        self.lock().history.iter().any(|t| t.state == state)
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use LifecycleState::*;

    #[test]
    fn test_happy_path() {
        let lifecycle = Lifecycle::new();
        for next in [ConnectingDb, Listening, ShuttingDown, Terminated] {
            lifecycle.transition(next).unwrap();
        }
        assert_eq!(
            lifecycle.history(),
            vec![Starting, ConnectingDb, Listening, ShuttingDown, Terminated]
        );
    }

    #[test]
    fn test_db_failure_path() {
        let lifecycle = Lifecycle::new();
        lifecycle.transition(ConnectingDb).unwrap();
        lifecycle.transition(Terminated).unwrap();
        assert!(!lifecycle.has_reached(Listening));
    }

    #[test]
    fn test_cannot_listen_before_db() {
        let lifecycle = Lifecycle::new();
        assert_eq!(
            lifecycle.transition(Listening),
            Err(LifecycleError {
                from: Starting,
                to: Listening
            })
        );
        assert_eq!(lifecycle.current(), Starting);
    }

    #[test]
    fn test_mark_listening_records_addr() {
        let lifecycle = Lifecycle::new();
        let addr: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        assert!(lifecycle.mark_listening(addr).is_err());
        assert_eq!(lifecycle.local_addr(), None);

        lifecycle.transition(ConnectingDb).unwrap();
        lifecycle.mark_listening(addr).unwrap();
        assert_eq!(lifecycle.local_addr(), Some(addr));
    }

    #[test]
    fn test_terminated_is_final() {
        let lifecycle = Lifecycle::new();
        lifecycle.transition(Terminated).unwrap();
        assert!(lifecycle.transition(ConnectingDb).is_err());
    }
}
