//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Connect DB → Assemble pipeline → Bind → Listening
//!
//! Shutdown (shutdown.rs):
//!     Signal / supervised failure → Stop accepting → Drain → Terminated
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//!
//! Supervisor (supervisor.rs):
//!     Background task error or panic → Trigger fatal shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: database first, listeners last
//! - Every transition is validated against the state machine (state.rs)
//! - Shutdown has timeout: in-flight requests are cut off after the grace period

pub mod shutdown;
pub mod signals;
pub mod startup;
pub mod state;
pub mod supervisor;

pub use shutdown::{Shutdown, ShutdownListener, ShutdownReason};
pub use startup::StartupError;
pub use state::{Lifecycle, LifecycleError, LifecycleState};
pub use supervisor::Supervisor;
