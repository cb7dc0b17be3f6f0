//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (counters, histograms)
//!     → request_log.rs (one line per request, development only)
//!
//! Consumers:
//!     → stdout
//!     → Metrics endpoint (Prometheus scrape, optional)
//! ```
//!
//! # Design Decisions
//! - Structured fields instead of formatted strings
//! - Request ID flows through every log line of a request
//! - Metrics are cheap (atomic increments); recording without an installed
//!   recorder is a no-op

pub mod logging;
pub mod metrics;
pub mod request_log;
