//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Parsed request:
//!     → sanitize.rs (drop operator-injection keys)
//!     → headers.rs (stage hardening response headers)
//!     → xss.rs (strip markup from values)
//!     → rate_limit.rs (fixed window per client IP)
//!     → param_pollution.rs (collapse repeated query keys)
//!     → cors.rs (answer preflight, stage allow-origin)
//! ```
//!
//! # Design Decisions
//! - Each concern is its own stage so the pipeline can enforce their order
//! - Rejections are `ApiError`s; the error handler shapes the response
//! - Limiter state is shared and swept by a background task

pub mod cors;
pub mod headers;
pub mod param_pollution;
pub mod rate_limit;
pub mod sanitize;
pub mod xss;

pub use cors::CorsStage;
pub use headers::SecurityHeadersStage;
pub use param_pollution::{ParamPollutionStage, PollutedQuery};
pub use rate_limit::{RateLimitDecision, RateLimitStage, RateLimiterState};
pub use sanitize::SanitizeStage;
pub use xss::XssStage;
