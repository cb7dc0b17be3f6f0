//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config/.env (optional)
//!     → loader.rs (dotenv, TOML file, env overrides)
//!     → validation.rs (semantic checks)
//!     → AppConfig (validated, immutable)
//!     → shared by reference into startup and pipeline assembly
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Environment variables override file values

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AppConfig, BodyConfig, CacheConfig, CompressionConfig, CorsConfig, DatabaseConfig,
    Environment, ObservabilityConfig, ParamPollutionConfig, RateLimitConfig, SanitizeConfig,
    ServerConfig,
};
