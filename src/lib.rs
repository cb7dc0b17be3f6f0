//! Express-style JSON API server: an ordered, typed request pipeline in front
//! of SQLite-backed auth and user routes.

pub mod config;
pub mod db;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod pipeline;
pub mod routes;
pub mod security;

pub use config::AppConfig;
pub use error::{ApiError, ApiResult};
pub use http::HttpServer;
pub use lifecycle::{Lifecycle, Shutdown};
pub use pipeline::{Pipeline, Stage, StageKind};
