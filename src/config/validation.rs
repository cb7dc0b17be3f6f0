//! Configuration validation.
//!
//! Serde handles syntax; this module checks value ranges and cross-field
//! consistency. Every problem is reported, not just the first.

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::AppConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("server.port must be non-zero")]
    ZeroPort,

    #[error("server.host '{0}' is not a usable host name or address")]
    InvalidHost(String),

    #[error("database.url must not be empty")]
    EmptyDatabaseUrl,

    #[error("database.max_connections must be at least 1")]
    ZeroDatabaseConnections,

    #[error("rate_limit.window_ms must be greater than zero")]
    ZeroRateLimitWindow,

    #[error("rate_limit.max must be greater than zero")]
    ZeroRateLimitMax,

    #[error("cache.ttl_secs must be greater than zero")]
    ZeroCacheTtl,

    #[error("compression.level must be between 0 and 9, got {0}")]
    CompressionLevel(u32),

    #[error("body.json_limit_bytes must be greater than zero")]
    ZeroBodyLimit,

    #[error("cors.allow_origins must contain at least one entry")]
    EmptyCorsOrigins,

    #[error("observability.metrics_address '{0}' is not a valid socket address")]
    InvalidMetricsAddress(String),
}

/// Validate a loaded configuration.
pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.server.port == 0 {
        errors.push(ValidationError::ZeroPort);
    }
    // Names are resolved when binding; only reject what can never resolve.
    let host = config.server.host.trim();
    if host.is_empty() || host.contains(char::is_whitespace) || host.contains('/') {
        errors.push(ValidationError::InvalidHost(config.server.host.clone()));
    }

    if config.database.url.trim().is_empty() {
        errors.push(ValidationError::EmptyDatabaseUrl);
    }
    if config.database.max_connections == 0 {
        errors.push(ValidationError::ZeroDatabaseConnections);
    }

    if config.rate_limit.enabled {
        if config.rate_limit.window_ms == 0 {
            errors.push(ValidationError::ZeroRateLimitWindow);
        }
        if config.rate_limit.max == 0 {
            errors.push(ValidationError::ZeroRateLimitMax);
        }
    }

    if config.cache.ttl_secs == 0 {
        errors.push(ValidationError::ZeroCacheTtl);
    }
    if config.compression.level > 9 {
        errors.push(ValidationError::CompressionLevel(config.compression.level));
    }
    if config.body.json_limit_bytes == 0 {
        errors.push(ValidationError::ZeroBodyLimit);
    }
    if config.cors.allow_origins.is_empty() {
        errors.push(ValidationError::EmptyCorsOrigins);
    }

    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::InvalidMetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
