//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Root configuration for the pipeline server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Active environment mode (`development`, `production`, ...).
    pub environment: Environment,

    /// Listener and process settings.
    pub server: ServerConfig,

    /// Database connection settings.
    pub database: DatabaseConfig,

    /// Body parsing limits.
    pub body: BodyConfig,

    /// Rate limiting configuration.
    pub rate_limit: RateLimitConfig,

    /// Response cache configuration.
    pub cache: CacheConfig,

    /// Cross-origin resource sharing.
    pub cors: CorsConfig,

    /// Response compression.
    pub compression: CompressionConfig,

    /// Operator-injection sanitization.
    pub sanitize: SanitizeConfig,

    /// Query parameter pollution guard.
    pub param_pollution: ParamPollutionConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Environment mode the process runs in.
///
/// Anything that is not one of the known names is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(from = "String", into = "String")]
pub enum Environment {
    Development,
    #[default]
    Production,
    Test,
    Other(String),
}

impl Environment {
    pub fn is_development(&self) -> bool {
        matches!(self, Environment::Development)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
            Environment::Test => "test",
            Environment::Other(name) => name,
        }
    }
}

impl From<String> for Environment {
    fn from(value: String) -> Self {
        match value.trim() {
            "development" => Environment::Development,
            "production" => Environment::Production,
            "test" => Environment::Test,
            other => Environment::Other(other.to_string()),
        }
    }
}

impl From<Environment> for String {
    fn from(value: Environment) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to bind (e.g., "0.0.0.0").
    pub host: String,

    /// Listening port.
    pub port: u16,

    /// Directory served verbatim at the URL root.
    pub static_root: String,

    /// How long in-flight requests may drain after shutdown starts.
    pub shutdown_grace_secs: u64,
}

impl ServerConfig {
    /// `host:port`, with IPv6 literals bracketed.
    pub fn bind_address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            static_root: "public".to_string(),
            shutdown_grace_secs: 10,
        }
    }
}

/// Database connection configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLx connection URL (e.g., "sqlite:data/app.db?mode=rwc").
    pub url: String,

    /// Maximum pooled connections. Forced to 1 for in-memory databases.
    pub max_connections: u32,

    /// Timeout for establishing the first connection.
    pub connect_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:app.db?mode=rwc".to_string(),
            max_connections: 5,
            connect_timeout_secs: 5,
        }
    }
}

/// Body parsing limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BodyConfig {
    /// Largest accepted JSON body.
    pub json_limit_bytes: usize,

    /// Largest accepted uploaded file.
    pub upload_limit_bytes: usize,
}

impl Default for BodyConfig {
    fn default() -> Self {
        Self {
            json_limit_bytes: 100 * 1024,
            upload_limit_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Window length in milliseconds.
    pub window_ms: u64,

    /// Requests allowed per window per client.
    pub max: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_ms: 10 * 60 * 1000,
            max: 100,
        }
    }
}

/// Response cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Time-to-live for cached responses.
    pub ttl_secs: u64,

    /// Snapshot capacity; new snapshots are skipped when full.
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 300,
            max_entries: 1024,
        }
    }
}

/// CORS configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Allowed origins. `"*"` allows any origin.
    pub allow_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allow_origins: vec!["*".to_string()],
        }
    }
}

/// Compression configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Bodies smaller than this are sent as-is.
    pub threshold_bytes: usize,

    /// flate2 compression level (0-9).
    pub level: u32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            threshold_bytes: 1024,
            level: 6,
        }
    }
}

/// Sanitization configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct SanitizeConfig {
    /// Replace `$` and `.` in offending keys instead of dropping the key.
    pub replace_with: Option<String>,
}

/// Parameter pollution guard configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ParamPollutionConfig {
    /// Query keys allowed to carry several values.
    pub whitelist: Vec<String>,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_bootstrap() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.rate_limit.window_ms, 600_000);
        assert_eq!(config.rate_limit.max, 100);
        assert_eq!(config.cache.ttl_secs, 300);
        assert!(!config.environment.is_development());
    }

    #[test]
    fn test_environment_parsing() {
        assert_eq!(Environment::from("development".to_string()), Environment::Development);
        assert_eq!(
            Environment::from("staging".to_string()),
            Environment::Other("staging".to_string())
        );
        assert!(!Environment::from("Development".to_string()).is_development());
    }

    #[test]
    fn test_partial_toml() {
        let config: AppConfig = toml::from_str(
            r#"
            environment = "development"

            [server]
            port = 8080

            [rate_limit]
            max = 5
            "#,
        )
        .unwrap();

        assert!(config.environment.is_development());
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.rate_limit.max, 5);
        assert_eq!(config.rate_limit.window_ms, 600_000);
    }

    #[test]
    fn test_bind_address_brackets_ipv6() {
        let mut server = ServerConfig::default();
        assert_eq!(server.bind_address(), "0.0.0.0:5000");

        server.host = "::".to_string();
        assert_eq!(server.bind_address(), "[::]:5000");

        server.host = "localhost".to_string();
        assert_eq!(server.bind_address(), "localhost:5000");
    }
}
