//! Configuration loading from disk and the environment.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::{AppConfig, Environment};
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {key}: '{value}'")]
    InvalidEnv { key: &'static str, value: String },

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load configuration: `.env` file, optional TOML file, environment overrides,
/// then validation.
///
/// A missing `.env` file is not an error. A TOML path that was given explicitly
/// must exist.
pub fn load_config(
    config_path: Option<&Path>,
    env_file: Option<&Path>,
) -> Result<AppConfig, ConfigError> {
    if let Some(env_file) = env_file {
        match dotenvy::from_path(env_file) {
            Ok(()) => tracing::debug!(path = %env_file.display(), "Loaded env file"),
            Err(e) if e.not_found() => {
                tracing::debug!(path = %env_file.display(), "No env file found")
            }
            Err(e) => tracing::warn!(path = %env_file.display(), error = %e, "Failed to read env file"),
        }
    }

    let mut config = match config_path {
        Some(path) => load_file(path)?,
        None => AppConfig::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Parse a TOML configuration file without validating it.
pub fn load_file(path: &Path) -> Result<AppConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok(toml::from_str(&content)?)
}

/// Apply environment overrides on top of file/default values.
///
/// `APP_ENV` wins over the `NODE_ENV` alias.
pub fn apply_env_overrides<F>(config: &mut AppConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(env) = lookup("APP_ENV").or_else(|| lookup("NODE_ENV")) {
        config.environment = Environment::from(env);
    }

    if let Some(host) = lookup("HOST") {
        config.server.host = host;
    }

    if let Some(port) = lookup("PORT") {
        config.server.port = port.trim().parse().map_err(|_| ConfigError::InvalidEnv {
            key: "PORT",
            value: port.clone(),
        })?;
    }

    if let Some(url) = lookup("DATABASE_URL") {
        config.database.url = url;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_env_overrides() {
        let mut config = AppConfig::default();
        apply_env_overrides(
            &mut config,
            env(&[("NODE_ENV", "development"), ("PORT", "7000")]),
        )
        .unwrap();

        assert!(config.environment.is_development());
        assert_eq!(config.server.port, 7000);
    }

    #[test]
    fn test_app_env_wins_over_alias() {
        let mut config = AppConfig::default();
        apply_env_overrides(
            &mut config,
            env(&[("APP_ENV", "production"), ("NODE_ENV", "development")]),
        )
        .unwrap();
        assert_eq!(config.environment, Environment::Production);
    }

    #[test]
    fn test_invalid_port() {
        let mut config = AppConfig::default();
        let err = apply_env_overrides(&mut config, env(&[("PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { key: "PORT", .. }));
    }

    #[test]
    fn test_load_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[cache]\nttl_secs = 60").unwrap();

        let config = load_file(file.path()).unwrap();
        assert_eq!(config.cache.ttl_secs, 60);
    }

    #[test]
    fn test_missing_file() {
        let err = load_file(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
