//! Database collaborator.
//!
//! One SQLite pool, opened once at startup before the listener binds. The
//! schema is created on connect.
//!
//! - `models`: row types
//! - `users`: user CRUD
//! - `sessions`: opaque login tokens

pub mod models;
pub mod sessions;
pub mod users;

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use thiserror::Error;

use crate::config::DatabaseConfig;

pub use models::User;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("invalid database url '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("failed to connect to database: {0}")]
    Connect(#[source] sqlx::Error),

    #[error("failed to create schema: {0}")]
    Schema(#[source] sqlx::Error),
}

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        email TEXT NOT NULL UNIQUE,
        role TEXT NOT NULL DEFAULT 'user',
        password_hash TEXT NOT NULL,
        avatar TEXT,
        created_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS sessions (
        token TEXT PRIMARY KEY,
        user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        created_at INTEGER NOT NULL
    )",
];

/// Shared handle to the pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, DbError> {
        let options = SqliteConnectOptions::from_str(&config.url)
            .map_err(|source| DbError::InvalidUrl {
                url: config.url.clone(),
                source,
            })?
            .create_if_missing(true)
            .foreign_keys(true);

        // Every connection to an in-memory database is a separate database.
        let in_memory = config.url.contains(":memory:") || config.url.contains("mode=memory");
        let mut pool_options = SqlitePoolOptions::new()
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs));
        pool_options = if in_memory {
            pool_options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            pool_options.max_connections(config.max_connections)
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(DbError::Connect)?;

        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&pool)
                .await
                .map_err(DbError::Schema)?;
        }

        tracing::info!(url = %redact(&config.url), in_memory, "Database connected");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
        tracing::info!("Database pool closed");
    }
}

/// Strip query parameters, which may carry credentials.
fn redact(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

/// Seconds since the Unix epoch.
pub(crate) fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
pub(crate) async fn memory() -> Database {
    Database::connect(&DatabaseConfig {
        url: "sqlite::memory:".to_string(),
        ..DatabaseConfig::default()
    })
    .await
    .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_database_has_schema() {
        let db = memory().await;
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('users', 'sessions')",
        )
        .fetch_one(db.pool())
        .await
        .unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_unreachable_database_fails() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}/missing/dir/app.db", dir.path().display());
        let err = Database::connect(&DatabaseConfig {
            url,
            connect_timeout_secs: 1,
            ..DatabaseConfig::default()
        })
        .await
        .unwrap_err();
        assert!(matches!(err, DbError::Connect(_)));
    }

    #[test]
    fn test_redact() {
        assert_eq!(redact("sqlite:app.db?mode=rwc"), "sqlite:app.db");
    }
}
