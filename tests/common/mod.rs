//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Method, Request},
    response::Response,
};
use serde_json::Value;
use tempfile::TempDir;

use pipeline_server::config::{AppConfig, Environment};
use pipeline_server::db::Database;
use pipeline_server::http::CompressPredicate;
use pipeline_server::pipeline::{assemble, assembly::uploads_dir, Pipeline};
use pipeline_server::routes::AppState;

/// Config for tests: in-memory database, static root in `static_root`.
pub fn test_config(static_root: &Path) -> AppConfig {
    let mut config = AppConfig {
        environment: Environment::Test,
        ..AppConfig::default()
    };
    config.database.url = "sqlite::memory:".to_string();
    config.server.host = "127.0.0.1".to_string();
    config.server.static_root = static_root.to_string_lossy().into_owned();
    config.server.shutdown_grace_secs = 2;
    config
}

/// A fully assembled pipeline over a throwaway static root.
pub struct TestApp {
    pub pipeline: Arc<Pipeline>,
    pub config: AppConfig,
    pub static_dir: TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(adjust: impl FnOnce(&mut AppConfig)) -> Self {
        Self::build(adjust, None).await
    }

    pub async fn with_predicate(predicate: CompressPredicate) -> Self {
        Self::build(|_| {}, Some(predicate)).await
    }

    async fn build(
        adjust: impl FnOnce(&mut AppConfig),
        predicate: Option<CompressPredicate>,
    ) -> Self {
        let static_dir = tempfile::tempdir().unwrap();
        let mut config = test_config(static_dir.path());
        adjust(&mut config);

        let db = Database::connect(&config.database).await.unwrap();
        let state = AppState {
            db,
            uploads_dir: uploads_dir(&config),
        };
        let assembly = assemble(&config, state, predicate).unwrap();

        Self {
            pipeline: assembly.pipeline,
            config,
            static_dir,
        }
    }

    pub fn write_static(&self, name: &str, contents: &str) {
        std::fs::write(self.static_dir.path().join(name), contents).unwrap();
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.pipeline.handle(request).await
    }

    pub async fn get(&self, uri: &str) -> Response {
        self.send(Request::get(uri).body(Body::empty()).unwrap()).await
    }

    pub async fn send_json(&self, method: Method, uri: &str, body: &Value) -> Response {
        self.send(json_request(method, uri, body)).await
    }

    /// Register a user and return its bearer token and id.
    pub async fn register(&self, email: &str) -> (String, String) {
        let response = self
            .send_json(
                Method::POST,
                "/api/v1/auth/register",
                &serde_json::json!({ "name": "Test User", "email": email, "password": "secret123" }),
            )
            .await;
        assert_eq!(response.status(), 201);
        let body = body_json(response).await;
        (
            body["token"].as_str().unwrap().to_string(),
            body["data"]["id"].as_str().unwrap().to_string(),
        )
    }
}

pub fn json_request(method: Method, uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

pub async fn body_bytes(response: Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

pub async fn body_json(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}
