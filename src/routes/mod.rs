//! Route collaborators mounted behind the pipeline.
//!
//! # Data Flow
//! ```text
//! RequestContext (sanitized, collapsed, parsed)
//!     → RouteStage: rebuild Request, extensions = stage metadata
//!     → Router: /api/v1/auth/*  → auth.rs
//!               /api/v1/users/* → users.rs
//!               anything else   → 404 ApiError
//!     → Response (errors tagged for the error handler)
//! ```

pub mod auth;
pub mod extract;
pub mod users;

use std::path::PathBuf;

use async_trait::async_trait;
use axum::{
    http::{Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use tower::ServiceExt;

use crate::db::Database;
use crate::error::ApiError;
use crate::http::context::RequestContext;
use crate::pipeline::{Outcome, Stage, StageKind};

/// State shared by every route handler.
#[derive(Debug, Clone)]
pub struct AppState {
    pub db: Database,
    /// Where avatar uploads are written; served under `/uploads`.
    pub uploads_dir: PathBuf,
}

pub fn api_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1/auth", auth::router())
        .nest("/api/v1/users", users::router())
        .fallback(not_found)
        .method_not_allowed_fallback(method_not_allowed)
        .with_state(state)
}

async fn not_found(uri: Uri) -> ApiError {
    ApiError::NotFound(format!("Not found - {}", uri.path()))
}

async fn method_not_allowed(method: Method) -> ApiError {
    ApiError::MethodNotAllowed(method.to_string())
}

/// `{"success": true, "data": ...}` with the given status.
pub fn success<T: Serialize>(status: StatusCode, data: T) -> Response {
    (status, Json(json!({ "success": true, "data": data }))).into_response()
}

/// Terminal stage: hands the request to the route collaborators.
pub struct RouteStage {
    router: Router,
}

impl RouteStage {
    pub fn new(router: Router) -> Self {
        Self { router }
    }
}

#[async_trait]
impl Stage for RouteStage {
    fn kind(&self) -> StageKind {
        StageKind::Routes
    }

    async fn process(&self, ctx: &mut RequestContext) -> Outcome {
        let request = match ctx.take_forward_request() {
            Ok(request) => request,
            Err(err) => return Outcome::Fail(err),
        };
        match self.router.clone().oneshot(request).await {
            Ok(response) => Outcome::Terminate(response),
            Err(never) => match never {},
        }
    }
}
