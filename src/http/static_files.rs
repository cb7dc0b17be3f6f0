//! Static asset serving from the public directory.
//!
//! A file that exists under the root is served and ends the request. A miss
//! falls through to the next stage.

use std::path::Path;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, StatusCode},
};
use tower::ServiceExt;
use tower_http::services::ServeDir;

use crate::http::context::RequestContext;
use crate::pipeline::{Outcome, Stage, StageKind};

#[derive(Debug, Clone)]
pub struct StaticFilesStage {
    serve: ServeDir,
}

impl StaticFilesStage {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            serve: ServeDir::new(root.as_ref()),
        }
    }
}

#[async_trait]
impl Stage for StaticFilesStage {
    fn kind(&self) -> StageKind {
        StageKind::StaticFiles
    }

    async fn process(&self, ctx: &mut RequestContext) -> Outcome {
        if ctx.method != Method::GET && ctx.method != Method::HEAD {
            return Outcome::Continue;
        }

        let request = match ctx.probe_request() {
            Ok(request) => request,
            Err(err) => return Outcome::Fail(err),
        };

        let response = match self.serve.clone().oneshot(request).await {
            Ok(response) => response,
            Err(never) => match never {},
        };

        if response.status() == StatusCode::NOT_FOUND {
            return Outcome::Continue;
        }

        tracing::trace!(
            request_id = %ctx.id.as_str(),
            path = %ctx.path(),
            status = %response.status(),
            "Served static asset"
        );
        Outcome::Terminate(response.map(Body::new))
    }
}
