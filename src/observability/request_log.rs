//! Development request logger.
//!
//! One line per finished request: method, URL, status, latency and body size.
//! Only registered when the environment is `development`.

use async_trait::async_trait;
use axum::{http::header, response::Response};

use crate::http::context::RequestContext;
use crate::pipeline::{Outcome, Stage, StageKind};

#[derive(Debug, Default)]
pub struct RequestLogStage;

impl RequestLogStage {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Stage for RequestLogStage {
    fn kind(&self) -> StageKind {
        StageKind::RequestLogger
    }

    async fn process(&self, _ctx: &mut RequestContext) -> Outcome {
        Outcome::Continue
    }

    async fn respond(&self, ctx: &RequestContext, response: Response) -> Response {
        let elapsed_ms = ctx.received_at.elapsed().as_secs_f64() * 1000.0;
        let length = response
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-");

        tracing::info!(
            target: "pipeline_server::access",
            request_id = %ctx.id.as_str(),
            "{} {} {} {:.3} ms - {}",
            ctx.method,
            ctx.uri,
            response.status().as_u16(),
            elapsed_ms,
            length
        );
        response
    }
}
