//! Request pipeline: an ordered chain of stages ending in the route
//! collaborators, with a terminal error handler.
//!
//! # Data Flow
//! ```text
//! Request
//!     → RequestContext::from_request
//!     → stage[0].process → stage[1].process → ... → routes
//!          │ Continue: next stage
//!          │ Terminate(response): stop, respond
//!          │ Fail(error) / panic: stop, error_handler
//!     → staged headers merged into the response
//!     → stage[k].respond → ... → stage[0].respond   (entered stages, reverse order)
//!     → Response
//! ```
//!
//! # Design Decisions
//! - Stage order is checked when the pipeline is built, not per request
//! - A panic inside a stage is a request-scoped failure, never a crash
//! - Route collaborators report errors through `ApiError`; the pipeline
//!   re-renders them with the error handler so every failure is shaped the same

pub mod assembly;
pub mod error_handler;

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{HeaderValue, Request, StatusCode},
    response::Response,
};
use futures_util::FutureExt;
use thiserror::Error;

use crate::error::{ApiError, PendingError};
use crate::http::context::{RequestContext, X_REQUEST_ID};
use crate::observability::metrics;

pub use assembly::assemble;
pub use error_handler::ErrorHandler;

/// Result of running one stage.
pub enum Outcome {
    /// Hand the request to the next stage.
    Continue,
    /// Stop the chain with this response.
    Terminate(Response),
    /// Stop the chain and let the error handler respond.
    Fail(ApiError),
}

impl fmt::Debug for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Continue => f.write_str("Continue"),
            Outcome::Terminate(response) => write!(f, "Terminate({})", response.status()),
            Outcome::Fail(err) => write!(f, "Fail({err})"),
        }
    }
}

/// Position of a stage in the canonical composition order.
///
/// Variants are declared in that order; the derived `Ord` is the order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StageKind {
    Compression,
    BodyParser,
    RequestLogger,
    FileUpload,
    Sanitize,
    SecurityHeaders,
    Xss,
    RateLimit,
    ParamPollution,
    Cors,
    StaticFiles,
    Cache,
    Routes,
}

impl StageKind {
    pub fn name(self) -> &'static str {
        match self {
            StageKind::Compression => "compression",
            StageKind::BodyParser => "body_parser",
            StageKind::RequestLogger => "request_logger",
            StageKind::FileUpload => "file_upload",
            StageKind::Sanitize => "sanitize",
            StageKind::SecurityHeaders => "security_headers",
            StageKind::Xss => "xss",
            StageKind::RateLimit => "rate_limit",
            StageKind::ParamPollution => "param_pollution",
            StageKind::Cors => "cors",
            StageKind::StaticFiles => "static_files",
            StageKind::Cache => "cache",
            StageKind::Routes => "routes",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One unit of the request pipeline.
#[async_trait]
pub trait Stage: Send + Sync {
    fn kind(&self) -> StageKind;

    /// Inspect or transform the request on the way in.
    async fn process(&self, ctx: &mut RequestContext) -> Outcome;

    /// Inspect or transform the response on the way out. Runs for every
    /// stage whose `process` was invoked, innermost first.
    async fn respond(&self, _ctx: &RequestContext, response: Response) -> Response {
        response
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("stage '{stage}' registered after '{after}'")]
    OutOfOrder { stage: StageKind, after: StageKind },

    #[error("stage '{0}' registered twice")]
    Duplicate(StageKind),

    #[error("pipeline has no route stage")]
    MissingRoutes,
}

/// Builds a [`Pipeline`], enforcing the canonical stage order.
pub struct PipelineBuilder {
    stages: Vec<Arc<dyn Stage>>,
    error_handler: ErrorHandler,
}

impl PipelineBuilder {
    pub fn new(error_handler: ErrorHandler) -> Self {
        Self {
            stages: Vec::new(),
            error_handler,
        }
    }

    pub fn stage<S: Stage + 'static>(mut self, stage: S) -> Result<Self, PipelineError> {
        let kind = stage.kind();
        if let Some(last) = self.stages.last().map(|s| s.kind()) {
            if kind == last {
                return Err(PipelineError::Duplicate(kind));
            }
            if kind < last {
                return Err(PipelineError::OutOfOrder { stage: kind, after: last });
            }
        }
        self.stages.push(Arc::new(stage));
        Ok(self)
    }

    /// Register a stage only when `include` holds.
    pub fn stage_if<S, F>(self, include: bool, make: F) -> Result<Self, PipelineError>
    where
        S: Stage + 'static,
        F: FnOnce() -> S,
    {
        if include {
            self.stage(make())
        } else {
            Ok(self)
        }
    }

    pub fn build(self) -> Result<Pipeline, PipelineError> {
        match self.stages.last().map(|s| s.kind()) {
            Some(StageKind::Routes) => {}
            _ => return Err(PipelineError::MissingRoutes),
        }
        Ok(Pipeline {
            stages: self.stages,
            error_handler: self.error_handler,
        })
    }
}

enum Produced {
    Response(Response),
    Error(ApiError),
    Abandoned,
}

/// The composed handler.
pub struct Pipeline {
    stages: Vec<Arc<dyn Stage>>,
    error_handler: ErrorHandler,
}

impl Pipeline {
    pub fn builder(error_handler: ErrorHandler) -> PipelineBuilder {
        PipelineBuilder::new(error_handler)
    }

    /// Registered stages, in execution order.
    pub fn kinds(&self) -> Vec<StageKind> {
        self.stages.iter().map(|s| s.kind()).collect()
    }

    pub async fn handle(&self, request: Request<Body>) -> Response {
        let mut ctx = RequestContext::from_request(request);
        let method = ctx.method.clone();

        tracing::trace!(
            request_id = %ctx.id.as_str(),
            method = %ctx.method,
            path = %ctx.path(),
            "Entering pipeline"
        );

        let (entered, produced) = self.run_stages(&mut ctx).await;

        let mut response = match produced {
            Produced::Response(response) => response,
            Produced::Error(err) => self.error_handler.handle(&ctx, &err),
            Produced::Abandoned => return abandoned(&ctx),
        };

        if let Some(PendingError(err)) = response.extensions_mut().remove::<PendingError>() {
            response = self.error_handler.handle(&ctx, &err);
        }

        merge_staged_headers(&ctx, &mut response);

        for stage in self.stages[..entered].iter().rev() {
            if ctx.cancel.is_cancelled() {
                return abandoned(&ctx);
            }
            let kind = stage.kind();
            response = match AssertUnwindSafe(stage.respond(&ctx, response))
                .catch_unwind()
                .await
            {
                Ok(response) => response,
                Err(panic) => {
                    let err = ApiError::Panic(format!("{kind}: {}", panic_message(&*panic)));
                    self.error_handler.handle(&ctx, &err)
                }
            };
        }

        if let Ok(value) = HeaderValue::from_str(ctx.id.as_str()) {
            response.headers_mut().insert(X_REQUEST_ID, value);
        }

        metrics::record_request(method.as_str(), response.status().as_u16(), ctx.received_at);
        response
    }

    /// Returns how many stages were entered and what the chain produced.
    async fn run_stages(&self, ctx: &mut RequestContext) -> (usize, Produced) {
        for (index, stage) in self.stages.iter().enumerate() {
            if ctx.cancel.is_cancelled() {
                return (index, Produced::Abandoned);
            }

            let kind = stage.kind();
            let outcome = match AssertUnwindSafe(stage.process(ctx)).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(panic) => Outcome::Fail(ApiError::Panic(format!(
                    "{kind}: {}",
                    panic_message(&*panic)
                ))),
            };

            match outcome {
                Outcome::Continue => continue,
                Outcome::Terminate(response) => {
                    tracing::trace!(stage = %kind, status = %response.status(), "Stage terminated request");
                    return (index + 1, Produced::Response(response));
                }
                Outcome::Fail(err) => {
                    tracing::debug!(stage = %kind, error = %err, "Stage failed");
                    return (index + 1, Produced::Error(err));
                }
            }
        }

        // The route stage always terminates; reaching here means it was bypassed.
        let path = ctx.path().to_string();
        (
            self.stages.len(),
            Produced::Error(ApiError::NotFound(format!("Not found - {path}"))),
        )
    }
}

/// Copy staged headers without overriding what the response already set.
fn merge_staged_headers(ctx: &RequestContext, response: &mut Response) {
    let headers = response.headers_mut();
    for (name, value) in ctx.response_headers.iter() {
        if !headers.contains_key(name) {
            headers.insert(name.clone(), value.clone());
        }
    }
}

fn abandoned(ctx: &RequestContext) -> Response {
    tracing::debug!(
        request_id = %ctx.id.as_str(),
        path = %ctx.path(),
        "Client disconnected, abandoning request"
    );
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST);
    response
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderName;
    use axum::response::IntoResponse;
    use std::sync::Mutex;

    /// Records the order in which stages run.
    struct Probe {
        kind: StageKind,
        log: Arc<Mutex<Vec<String>>>,
        outcome: fn() -> Outcome,
    }

    #[async_trait]
    impl Stage for Probe {
        fn kind(&self) -> StageKind {
            self.kind
        }

        async fn process(&self, ctx: &mut RequestContext) -> Outcome {
            self.log.lock().unwrap().push(format!("in:{}", self.kind));
            ctx.set_response_header(
                HeaderName::from_static("x-probe"),
                HeaderValue::from_static("staged"),
            );
            (self.outcome)()
        }

        async fn respond(&self, _ctx: &RequestContext, response: Response) -> Response {
            self.log.lock().unwrap().push(format!("out:{}", self.kind));
            response
        }
    }

    struct Panics;

    #[async_trait]
    impl Stage for Panics {
        fn kind(&self) -> StageKind {
            StageKind::Xss
        }

        async fn process(&self, _ctx: &mut RequestContext) -> Outcome {
            panic!("stage blew up")
        }
    }

    fn probe(kind: StageKind, log: &Arc<Mutex<Vec<String>>>, outcome: fn() -> Outcome) -> Probe {
        Probe {
            kind,
            log: log.clone(),
            outcome,
        }
    }

    fn ok_response() -> Outcome {
        Outcome::Terminate((StatusCode::OK, "routed").into_response())
    }

    fn request(path: &str) -> Request<Body> {
        Request::builder().uri(path).body(Body::empty()).unwrap()
    }

    #[test]
    fn test_rejects_out_of_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let err = Pipeline::builder(ErrorHandler::new(false))
            .stage(probe(StageKind::Cors, &log, || Outcome::Continue))
            .unwrap()
            .stage(probe(StageKind::Sanitize, &log, || Outcome::Continue))
            .err()
            .unwrap();
        assert_eq!(
            err,
            PipelineError::OutOfOrder {
                stage: StageKind::Sanitize,
                after: StageKind::Cors
            }
        );
    }

    #[test]
    fn test_requires_routes_last() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let err = Pipeline::builder(ErrorHandler::new(false))
            .stage(probe(StageKind::Cors, &log, || Outcome::Continue))
            .unwrap()
            .build()
            .err()
            .unwrap();
        assert_eq!(err, PipelineError::MissingRoutes);
    }

    #[tokio::test]
    async fn test_stages_run_in_order_and_unwind() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::builder(ErrorHandler::new(false))
            .stage(probe(StageKind::Compression, &log, || Outcome::Continue))
            .unwrap()
            .stage(probe(StageKind::Sanitize, &log, || Outcome::Continue))
            .unwrap()
            .stage(probe(StageKind::Routes, &log, ok_response))
            .unwrap()
            .build()
            .unwrap();

        let response = pipeline.handle(request("/")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get("x-probe").unwrap(), "staged");
        assert!(response.headers().contains_key(X_REQUEST_ID));
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "in:compression",
                "in:sanitize",
                "in:routes",
                "out:routes",
                "out:sanitize",
                "out:compression"
            ]
        );
    }

    #[tokio::test]
    async fn test_terminate_skips_later_stages() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::builder(ErrorHandler::new(false))
            .stage(probe(StageKind::StaticFiles, &log, || {
                Outcome::Terminate((StatusCode::OK, "file").into_response())
            }))
            .unwrap()
            .stage(probe(StageKind::Routes, &log, ok_response))
            .unwrap()
            .build()
            .unwrap();

        pipeline.handle(request("/index.html")).await;
        assert_eq!(
            *log.lock().unwrap(),
            vec!["in:static_files", "out:static_files"]
        );
    }

    #[tokio::test]
    async fn test_failure_goes_to_error_handler() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::builder(ErrorHandler::new(false))
            .stage(probe(StageKind::RateLimit, &log, || {
                Outcome::Fail(ApiError::RateLimited { retry_after_secs: 5 })
            }))
            .unwrap()
            .stage(probe(StageKind::Routes, &log, ok_response))
            .unwrap()
            .build()
            .unwrap();

        let response = pipeline.handle(request("/")).await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get("retry-after").unwrap(), "5");
        assert!(!log.lock().unwrap().contains(&"in:routes".to_string()));
    }

    #[tokio::test]
    async fn test_panic_becomes_500() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::builder(ErrorHandler::new(false))
            .stage(Panics)
            .unwrap()
            .stage(probe(StageKind::Routes, &log, ok_response))
            .unwrap()
            .build()
            .unwrap();

        let response = pipeline.handle(request("/")).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_pending_error_rendered_once() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::builder(ErrorHandler::new(false))
            .stage(probe(StageKind::Routes, &log, || {
                Outcome::Terminate(ApiError::Unauthorized("Not authorized".into()).into_response())
            }))
            .unwrap()
            .build()
            .unwrap();

        let response = pipeline.handle(request("/api/v1/auth/me")).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.extensions().get::<PendingError>().is_none());
    }

    #[tokio::test]
    async fn test_cancelled_request_is_abandoned() {
        struct Disconnects;

        #[async_trait]
        impl Stage for Disconnects {
            fn kind(&self) -> StageKind {
                StageKind::BodyParser
            }

            async fn process(&self, ctx: &mut RequestContext) -> Outcome {
                ctx.cancel.cancel();
                Outcome::Continue
            }
        }

        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::builder(ErrorHandler::new(false))
            .stage(Disconnects)
            .unwrap()
            .stage(probe(StageKind::Routes, &log, ok_response))
            .unwrap()
            .build()
            .unwrap();

        let response = pipeline.handle(request("/")).await;
        assert_eq!(response.status().as_u16(), 499);
        assert!(log.lock().unwrap().is_empty());
    }
}
