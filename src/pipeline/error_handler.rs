//! Terminal error-handling stage.
//!
//! Turns any [`ApiError`] into exactly one JSON response. It cannot fail.

use axum::{
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::error::ApiError;
use crate::http::context::RequestContext;
use crate::observability::metrics;

#[derive(Debug, Clone)]
pub struct ErrorHandler {
    /// Include the internal error text in the body (development only).
    expose_details: bool,
}

impl ErrorHandler {
    pub fn new(expose_details: bool) -> Self {
        Self { expose_details }
    }

    pub fn handle(&self, ctx: &RequestContext, err: &ApiError) -> Response {
        let status = err.status();

        if err.is_server_error() {
            tracing::error!(
                request_id = %ctx.id.as_str(),
                method = %ctx.method,
                path = %ctx.path(),
                status = status.as_u16(),
                error = %err,
                "Request failed"
            );
        } else {
            tracing::debug!(
                request_id = %ctx.id.as_str(),
                path = %ctx.path(),
                status = status.as_u16(),
                error = %err,
                "Request rejected"
            );
        }
        metrics::record_error(status.as_u16());

        let mut body = json!({
            "success": false,
            "error": err.public_message(),
            "request_id": ctx.id.as_str(),
        });
        if self.expose_details {
            body["detail"] = json!(err.to_string());
        }

        let mut response = (status, Json(body)).into_response();
        if let ApiError::RateLimited { retry_after_secs } = err {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(*retry_after_secs));
        }
        response
    }
}
