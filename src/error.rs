//! Request-scoped error type shared by stages and route handlers.
//!
//! Everything that can go wrong while serving a request ends up as an
//! [`ApiError`]. Stages return it through `Outcome::Fail`; route handlers
//! return it from `Result`, and its `IntoResponse` impl tags the response with
//! a [`PendingError`] so the pipeline can hand it to the error handler.

use std::sync::Arc;

use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("Malformed JSON body: {0}")]
    MalformedJson(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Method {0} not allowed")]
    MethodNotAllowed(String),

    #[error("Payload too large (limit {limit} bytes)")]
    PayloadTooLarge { limit: usize },

    #[error("Too many requests, please try again later.")]
    RateLimited { retry_after_secs: u64 },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Request handling panicked: {0}")]
    Panic(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) | ApiError::MalformedJson(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Database(sqlx::Error::RowNotFound) => StatusCode::NOT_FOUND,
            ApiError::Database(e) if is_unique_violation(e) => StatusCode::BAD_REQUEST,
            ApiError::Database(_) | ApiError::Panic(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message safe to show to clients. Internal details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            ApiError::Database(sqlx::Error::RowNotFound) => "Resource not found".to_string(),
            ApiError::Database(e) if is_unique_violation(e) => {
                "Duplicate field value entered".to_string()
            }
            ApiError::Database(_) | ApiError::Panic(_) | ApiError::Internal(_) => {
                "Server Error".to_string()
            }
            other => other.to_string(),
        }
    }

    /// Whether the error points at a server-side defect rather than the client.
    pub fn is_server_error(&self) -> bool {
        self.status().is_server_error()
    }

    pub fn json_body(&self) -> serde_json::Value {
        json!({
            "success": false,
            "error": self.public_message(),
        })
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.is_unique_violation(),
        _ => false,
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        match rejection {
            JsonRejection::JsonSyntaxError(e) => ApiError::MalformedJson(e.body_text()),
            JsonRejection::MissingJsonContentType(_) => {
                ApiError::BadRequest("Expected a JSON body".to_string())
            }
            other => ApiError::BadRequest(other.body_text()),
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

/// Marker attached to responses produced from an [`ApiError`].
#[derive(Debug, Clone)]
pub struct PendingError(pub Arc<ApiError>);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (self.status(), Json(self.json_body())).into_response();
        response
            .extensions_mut()
            .insert(PendingError(Arc::new(self)));
        response
    }
}

/// Convenience type alias for handler results.
pub type ApiResult<T> = Result<T, ApiError>;
