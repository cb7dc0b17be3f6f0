//! Body parsing stages.
//!
//! # Responsibilities
//! - Read JSON bodies up to a size limit and parse them (`BodyParser`)
//! - Read multipart bodies, keeping text fields as the structured body and
//!   files as [`Uploads`] (`FileUpload`)
//!
//! # Design Decisions
//! - Any other content type is forwarded unread
//! - Only objects and arrays are accepted as JSON bodies
//! - A body stream that breaks mid-read means the client is gone; the
//!   request is cancelled rather than answered

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::{DefaultBodyLimit, FromRequest, Multipart},
    http::{header, Request, StatusCode},
};
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use serde_json::{Map, Value};
use tower::{Layer, ServiceExt};

use crate::error::ApiError;
use crate::http::context::{RequestBody, RequestContext, UploadedFile, Uploads};
use crate::pipeline::{Outcome, Stage, StageKind};

fn is_json(content_type: &str) -> bool {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    mime == "application/json" || (mime.starts_with("application/") && mime.ends_with("+json"))
}

fn is_multipart(content_type: &str) -> bool {
    content_type
        .trim_start()
        .to_ascii_lowercase()
        .starts_with("multipart/form-data")
}

fn declared_length(ctx: &RequestContext) -> Option<usize> {
    ctx.headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

enum ReadError {
    TooLarge,
    Disconnected(axum::Error),
}

/// Collect a body, failing as soon as it grows past `limit`.
async fn read_limited(body: Body, limit: usize) -> Result<Bytes, ReadError> {
    let mut stream = body.into_data_stream();
    let mut buf = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(ReadError::Disconnected)?;
        if buf.len() + chunk.len() > limit {
            return Err(ReadError::TooLarge);
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf.freeze())
}

/// Parses `application/json` (and `+json`) bodies.
#[derive(Debug, Clone)]
pub struct JsonBodyStage {
    limit: usize,
}

impl JsonBodyStage {
    pub fn new(limit: usize) -> Self {
        Self { limit }
    }
}

#[async_trait]
impl Stage for JsonBodyStage {
    fn kind(&self) -> StageKind {
        StageKind::BodyParser
    }

    async fn process(&self, ctx: &mut RequestContext) -> Outcome {
        if !ctx.content_type().is_some_and(is_json) {
            return Outcome::Continue;
        }
        if declared_length(ctx).is_some_and(|len| len > self.limit) {
            return Outcome::Fail(ApiError::PayloadTooLarge { limit: self.limit });
        }

        let RequestBody::Stream(body) = ctx.body.take() else {
            return Outcome::Continue;
        };

        let bytes = match read_limited(body.into_inner(), self.limit).await {
            Ok(bytes) => bytes,
            Err(ReadError::TooLarge) => {
                return Outcome::Fail(ApiError::PayloadTooLarge { limit: self.limit })
            }
            Err(ReadError::Disconnected(e)) => {
                tracing::debug!(request_id = %ctx.id.as_str(), error = %e, "Body stream failed");
                ctx.cancel.cancel();
                return Outcome::Continue;
            }
        };

        if bytes.iter().all(u8::is_ascii_whitespace) {
            ctx.body = RequestBody::Empty;
            return Outcome::Continue;
        }

        match serde_json::from_slice::<Value>(&bytes) {
            Ok(value @ (Value::Object(_) | Value::Array(_))) => {
                ctx.body = RequestBody::Json(value);
                Outcome::Continue
            }
            Ok(_) => Outcome::Fail(ApiError::MalformedJson(
                "expected a JSON object or array".to_string(),
            )),
            Err(e) => Outcome::Fail(ApiError::MalformedJson(e.to_string())),
        }
    }
}

/// Parses `multipart/form-data` bodies.
#[derive(Debug, Clone)]
pub struct FileUploadStage {
    limit: usize,
}

enum MultipartFailure {
    TooLarge,
    Rejected(ApiError),
    Disconnected(String),
}

impl FileUploadStage {
    pub fn new(limit: usize) -> Self {
        Self { limit }
    }

    async fn collect(
        request: Request<Body>,
    ) -> Result<(Map<String, Value>, Vec<UploadedFile>), MultipartFailure> {
        let mut multipart = Multipart::from_request(request, &())
            .await
            .map_err(|e| MultipartFailure::Rejected(ApiError::BadRequest(e.body_text())))?;

        let mut fields = Map::new();
        let mut files = Vec::new();

        while let Some(field) = multipart.next_field().await.map_err(multipart_failure)? {
            let name = field.name().unwrap_or_default().to_string();
            match field.file_name().map(str::to_string) {
                Some(file_name) => {
                    let content_type = field.content_type().map(str::to_string);
                    let data = field.bytes().await.map_err(multipart_failure)?;
                    files.push(UploadedFile {
                        field: name,
                        file_name,
                        content_type,
                        data,
                    });
                }
                None => {
                    let text = field.text().await.map_err(multipart_failure)?;
                    fields.insert(name, Value::String(text));
                }
            }
        }
        Ok((fields, files))
    }
}

fn multipart_failure(err: axum::extract::multipart::MultipartError) -> MultipartFailure {
    match err.status() {
        StatusCode::PAYLOAD_TOO_LARGE => MultipartFailure::TooLarge,
        status if status.is_server_error() => MultipartFailure::Disconnected(err.body_text()),
        _ => MultipartFailure::Rejected(ApiError::BadRequest(err.body_text())),
    }
}

#[async_trait]
impl Stage for FileUploadStage {
    fn kind(&self) -> StageKind {
        StageKind::FileUpload
    }

    async fn process(&self, ctx: &mut RequestContext) -> Outcome {
        if !ctx.content_type().is_some_and(is_multipart) {
            return Outcome::Continue;
        }
        if declared_length(ctx).is_some_and(|len| len > self.limit) {
            return Outcome::Fail(ApiError::PayloadTooLarge { limit: self.limit });
        }

        let RequestBody::Stream(body) = ctx.body.take() else {
            return Outcome::Continue;
        };
        let mut request = Request::new(body.into_inner());
        *request.headers_mut() = ctx.headers.clone();

        let limit = self.limit;
        let collector = DefaultBodyLimit::max(limit).layer(tower::service_fn(|req| async move {
            Ok::<_, std::convert::Infallible>(Self::collect(req).await)
        }));
        let collected = match collector.oneshot(request).await {
            Ok(collected) => collected,
            Err(never) => match never {},
        };

        match collected {
            Ok((fields, files)) => {
                tracing::debug!(
                    request_id = %ctx.id.as_str(),
                    fields = fields.len(),
                    files = files.len(),
                    "Parsed multipart body"
                );
                ctx.body = RequestBody::Json(Value::Object(fields));
                ctx.headers.remove(header::CONTENT_LENGTH);
                ctx.metadata.insert(Uploads(files));
                Outcome::Continue
            }
            Err(MultipartFailure::TooLarge) => Outcome::Fail(ApiError::PayloadTooLarge { limit }),
            Err(MultipartFailure::Rejected(err)) => Outcome::Fail(err),
            Err(MultipartFailure::Disconnected(msg)) => {
                tracing::debug!(request_id = %ctx.id.as_str(), error = %msg, "Multipart stream failed");
                ctx.cancel.cancel();
                Outcome::Continue
            }
        }
    }
}
