//! Per-request state threaded through the pipeline.
//!
//! A [`RequestContext`] is built from the incoming `Request`, mutated in
//! place by each stage, and finally turned back into a `Request` for the
//! route collaborators.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{header, Extensions, HeaderMap, HeaderName, HeaderValue, Method, Request, Uri, Version},
};
use bytes::Bytes;
use serde_json::Value;

use crate::error::ApiError;

pub const X_REQUEST_ID: &str = "x-request-id";

const MAX_INBOUND_REQUEST_ID_LEN: usize = 128;

/// Correlation id, taken from `x-request-id` when the client sent a sane one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

impl RequestId {
    fn from_headers(headers: &HeaderMap) -> Self {
        headers
            .get(X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty() && v.len() <= MAX_INBOUND_REQUEST_ID_LEN)
            .map(|v| RequestId(v.to_string()))
            .unwrap_or_else(|| RequestId(uuid::Uuid::new_v4().to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Raised when the client went away; checked before every stage and write.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal(Arc<AtomicBool>);

impl CancelSignal {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A file received in a multipart body.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub field: String,
    pub file_name: String,
    pub content_type: Option<String>,
    pub data: Bytes,
}

/// All files of one request, forwarded to handlers as an extension.
#[derive(Debug, Clone, Default)]
pub struct Uploads(pub Vec<UploadedFile>);

/// Request body no stage has read yet.
///
/// `Body` is not `Sync`; the mutex keeps `RequestContext` shareable across
/// the awaits of `Stage::respond`. It is never locked, only unwrapped.
pub struct UnreadBody(Mutex<Body>);

impl UnreadBody {
    pub fn new(body: Body) -> Self {
        Self(Mutex::new(body))
    }

    pub fn into_inner(self) -> Body {
        self.0.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for UnreadBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("UnreadBody")
    }
}

/// Body of a request as it moves through the pipeline.
#[derive(Debug, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    /// Not parsed by any stage; forwarded untouched.
    Stream(UnreadBody),
    /// Parsed structured body (JSON or multipart text fields).
    Json(Value),
}

impl RequestBody {
    pub fn take(&mut self) -> RequestBody {
        std::mem::take(self)
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            RequestBody::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_json_mut(&mut self) -> Option<&mut Value> {
        match self {
            RequestBody::Json(value) => Some(value),
            _ => None,
        }
    }
}

pub struct RequestContext {
    pub id: RequestId,
    pub method: Method,
    pub uri: Uri,
    pub version: Version,
    pub headers: HeaderMap,
    /// Decoded query pairs in arrival order.
    pub query: Vec<(String, String)>,
    pub body: RequestBody,
    pub peer: Option<SocketAddr>,
    /// Stage-attached annotations; cloned into the forwarded request.
    pub metadata: Extensions,
    /// Headers every eventual response should carry unless it sets them itself.
    pub response_headers: HeaderMap,
    pub received_at: Instant,
    pub cancel: CancelSignal,
}

impl RequestContext {
    pub fn from_request(request: Request<Body>) -> Self {
        let (parts, body) = request.into_parts();

        let query = parts
            .uri
            .query()
            .map(|q| serde_urlencoded::from_str::<Vec<(String, String)>>(q).unwrap_or_default())
            .unwrap_or_default();

        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);

        let id = RequestId::from_headers(&parts.headers);

        let mut metadata = Extensions::new();
        metadata.insert(id.clone());
        if let Some(addr) = peer {
            metadata.insert(ConnectInfo(addr));
        }

        Self {
            id,
            method: parts.method,
            uri: parts.uri,
            version: parts.version,
            headers: parts.headers,
            query,
            body: RequestBody::Stream(UnreadBody::new(body)),
            peer,
            metadata,
            response_headers: HeaderMap::new(),
            received_at: Instant::now(),
            cancel: CancelSignal::default(),
        }
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Identity used to group requests (source IP).
    pub fn client_key(&self) -> String {
        self.peer
            .map(|addr| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }

    /// Stage a header for the eventual response.
    pub fn set_response_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.response_headers.insert(name, value);
    }

    /// Current query, re-encoded.
    pub fn query_string(&self) -> Option<String> {
        if self.query.is_empty() {
            return None;
        }
        serde_urlencoded::to_string(&self.query).ok()
    }

    fn path_and_query(&self) -> String {
        match self.query_string() {
            Some(q) => format!("{}?{}", self.path(), q),
            None => self.path().to_string(),
        }
    }

    /// Body-less copy of the request line and headers.
    pub fn probe_request(&self) -> Result<Request<Body>, ApiError> {
        let mut request = Request::builder()
            .method(self.method.clone())
            .uri(self.path_and_query())
            .version(self.version)
            .body(Body::empty())
            .map_err(|e| ApiError::BadRequest(format!("Invalid request target: {e}")))?;
        *request.headers_mut() = self.headers.clone();
        Ok(request)
    }

    /// Rebuild the request for the route collaborators, moving the body out.
    pub fn take_forward_request(&mut self) -> Result<Request<Body>, ApiError> {
        let mut request = self.probe_request()?;
        let headers = request.headers_mut();

        let body = match self.body.take() {
            RequestBody::Empty => {
                headers.remove(header::CONTENT_LENGTH);
                Body::empty()
            }
            RequestBody::Stream(body) => body.into_inner(),
            RequestBody::Json(value) => {
                let bytes = serde_json::to_vec(&value)
                    .map_err(|e| ApiError::Internal(format!("Re-encoding body failed: {e}")))?;
                headers.insert(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("application/json"),
                );
                headers.insert(header::CONTENT_LENGTH, HeaderValue::from(bytes.len()));
                Body::from(bytes)
            }
        };
        *request.body_mut() = body;
        request.extensions_mut().extend(self.metadata.clone());
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(uri: &str) -> RequestContext {
        RequestContext::from_request(Request::builder().uri(uri).body(Body::empty()).unwrap())
    }

    #[test]
    fn test_query_is_decoded_in_order() {
        let ctx = context("/api/v1/users?sort=name&page=2&sort=email%40x");
        assert_eq!(
            ctx.query,
            vec![
                ("sort".to_string(), "name".to_string()),
                ("page".to_string(), "2".to_string()),
                ("sort".to_string(), "email@x".to_string()),
            ]
        );
    }

    #[test]
    fn test_request_id_reused_or_generated() {
        let inbound = RequestContext::from_request(
            Request::builder()
                .uri("/")
                .header(X_REQUEST_ID, "abc-123")
                .body(Body::empty())
                .unwrap(),
        );
        assert_eq!(inbound.id.as_str(), "abc-123");

        let generated = context("/");
        assert_eq!(generated.id.as_str().len(), 36);
    }

    #[test]
    fn test_unknown_client_without_connect_info() {
        assert_eq!(context("/").client_key(), "unknown");
    }

    #[test]
    fn test_forward_request_reencodes_json() {
        let mut ctx = context("/api/v1/users?name=a");
        ctx.body = RequestBody::Json(serde_json::json!({ "name": "alice" }));
        ctx.query.push(("page".into(), "1".into()));

        let forwarded = ctx.take_forward_request().unwrap();
        assert_eq!(forwarded.uri(), "/api/v1/users?name=a&page=1");
        assert_eq!(
            forwarded.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
        assert!(forwarded.extensions().get::<RequestId>().is_some());
        assert!(matches!(ctx.body, RequestBody::Empty));
    }

    #[test]
    fn test_cancel_signal_shared() {
        let ctx = context("/");
        let observer = ctx.cancel.clone();
        ctx.cancel.cancel();
        assert!(observer.is_cancelled());
    }
}
