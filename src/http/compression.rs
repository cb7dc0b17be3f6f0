//! Response compression.
//!
//! Runs first on the way in and last on the way out, so it sees the final
//! response of every stage including error and short-circuit responses.

use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::{Body, HttpBody},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::Response,
};
use flate2::{
    write::{GzEncoder, ZlibEncoder},
    Compression,
};

use crate::config::CompressionConfig;
use crate::http::context::RequestContext;
use crate::pipeline::{Outcome, Stage, StageKind};

/// Larger bodies are never buffered for compression.
const MAX_BUFFERED_BYTES: usize = 8 * 1024 * 1024;

/// Decides per response whether compression applies at all.
pub type CompressPredicate = Arc<dyn Fn(&RequestContext, &Response) -> bool + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    Gzip,
    Deflate,
}

impl Encoding {
    fn header_value(self) -> HeaderValue {
        match self {
            Encoding::Gzip => HeaderValue::from_static("gzip"),
            Encoding::Deflate => HeaderValue::from_static("deflate"),
        }
    }
}

/// Content types worth compressing.
pub fn is_compressible(content_type: &str) -> bool {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    mime.starts_with("text/")
        || mime.ends_with("+json")
        || mime.ends_with("+xml")
        || matches!(
            mime.as_str(),
            "application/json"
                | "application/javascript"
                | "application/xml"
                | "image/svg+xml"
                | "application/wasm"
        )
}

/// Default predicate: compressible content type, unless the client sent
/// `x-no-compression`.
pub fn should_compress(ctx: &RequestContext, response: &Response) -> bool {
    if ctx.headers.contains_key("x-no-compression") {
        return false;
    }
    response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(is_compressible)
}

/// Pick an encoding from `Accept-Encoding`. Gzip wins ties.
fn negotiate(headers: &HeaderMap) -> Option<Encoding> {
    let accept = headers.get(header::ACCEPT_ENCODING)?.to_str().ok()?;
    let mut best: Option<(Encoding, f32)> = None;

    for item in accept.split(',') {
        let mut parts = item.split(';');
        let name = parts.next().unwrap_or_default().trim().to_ascii_lowercase();
        let quality = parts
            .find_map(|p| p.trim().strip_prefix("q="))
            .and_then(|q| q.parse::<f32>().ok())
            .unwrap_or(1.0);
        if quality <= 0.0 {
            continue;
        }
        let encoding = match name.as_str() {
            "gzip" | "*" => Encoding::Gzip,
            "deflate" => Encoding::Deflate,
            _ => continue,
        };
        let better = match best {
            None => true,
            Some((current, q)) => {
                quality > q || (quality == q && encoding == Encoding::Gzip && current != encoding)
            }
        };
        if better {
            best = Some((encoding, quality));
        }
    }
    best.map(|(encoding, _)| encoding)
}

fn add_vary(headers: &mut HeaderMap) {
    let already = headers
        .get_all(header::VARY)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|v| v.trim().eq_ignore_ascii_case("accept-encoding") || v.trim() == "*");
    if !already {
        headers.append(header::VARY, HeaderValue::from_static("Accept-Encoding"));
    }
}

pub struct CompressionStage {
    predicate: CompressPredicate,
    threshold: usize,
    level: Compression,
}

impl CompressionStage {
    pub fn new(predicate: Option<CompressPredicate>, config: &CompressionConfig) -> Self {
        let predicate: CompressPredicate = match predicate {
            Some(predicate) => predicate,
            None => Arc::new(should_compress),
        };
        Self {
            predicate,
            threshold: config.threshold_bytes,
            level: Compression::new(config.level),
        }
    }

    fn encode(&self, encoding: Encoding, input: &[u8]) -> std::io::Result<Vec<u8>> {
        match encoding {
            Encoding::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), self.level);
                encoder.write_all(input)?;
                encoder.finish()
            }
            Encoding::Deflate => {
                let mut encoder = ZlibEncoder::new(Vec::new(), self.level);
                encoder.write_all(input)?;
                encoder.finish()
            }
        }
    }
}

fn declared_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

#[async_trait]
impl Stage for CompressionStage {
    fn kind(&self) -> StageKind {
        StageKind::Compression
    }

    async fn process(&self, _ctx: &mut RequestContext) -> Outcome {
        Outcome::Continue
    }

    async fn respond(&self, ctx: &RequestContext, response: Response) -> Response {
        let status = response.status();
        if ctx.method == Method::HEAD
            || response.headers().contains_key(header::CONTENT_ENCODING)
            || status == StatusCode::NO_CONTENT
            || status == StatusCode::NOT_MODIFIED
            || status == StatusCode::PARTIAL_CONTENT
            || status.is_informational()
            || !(self.predicate)(ctx, &response)
        {
            return response;
        }

        let Some(encoding) = negotiate(&ctx.headers) else {
            return response;
        };

        let (mut parts, body) = response.into_parts();
        // Streams of unknown length and very large bodies go out as-is.
        let length = declared_length(&parts.headers)
            .or_else(|| body.size_hint().exact().and_then(|n| usize::try_from(n).ok()));
        match length {
            Some(len) if len >= self.threshold && len <= MAX_BUFFERED_BYTES => {}
            _ => return Response::from_parts(parts, body),
        }

        let bytes = match axum::body::to_bytes(body, MAX_BUFFERED_BYTES).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(request_id = %ctx.id.as_str(), error = %e, "Failed to buffer response for compression");
                ctx.cancel.cancel();
                parts.headers.remove(header::CONTENT_LENGTH);
                return Response::from_parts(parts, Body::empty());
            }
        };

        match self.encode(encoding, &bytes) {
            Ok(compressed) => {
                add_vary(&mut parts.headers);
                parts
                    .headers
                    .insert(header::CONTENT_ENCODING, encoding.header_value());
                parts
                    .headers
                    .insert(header::CONTENT_LENGTH, HeaderValue::from(compressed.len()));
                parts.headers.remove(header::ACCEPT_RANGES);
                Response::from_parts(parts, Body::from(compressed))
            }
            Err(e) => {
                tracing::warn!(request_id = %ctx.id.as_str(), error = %e, "Compression failed, sending identity");
                Response::from_parts(parts, Body::from(bytes))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use flate2::read::{GzDecoder, ZlibDecoder};
    use std::io::Read;

    fn ctx(accept: Option<&str>) -> RequestContext {
        let mut builder = Request::builder().uri("/api/v1/users");
        if let Some(accept) = accept {
            builder = builder.header(header::ACCEPT_ENCODING, accept);
        }
        RequestContext::from_request(builder.body(Body::empty()).unwrap())
    }

    fn json_response(body: String) -> Response {
        Response::builder()
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    fn stage(threshold: usize) -> CompressionStage {
        CompressionStage::new(
            None,
            &CompressionConfig {
                threshold_bytes: threshold,
                level: 6,
            },
        )
    }

    async fn body_bytes(response: Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    #[test]
    fn test_negotiation() {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("deflate, gzip"));
        assert_eq!(negotiate(&headers), Some(Encoding::Gzip));

        headers.insert(
            header::ACCEPT_ENCODING,
            HeaderValue::from_static("gzip;q=0.2, deflate"),
        );
        assert_eq!(negotiate(&headers), Some(Encoding::Deflate));

        headers.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("br, gzip;q=0"));
        assert_eq!(negotiate(&headers), None);
    }

    #[tokio::test]
    async fn test_gzip_large_body() {
        let payload = format!(r#"{{"data":"{}"}}"#, "abc".repeat(1000));
        let response = stage(1024)
            .respond(&ctx(Some("gzip, deflate")), json_response(payload.clone()))
            .await;

        assert_eq!(response.headers().get(header::CONTENT_ENCODING).unwrap(), "gzip");
        assert_eq!(response.headers().get(header::VARY).unwrap(), "Accept-Encoding");

        let compressed = body_bytes(response).await;
        let mut decoded = String::new();
        GzDecoder::new(&compressed[..]).read_to_string(&mut decoded).unwrap();
        assert_eq!(decoded, payload);
    }

    #[tokio::test]
    async fn test_deflate_when_only_option() {
        let payload = "x".repeat(4096);
        let response = stage(1024)
            .respond(&ctx(Some("deflate")), json_response(payload.clone()))
            .await;

        assert_eq!(
            response.headers().get(header::CONTENT_ENCODING).unwrap(),
            "deflate"
        );
        let compressed = body_bytes(response).await;
        let mut decoded = String::new();
        ZlibDecoder::new(&compressed[..]).read_to_string(&mut decoded).unwrap();
        assert_eq!(decoded, payload);
    }

    #[tokio::test]
    async fn test_small_body_left_alone() {
        let response = stage(1024)
            .respond(&ctx(Some("gzip")), json_response("{}".into()))
            .await;
        assert!(response.headers().get(header::CONTENT_ENCODING).is_none());
        assert!(response.headers().get(header::VARY).is_none());
        assert_eq!(body_bytes(response).await, b"{}");
    }

    #[tokio::test]
    async fn test_no_accept_encoding() {
        let response = stage(0)
            .respond(&ctx(None), json_response("x".repeat(2048)))
            .await;
        assert!(response.headers().get(header::CONTENT_ENCODING).is_none());
        assert!(response.headers().get(header::VARY).is_none());
    }

    #[tokio::test]
    async fn test_opt_out_header() {
        let mut ctx = ctx(Some("gzip"));
        ctx.headers
            .insert("x-no-compression", HeaderValue::from_static("1"));
        let response = stage(0).respond(&ctx, json_response("x".repeat(2048))).await;

        assert!(response.headers().get(header::CONTENT_ENCODING).is_none());
        assert!(response.headers().get(header::VARY).is_none());
    }

    #[tokio::test]
    async fn test_binary_not_compressed() {
        let response = Response::builder()
            .header(header::CONTENT_TYPE, "image/png")
            .body(Body::from(vec![0u8; 4096]))
            .unwrap();
        let response = stage(0).respond(&ctx(Some("gzip")), response).await;
        assert!(response.headers().get(header::CONTENT_ENCODING).is_none());
    }

    #[tokio::test]
    async fn test_partial_content_untouched() {
        let payload = "y".repeat(4096);
        let response = Response::builder()
            .status(StatusCode::PARTIAL_CONTENT)
            .header(header::CONTENT_TYPE, "text/plain")
            .header(header::CONTENT_RANGE, "bytes 0-4095/10000")
            .body(Body::from(payload.clone()))
            .unwrap();
        let response = stage(0).respond(&ctx(Some("gzip")), response).await;

        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert!(response.headers().get(header::CONTENT_ENCODING).is_none());
        assert_eq!(body_bytes(response).await, payload.as_bytes());
    }

    #[tokio::test]
    async fn test_oversized_body_streams_through() {
        let payload = vec![b'z'; MAX_BUFFERED_BYTES + 1];
        let response = Response::builder()
            .header(header::CONTENT_TYPE, "text/plain")
            .body(Body::from(payload.clone()))
            .unwrap();
        let response = stage(0).respond(&ctx(Some("gzip")), response).await;

        assert!(response.headers().get(header::CONTENT_ENCODING).is_none());
        assert!(response.headers().get(header::VARY).is_none());
        assert_eq!(body_bytes(response).await.len(), payload.len());
    }
}
