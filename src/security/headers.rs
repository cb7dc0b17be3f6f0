//! Security response headers.
//!
//! # Responsibilities
//! - Stage a fixed set of hardening headers on every response
//!
//! # Design Decisions
//! - No per-request decisions; the set is static
//! - Headers are staged on the context so short-circuit and error responses
//!   carry them too
//! - A response that sets one of these headers itself keeps its own value

use async_trait::async_trait;
use axum::http::{HeaderName, HeaderValue};

use crate::http::context::RequestContext;
use crate::pipeline::{Outcome, Stage, StageKind};

const CONTENT_SECURITY_POLICY: &str = "default-src 'self';base-uri 'self';font-src 'self' https: data:;\
form-action 'self';frame-ancestors 'self';img-src 'self' data:;object-src 'none';script-src 'self';\
script-src-attr 'none';style-src 'self' https: 'unsafe-inline';upgrade-insecure-requests";

/// The fixed header set, in the order it is applied.
pub const SECURITY_HEADERS: &[(&str, &str)] = &[
    ("content-security-policy", CONTENT_SECURITY_POLICY),
    ("cross-origin-opener-policy", "same-origin"),
    ("cross-origin-resource-policy", "same-origin"),
    ("origin-agent-cluster", "?1"),
    ("referrer-policy", "no-referrer"),
    ("strict-transport-security", "max-age=15552000; includeSubDomains"),
    ("x-content-type-options", "nosniff"),
    ("x-dns-prefetch-control", "off"),
    ("x-download-options", "noopen"),
    ("x-frame-options", "SAMEORIGIN"),
    ("x-permitted-cross-domain-policies", "none"),
    ("x-xss-protection", "0"),
];

#[derive(Debug)]
pub struct SecurityHeadersStage {
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl SecurityHeadersStage {
    pub fn new() -> Self {
        let headers = SECURITY_HEADERS
            .iter()
            .map(|(name, value)| {
                (
                    HeaderName::from_static(name),
                    HeaderValue::from_static(value),
                )
            })
            .collect();
        Self { headers }
    }
}

impl Default for SecurityHeadersStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Stage for SecurityHeadersStage {
    fn kind(&self) -> StageKind {
        StageKind::SecurityHeaders
    }

    async fn process(&self, ctx: &mut RequestContext) -> Outcome {
        for (name, value) in &self.headers {
            ctx.set_response_header(name.clone(), value.clone());
        }
        Outcome::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request};

    #[tokio::test]
    async fn test_stages_every_header() {
        let mut ctx =
            RequestContext::from_request(Request::builder().uri("/").body(Body::empty()).unwrap());
        let outcome = SecurityHeadersStage::new().process(&mut ctx).await;

        assert!(matches!(outcome, Outcome::Continue));
        assert_eq!(ctx.response_headers.len(), SECURITY_HEADERS.len());
        assert_eq!(
            ctx.response_headers.get("x-content-type-options").unwrap(),
            "nosniff"
        );
        assert_eq!(ctx.response_headers.get("x-frame-options").unwrap(), "SAMEORIGIN");
    }
}
