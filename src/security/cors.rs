//! Cross-origin resource sharing.
//!
//! The policy is a `tower_http` [`CorsLayer`] built from [`CorsConfig`]. The
//! stage runs it against a body-less copy of the request: preflight requests
//! are answered by the layer and never reach later stages, every other request
//! gets the layer's `Access-Control-*` headers staged for the eventual response.

use std::convert::Infallible;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, HeaderValue, Method, Request, StatusCode},
    response::Response,
};
use tower::{service_fn, Layer, ServiceExt};
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};

use crate::config::CorsConfig;
use crate::http::context::RequestContext;
use crate::pipeline::{Outcome, Stage, StageKind};

const ALLOWED_METHODS: [Method; 6] = [
    Method::GET,
    Method::HEAD,
    Method::PUT,
    Method::PATCH,
    Method::POST,
    Method::DELETE,
];

/// Set on responses the layer passed through, i.e. anything but a preflight.
#[derive(Debug, Clone, Copy)]
struct PassedThrough;

#[derive(Debug, Clone)]
pub struct CorsStage {
    layer: CorsLayer,
}

impl CorsStage {
    pub fn new(config: &CorsConfig) -> Self {
        let origin = if config.allow_origins.iter().any(|o| o == "*") {
            AllowOrigin::any()
        } else {
            let origins: Vec<HeaderValue> = config
                .allow_origins
                .iter()
                .filter_map(|o| o.trim().parse().ok())
                .collect();
            AllowOrigin::list(origins)
        };

        let layer = CorsLayer::new()
            .allow_origin(origin)
            .allow_methods(ALLOWED_METHODS)
            .allow_headers(AllowHeaders::mirror_request());
        Self { layer }
    }
}

#[async_trait]
impl Stage for CorsStage {
    fn kind(&self) -> StageKind {
        StageKind::Cors
    }

    async fn process(&self, ctx: &mut RequestContext) -> Outcome {
        let request = match ctx.probe_request() {
            Ok(request) => request,
            Err(err) => return Outcome::Fail(err),
        };

        let service = Layer::layer(&self.layer, service_fn(|_: Request<Body>| async {
            let mut response = Response::new(Body::empty());
            response.extensions_mut().insert(PassedThrough);
            Ok::<_, Infallible>(response)
        }));
        let response = match service.oneshot(request).await {
            Ok(response) => response,
            Err(never) => match never {},
        };

        if response.extensions().get::<PassedThrough>().is_none() {
            let (mut parts, _) = response.into_parts();
            parts.status = StatusCode::NO_CONTENT;
            parts
                .headers
                .insert(header::CONTENT_LENGTH, HeaderValue::from_static("0"));
            return Outcome::Terminate(Response::from_parts(parts, Body::empty()));
        }

        for (name, value) in response.headers() {
            ctx.set_response_header(name.clone(), value.clone());
        }
        Outcome::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(method: Method, headers: &[(&str, &str)]) -> RequestContext {
        let mut builder = Request::builder().method(method).uri("/api/v1/users");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        RequestContext::from_request(builder.body(Body::empty()).unwrap())
    }

    fn any_origin() -> CorsStage {
        CorsStage::new(&CorsConfig::default())
    }

    #[tokio::test]
    async fn test_preflight_short_circuits() {
        let mut ctx = ctx(
            Method::OPTIONS,
            &[
                ("origin", "https://app.example.com"),
                ("access-control-request-method", "POST"),
                ("access-control-request-headers", "content-type"),
            ],
        );

        let Outcome::Terminate(response) = any_origin().process(&mut ctx).await else {
            panic!("preflight should terminate");
        };
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let headers = response.headers();
        assert_eq!(headers.get("access-control-allow-origin").unwrap(), "*");
        let methods = headers
            .get("access-control-allow-methods")
            .unwrap()
            .to_str()
            .unwrap();
        assert!(methods.contains("PATCH") && methods.contains("DELETE"));
        assert_eq!(
            headers.get("access-control-allow-headers").unwrap(),
            "content-type"
        );
    }

    #[tokio::test]
    async fn test_any_options_is_answered() {
        let mut ctx = ctx(Method::OPTIONS, &[("origin", "https://a.example")]);
        let outcome = any_origin().process(&mut ctx).await;
        assert!(matches!(outcome, Outcome::Terminate(_)));
    }

    #[tokio::test]
    async fn test_stages_allow_origin() {
        let mut ctx = ctx(Method::GET, &[("origin", "https://a.example")]);
        let outcome = any_origin().process(&mut ctx).await;

        assert!(matches!(outcome, Outcome::Continue));
        assert_eq!(
            ctx.response_headers.get("access-control-allow-origin").unwrap(),
            "*"
        );
    }

    #[tokio::test]
    async fn test_origin_list() {
        let stage = CorsStage::new(&CorsConfig {
            allow_origins: vec!["https://a.example".into()],
        });

        let mut allowed = ctx(Method::GET, &[("origin", "https://a.example")]);
        stage.process(&mut allowed).await;
        assert_eq!(
            allowed.response_headers.get("access-control-allow-origin").unwrap(),
            "https://a.example"
        );
        let vary = allowed.response_headers.get("vary").unwrap().to_str().unwrap();
        assert!(vary.to_ascii_lowercase().contains("origin"));

        let mut denied = ctx(Method::GET, &[("origin", "https://evil.example")]);
        stage.process(&mut denied).await;
        assert!(denied
            .response_headers
            .get("access-control-allow-origin")
            .is_none());
    }
}
