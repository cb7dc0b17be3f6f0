//! In-memory response cache.
//!
//! # Responsibilities
//! - Serve fresh snapshots of earlier `GET` responses (`X-Cache: HIT`)
//! - Store successful `GET` responses on the way out (`X-Cache: MISS`)
//! - Drop every snapshot after a successful write request
//!
//! # Design Decisions
//! - Requests carrying credentials are never cached
//! - Snapshots exclude headers staged by earlier stages; those are
//!   re-staged per request so rate-limit counters stay current
//! - Expiry is checked on read and swept periodically

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    response::Response,
};
use bytes::Bytes;
use dashmap::DashMap;

use crate::http::context::{RequestContext, X_REQUEST_ID};
use crate::observability::metrics;
use crate::pipeline::{Outcome, Stage, StageKind};

const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

#[derive(Debug, Clone)]
struct Snapshot {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    expires_at: Instant,
}

impl Snapshot {
    fn to_response(&self) -> Response {
        let mut response = Response::new(Body::from(self.body.clone()));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers.clone();
        response
    }
}

/// Shared snapshot store.
#[derive(Debug)]
pub struct ResponseCache {
    entries: DashMap<String, Snapshot>,
    ttl: Duration,
    max_entries: usize,
}

impl ResponseCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            max_entries,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn get(&self, key: &str, now: Instant) -> Option<Snapshot> {
        if let Some(snapshot) = self.entries.get(key) {
            if snapshot.expires_at > now {
                return Some(snapshot.clone());
            }
        }
        self.entries.remove_if(key, |_, s| s.expires_at <= now);
        None
    }

    fn insert(&self, key: String, snapshot: Snapshot) -> bool {
        if self.entries.len() >= self.max_entries && !self.entries.contains_key(&key) {
            self.purge_expired(Instant::now());
            if self.entries.len() >= self.max_entries {
                return false;
            }
        }
        self.entries.insert(key, snapshot);
        true
    }

    /// Drop expired snapshots. Returns how many were removed.
    pub fn purge_expired(&self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, s| s.expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Marks a request whose response should be stored under this key.
#[derive(Debug, Clone)]
struct CacheKey(String);

fn is_cacheable_request(ctx: &RequestContext) -> bool {
    ctx.method == Method::GET
        && !ctx.headers.contains_key(header::AUTHORIZATION)
        && !ctx.headers.contains_key(header::COOKIE)
}

fn is_write(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

fn forbids_storage(headers: &HeaderMap) -> bool {
    if headers.contains_key(header::SET_COOKIE) {
        return true;
    }
    headers
        .get_all(header::CACHE_CONTROL)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|d| d.trim().to_ascii_lowercase())
        .any(|d| d == "no-store" || d == "private")
}

pub struct CacheStage {
    cache: Arc<ResponseCache>,
    cache_control: HeaderValue,
}

impl CacheStage {
    pub fn new(cache: Arc<ResponseCache>) -> Self {
        let cache_control = HeaderValue::from_str(&format!(
            "public, max-age={}",
            cache.ttl().as_secs()
        ))
        .unwrap_or_else(|_| HeaderValue::from_static("public"));
        Self {
            cache,
            cache_control,
        }
    }

    fn key(ctx: &RequestContext) -> String {
        match ctx.query_string() {
            Some(q) => format!("{} {}?{}", ctx.method, ctx.path(), q),
            None => format!("{} {}", ctx.method, ctx.path()),
        }
    }
}

#[async_trait]
impl Stage for CacheStage {
    fn kind(&self) -> StageKind {
        StageKind::Cache
    }

    async fn process(&self, ctx: &mut RequestContext) -> Outcome {
        if !is_cacheable_request(ctx) {
            return Outcome::Continue;
        }

        let key = Self::key(ctx);
        match self.cache.get(&key, Instant::now()) {
            Some(snapshot) => {
                metrics::record_cache_lookup(true);
                tracing::trace!(request_id = %ctx.id.as_str(), key = %key, "Cache hit");
                let mut response = snapshot.to_response();
                response
                    .headers_mut()
                    .insert(X_CACHE, HeaderValue::from_static("HIT"));
                Outcome::Terminate(response)
            }
            None => {
                metrics::record_cache_lookup(false);
                ctx.metadata.insert(CacheKey(key));
                Outcome::Continue
            }
        }
    }

    async fn respond(&self, ctx: &RequestContext, response: Response) -> Response {
        if is_write(&ctx.method) && response.status().is_success() && !self.cache.is_empty() {
            tracing::debug!(request_id = %ctx.id.as_str(), "Write succeeded, clearing response cache");
            self.cache.clear();
            return response;
        }

        let Some(CacheKey(key)) = ctx.metadata.get::<CacheKey>() else {
            return response;
        };
        if response.status() != StatusCode::OK || forbids_storage(response.headers()) {
            return response;
        }

        let (mut parts, body) = response.into_parts();
        let body = match axum::body::to_bytes(body, usize::MAX).await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(request_id = %ctx.id.as_str(), error = %e, "Failed to buffer response for caching");
                ctx.cancel.cancel();
                parts.headers.remove(header::CONTENT_LENGTH);
                return Response::from_parts(parts, Body::empty());
            }
        };

        if !parts.headers.contains_key(header::CACHE_CONTROL) {
            parts
                .headers
                .insert(header::CACHE_CONTROL, self.cache_control.clone());
        }

        let mut stored = parts.headers.clone();
        for name in ctx.response_headers.keys() {
            stored.remove(name);
        }
        stored.remove(X_REQUEST_ID);

        let snapshot = Snapshot {
            status: parts.status,
            headers: stored,
            body: body.clone(),
            expires_at: Instant::now() + self.cache.ttl(),
        };
        if !self.cache.insert(key.clone(), snapshot) {
            tracing::debug!(key = %key, "Response cache full, not storing");
        }

        parts.headers.insert(X_CACHE, HeaderValue::from_static("MISS"));
        Response::from_parts(parts, Body::from(body))
    }
}
