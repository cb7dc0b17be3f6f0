//! Operator-injection sanitization.
//!
//! Keys that start with `$` or contain `.` can change the meaning of a
//! downstream query. They are removed from the JSON body (at any depth), the
//! query string and the header map before anything else reads them.

use async_trait::async_trait;
use axum::http::HeaderName;
use serde_json::{Map, Value};

use crate::http::context::RequestContext;
use crate::observability::metrics;
use crate::pipeline::{Outcome, Stage, StageKind};

#[derive(Debug, Default)]
pub struct SanitizeStage {
    replace_with: Option<String>,
}

impl SanitizeStage {
    pub fn new(replace_with: Option<String>) -> Self {
        Self { replace_with }
    }

    /// New name for an offending key, or `None` to drop it.
    fn rename(&self, key: &str) -> Option<String> {
        let replacement = self.replace_with.as_deref()?;
        let renamed = key.replace(['$', '.'], replacement);
        (!renamed.is_empty() && !is_prohibited(&renamed)).then_some(renamed)
    }

    fn sanitize_value(&self, value: &mut Value) -> usize {
        match value {
            Value::Object(map) => self.sanitize_object(map),
            Value::Array(items) => items.iter_mut().map(|v| self.sanitize_value(v)).sum(),
            _ => 0,
        }
    }

    fn sanitize_object(&self, map: &mut Map<String, Value>) -> usize {
        let mut removed = 0;
        let offending: Vec<String> = map.keys().filter(|k| is_prohibited(k)).cloned().collect();
        for key in offending {
            if let Some(value) = map.remove(&key) {
                removed += 1;
                if let Some(renamed) = self.rename(&key) {
                    map.insert(renamed, value);
                }
            }
        }
        removed + map.values_mut().map(|v| self.sanitize_value(v)).sum::<usize>()
    }

    fn sanitize_query(&self, query: &mut Vec<(String, String)>) -> usize {
        let before = query.len();
        let mut renamed = 0;
        query.retain_mut(|(key, _)| {
            if !is_prohibited_query_key(key) {
                return true;
            }
            match self.rename(key) {
                Some(new_key) => {
                    renamed += 1;
                    *key = new_key;
                    true
                }
                None => false,
            }
        });
        before - query.len() + renamed
    }
}

fn is_prohibited(key: &str) -> bool {
    key.starts_with('$') || key.contains('.')
}

/// Query keys may use bracket notation (`filter[$gt]`); every segment counts.
fn is_prohibited_query_key(key: &str) -> bool {
    key.split(['[', ']'])
        .filter(|segment| !segment.is_empty())
        .any(is_prohibited)
}

#[async_trait]
impl Stage for SanitizeStage {
    fn kind(&self) -> StageKind {
        StageKind::Sanitize
    }

    async fn process(&self, ctx: &mut RequestContext) -> Outcome {
        let mut removed = 0;

        if let Some(body) = ctx.body.as_json_mut() {
            removed += self.sanitize_value(body);
        }
        removed += self.sanitize_query(&mut ctx.query);

        let bad_headers: Vec<HeaderName> = ctx
            .headers
            .keys()
            .filter(|name| is_prohibited(name.as_str()))
            .cloned()
            .collect();
        for name in bad_headers {
            ctx.headers.remove(&name);
            removed += 1;
        }

        if removed > 0 {
            tracing::warn!(
                request_id = %ctx.id.as_str(),
                path = %ctx.path(),
                removed,
                "Sanitized operator-injection keys"
            );
            metrics::record_sanitized(removed);
        }
        Outcome::Continue
    }
}
