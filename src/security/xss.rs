//! XSS stripping for body and query values.
//!
//! Every string value is run through an `ammonia` cleaner that allows no tags
//! at all: markup is dropped, `<script>` and `<style>` content is removed and
//! the remaining text is HTML-escaped (`&` becomes `&amp;`), then trimmed.
//! Keys are left alone (sanitization handles those). Credential fields are
//! passed through verbatim so stored and submitted passwords always match.

use std::collections::HashSet;

use ammonia::Builder;
use async_trait::async_trait;
use serde_json::Value;

use crate::http::context::RequestContext;
use crate::pipeline::{Outcome, Stage, StageKind};

/// Field names whose values are never rewritten.
const VERBATIM_FIELDS: &[&str] = &["password"];

fn is_verbatim(key: &str) -> bool {
    VERBATIM_FIELDS.iter().any(|f| f.eq_ignore_ascii_case(key))
}

pub struct XssStage {
    cleaner: Builder<'static>,
}

impl XssStage {
    pub fn new() -> Self {
        let mut cleaner = Builder::default();
        cleaner.tags(HashSet::new());
        Self { cleaner }
    }

    pub fn clean(&self, input: &str) -> String {
        self.cleaner.clean(input).to_string().trim().to_string()
    }

    fn clean_value(&self, value: &mut Value) {
        match value {
            Value::String(s) => *s = self.clean(s),
            Value::Array(items) => items.iter_mut().for_each(|v| self.clean_value(v)),
            Value::Object(map) => map
                .iter_mut()
                .filter(|(key, _)| !is_verbatim(key))
                .for_each(|(_, v)| self.clean_value(v)),
            _ => {}
        }
    }
}

impl Default for XssStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Stage for XssStage {
    fn kind(&self) -> StageKind {
        StageKind::Xss
    }

    async fn process(&self, ctx: &mut RequestContext) -> Outcome {
        if let Some(body) = ctx.body.as_json_mut() {
            self.clean_value(body);
        }
        for (key, value) in ctx.query.iter_mut() {
            if !is_verbatim(key) {
                *value = self.clean(value);
            }
        }
        Outcome::Continue
    }
}
