//! HTTP parameter pollution protection.
//!
//! A key repeated in the query string collapses to its last value, unless the
//! key is whitelisted. The collapsed-away values stay reachable through
//! [`PollutedQuery`] in the request extensions.

use std::collections::HashSet;

use async_trait::async_trait;

use crate::http::context::RequestContext;
use crate::pipeline::{Outcome, Stage, StageKind};

/// Every value of each key that was collapsed, in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollutedQuery(pub Vec<(String, String)>);

#[derive(Debug, Default)]
pub struct ParamPollutionStage {
    whitelist: HashSet<String>,
}

impl ParamPollutionStage {
    pub fn new<I, S>(whitelist: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            whitelist: whitelist.into_iter().map(Into::into).collect(),
        }
    }

    /// Collapse repeated keys in place and return every value of the keys
    /// that were collapsed.
    fn collapse(&self, query: &mut Vec<(String, String)>) -> Vec<(String, String)> {
        let mut counts = std::collections::HashMap::<&str, usize>::new();
        for (key, _) in query.iter() {
            *counts.entry(key.as_str()).or_default() += 1;
        }
        let repeated: HashSet<String> = counts
            .into_iter()
            .filter(|(key, n)| *n > 1 && !self.whitelist.contains(*key))
            .map(|(key, _)| key.to_string())
            .collect();

        if repeated.is_empty() {
            return Vec::new();
        }

        let polluted: Vec<(String, String)> = query
            .iter()
            .filter(|(key, _)| repeated.contains(key))
            .cloned()
            .collect();

        // Walk from the back so the last occurrence is the one kept.
        let mut seen = HashSet::new();
        let mut kept: Vec<(String, String)> = query
            .drain(..)
            .rev()
            .filter(|(key, _)| !repeated.contains(key) || seen.insert(key.clone()))
            .collect();
        kept.reverse();
        *query = kept;

        polluted
    }
}

#[async_trait]
impl Stage for ParamPollutionStage {
    fn kind(&self) -> StageKind {
        StageKind::ParamPollution
    }

    async fn process(&self, ctx: &mut RequestContext) -> Outcome {
        let polluted = self.collapse(&mut ctx.query);
        if !polluted.is_empty() {
            tracing::debug!(
                request_id = %ctx.id.as_str(),
                keys = polluted.len(),
                "Collapsed repeated query parameters"
            );
            ctx.metadata.insert(PollutedQuery(polluted));
        }
        Outcome::Continue
    }
}
