//! Builds the production pipeline from configuration.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::{ErrorHandler, Pipeline, PipelineError};
use crate::config::AppConfig;
use crate::http::{
    CacheStage, CompressPredicate, CompressionStage, FileUploadStage, JsonBodyStage,
    ResponseCache, StaticFilesStage,
};
use crate::observability::request_log::RequestLogStage;
use crate::routes::{api_router, AppState, RouteStage};
use crate::security::{
    CorsStage, ParamPollutionStage, RateLimitStage, RateLimiterState, SanitizeStage,
    SecurityHeadersStage, XssStage,
};

/// The pipeline plus the shared state background sweepers need.
pub struct Assembly {
    pub pipeline: Arc<Pipeline>,
    pub rate_limiter: Option<Arc<RateLimiterState>>,
    pub cache: Arc<ResponseCache>,
}

/// Directory avatar uploads are written to, under the static root.
pub fn uploads_dir(config: &AppConfig) -> PathBuf {
    PathBuf::from(&config.server.static_root).join("uploads")
}

/// Compose every stage in canonical order.
pub fn assemble(
    config: &AppConfig,
    state: AppState,
    compress: Option<CompressPredicate>,
) -> Result<Assembly, PipelineError> {
    let rate_limiter = config.rate_limit.enabled.then(|| {
        Arc::new(RateLimiterState::new(
            Duration::from_millis(config.rate_limit.window_ms),
            config.rate_limit.max,
        ))
    });
    let cache = Arc::new(ResponseCache::new(
        Duration::from_secs(config.cache.ttl_secs),
        config.cache.max_entries,
    ));
    let development = config.environment.is_development();

    let mut builder = Pipeline::builder(ErrorHandler::new(development))
        .stage(CompressionStage::new(compress, &config.compression))?
        .stage(JsonBodyStage::new(config.body.json_limit_bytes))?
        .stage_if(development, RequestLogStage::new)?
        .stage(FileUploadStage::new(config.body.upload_limit_bytes))?
        .stage(SanitizeStage::new(config.sanitize.replace_with.clone()))?
        .stage(SecurityHeadersStage::new())?
        .stage(XssStage::new())?;
    if let Some(limiter) = &rate_limiter {
        builder = builder.stage(RateLimitStage::new(limiter.clone()))?;
    }
    let pipeline = builder
        .stage(ParamPollutionStage::new(
            config.param_pollution.whitelist.iter().cloned(),
        ))?
        .stage(CorsStage::new(&config.cors))?
        .stage(StaticFilesStage::new(&config.server.static_root))?
        .stage(CacheStage::new(cache.clone()))?
        .stage(RouteStage::new(api_router(state)))?
        .build()?;

    tracing::info!(
        stages = ?pipeline.kinds().iter().map(|k| k.name()).collect::<Vec<_>>(),
        "Pipeline assembled"
    );

    Ok(Assembly {
        pipeline: Arc::new(pipeline),
        rate_limiter,
        cache,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Environment;
    use crate::pipeline::StageKind;

    async fn state(config: &AppConfig) -> AppState {
        AppState {
            db: crate::db::memory().await,
            uploads_dir: uploads_dir(config),
        }
    }

    #[tokio::test]
    async fn test_canonical_order_in_development() {
        let config = AppConfig {
            environment: Environment::Development,
            ..AppConfig::default()
        };
        let assembly = assemble(&config, state(&config).await, None).unwrap();

        assert_eq!(
            assembly.pipeline.kinds(),
            vec![
                StageKind::Compression,
                StageKind::BodyParser,
                StageKind::RequestLogger,
                StageKind::FileUpload,
                StageKind::Sanitize,
                StageKind::SecurityHeaders,
                StageKind::Xss,
                StageKind::RateLimit,
                StageKind::ParamPollution,
                StageKind::Cors,
                StageKind::StaticFiles,
                StageKind::Cache,
                StageKind::Routes,
            ]
        );
    }

    #[tokio::test]
    async fn test_optional_stages_dropped() {
        let mut config = AppConfig::default();
        config.rate_limit.enabled = false;
        let assembly = assemble(&config, state(&config).await, None).unwrap();

        let kinds = assembly.pipeline.kinds();
        assert!(!kinds.contains(&StageKind::RequestLogger));
        assert!(!kinds.contains(&StageKind::RateLimit));
        assert!(assembly.rate_limiter.is_none());
    }
}
