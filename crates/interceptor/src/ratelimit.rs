//! 限流拦截器

use std::sync::Arc;

use futures::future::BoxFuture;
use keel_errors::AppError;
use keel_ratelimit::RateLimitManager;
use keel_telemetry::MetricsRegistry;
use tracing::{error, warn};

use crate::chain::{Handler, Interceptor};
use crate::context::CallContext;

/// 被限流时返回给调用方的消息
pub const RATE_LIMIT_MESSAGE: &str = "rate limit exceeded";

/// 按方法名限流，服务端和客户端通用
#[derive(Clone)]
pub struct RateLimitInterceptor {
    manager: Arc<RateLimitManager>,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl RateLimitInterceptor {
    pub fn new(manager: Arc<RateLimitManager>) -> Self {
        Self {
            manager,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

impl<Req, Resp> Interceptor<Req, Resp> for RateLimitInterceptor
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    fn intercept(
        &self,
        ctx: CallContext,
        req: Req,
        next: Handler<Req, Resp>,
    ) -> BoxFuture<'static, Result<Resp, AppError>> {
        let manager = Arc::clone(&self.manager);
        let metrics = self.metrics.clone();

        Box::pin(async move {
            match manager.allow(&ctx.method).await {
                Ok(true) => next(ctx, req).await,
                Ok(false) => {
                    warn!(method = %ctx.method, request_id = %ctx.request_id, "Request rate limited");
                    if let Some(metrics) = metrics {
                        metrics.record_rate_limited(&ctx.method);
                    }
                    Err(AppError::resource_exhausted(RATE_LIMIT_MESSAGE))
                }
                Err(e) => {
                    error!(method = %ctx.method, error = %e, "Rate limit misconfigured");
                    Err(AppError::internal(e.to_string()))
                }
            }
        })
    }
}
