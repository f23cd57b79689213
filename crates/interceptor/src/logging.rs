//! 请求日志和指标

use std::sync::Arc;

use futures::future::BoxFuture;
use keel_errors::AppError;
use keel_telemetry::MetricsRegistry;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::chain::{Handler, Interceptor};
use crate::context::CallContext;

/// 为每次调用打开一个带请求 ID 的 span，结束时记录耗时和结果
#[derive(Clone, Default)]
pub struct LoggingInterceptor {
    metrics: Option<Arc<MetricsRegistry>>,
}

impl LoggingInterceptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

impl<Req, Resp> Interceptor<Req, Resp> for LoggingInterceptor
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
        let metrics = self.metrics.clone();
        let method = ctx.method.clone();
        let started_at = ctx.started_at;
        let span = info_span!("request", method = %ctx.method, request_id = %ctx.request_id);

        Box::pin(
            async move {
                debug!("Request started");
                let result = next(ctx, req).await;
                let duration_ms = started_at.elapsed().as_secs_f64() * 1000.0;

                let code = match &result {
                    Ok(_) => {
                        info!(duration_ms, "Request completed");
                        "ok"
                    }
                    Err(e) => {
                        let code = e.kind().as_str();
                        warn!(duration_ms, code, error = %e, "Request failed");
                        code
                    }
                };
                if let Some(metrics) = metrics {
                    metrics.record_request(&method, code, duration_ms);
                }
                result
            }
            .instrument(span),
        )
    }
}
