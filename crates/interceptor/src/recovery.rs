//! Panic 恢复拦截器

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use keel_common::{PanicHook, PanicReport, install_panic_hook};
use keel_errors::AppError;
use keel_telemetry::MetricsRegistry;
use tracing::error;

use crate::chain::{Handler, Interceptor};
use crate::context::CallContext;

/// panic 时返回给调用方的消息，不暴露内部细节
pub const INTERNAL_ERROR_MESSAGE: &str = "server internal error";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Server,
    Client,
}

impl Side {
    fn as_str(self) -> &'static str {
        match self {
            Self::Server => "grpc server",
            Self::Client => "grpc client",
        }
    }
}

/// 把下游的 panic 转换为 `AppError::Internal`，并记录所有错误
#[derive(Clone)]
pub struct RecoveryInterceptor {
    side: Side,
    panic_hook: Option<PanicHook>,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl RecoveryInterceptor {
    pub fn server() -> Self {
        Self::new(Side::Server)
    }

    pub fn client() -> Self {
        Self::new(Side::Client)
    }

    fn new(side: Side) -> Self {
        install_panic_hook();
        Self {
            side,
            panic_hook: None,
            metrics: None,
        }
    }

    /// panic 上报回调，例如接入崩溃收集服务
    pub fn with_panic_hook(mut self, hook: PanicHook) -> Self {
        self.panic_hook = Some(hook);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

impl<Req, Resp> Interceptor<Req, Resp> for RecoveryInterceptor
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
        let side = self.side;
        let hook = self.panic_hook.clone();
        let metrics = self.metrics.clone();
        let method = ctx.method.clone();
        let request_id = ctx.request_id.clone();

        Box::pin(async move {
            let outcome = AssertUnwindSafe(async move { next(ctx, req).await })
                .catch_unwind()
                .await;

            match outcome {
                Ok(Ok(resp)) => Ok(resp),
                Ok(Err(e)) => {
                    error!(
                        method = %method,
                        request_id = %request_id,
                        code = e.kind().as_str(),
                        error = %e,
                        "{} error",
                        side.as_str()
                    );
                    Err(e)
                }
                Err(payload) => {
                    let origin = method.trim_matches('/');
                    PanicReport::capture(origin, payload.as_ref())
                        .report(side.as_str(), hook.as_ref());
                    if let Some(metrics) = metrics {
                        metrics.record_panic(origin);
                    }
                    Err(AppError::internal(INTERNAL_ERROR_MESSAGE))
                }
            }
        })
    }
}
