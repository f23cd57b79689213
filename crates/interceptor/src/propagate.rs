//! 上下文传递拦截器

use std::sync::Arc;

use futures::future::BoxFuture;
use keel_errors::AppError;
use tracing::error;

use crate::chain::{Handler, Interceptor};
use crate::context::{APP_CTX_KEY, AppContext, CallContext, METADATA_KEY};

/// 服务端：从调用方元数据中解析 `AppContext` 和透传的 `metadata`
///
/// 解析失败只记录日志，不影响请求。
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextInterceptor;

impl<Req, Resp> Interceptor<Req, Resp> for ContextInterceptor
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    fn intercept(
        &self,
        mut ctx: CallContext,
        req: Req,
        next: Handler<Req, Resp>,
    ) -> BoxFuture<'static, Result<Resp, AppError>> {
        if let Some(raw) = ctx.incoming.get(APP_CTX_KEY) {
            match AppContext::from_json(raw) {
                Ok(app) => ctx.app = Some(Arc::new(app)),
                Err(e) => error!(method = %ctx.method, error = %e, "Failed to parse app context"),
            }
        }
        ctx.caller_metadata = ctx.incoming.get(METADATA_KEY).map(str::to_string);

        next(ctx, req)
    }
}

/// 客户端：把收到的元数据合并进发出的元数据，显式设置的条目优先
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientContextInterceptor;

impl<Req, Resp> Interceptor<Req, Resp> for ClientContextInterceptor
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    fn intercept(
        &self,
        mut ctx: CallContext,
        req: Req,
        next: Handler<Req, Resp>,
    ) -> BoxFuture<'static, Result<Resp, AppError>> {
        ctx.outgoing.join(&ctx.incoming);

        next(ctx, req)
    }
}
