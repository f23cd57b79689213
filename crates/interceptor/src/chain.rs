//! 拦截器链
//!
//! `Chain::build` 在构造时从最内层向外折叠出一个 `Handler`，
//! 每一层只持有自己的下一层，调用时不需要共享游标。

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use keel_errors::AppError;

use crate::context::CallContext;

/// 调用链上的下一层（或最终的真实调用）
pub type Handler<Req, Resp> =
    Arc<dyn Fn(CallContext, Req) -> BoxFuture<'static, Result<Resp, AppError>> + Send + Sync>;

/// 拦截器
///
/// 在 `next` 之前执行的逻辑是前置逻辑，`next` 返回之后执行的是后置逻辑。
/// 不调用 `next` 即短路整个调用。
pub trait Interceptor<Req, Resp>: Send + Sync {
    fn intercept(
        &self,
        ctx: CallContext,
        req: Req,
        next: Handler<Req, Resp>,
    ) -> BoxFuture<'static, Result<Resp, AppError>>;
}

/// 用异步函数构造 `Handler`
pub fn handler_fn<Req, Resp, F, Fut>(f: F) -> Handler<Req, Resp>
where
    F: Fn(CallContext, Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Resp, AppError>> + Send + 'static,
{
    Arc::new(
        move |ctx: CallContext, req: Req| -> BoxFuture<'static, Result<Resp, AppError>> {
            Box::pin(f(ctx, req))
        },
    )
}

/// 用闭包实现的拦截器
pub struct FnInterceptor<F>(F);

/// 用闭包构造拦截器
pub fn interceptor_fn<Req, Resp, F>(f: F) -> FnInterceptor<F>
where
    F: Fn(CallContext, Req, Handler<Req, Resp>) -> BoxFuture<'static, Result<Resp, AppError>>
        + Send
        + Sync,
{
    FnInterceptor(f)
}

impl<Req, Resp, F> Interceptor<Req, Resp> for FnInterceptor<F>
where
    F: Fn(CallContext, Req, Handler<Req, Resp>) -> BoxFuture<'static, Result<Resp, AppError>>
        + Send
        + Sync,
{
    fn intercept(
        &self,
        ctx: CallContext,
        req: Req,
        next: Handler<Req, Resp>,
    ) -> BoxFuture<'static, Result<Resp, AppError>> {
        (self.0)(ctx, req, next)
    }
}

/// 有序的拦截器列表
pub struct Chain<Req, Resp> {
    interceptors: Vec<Arc<dyn Interceptor<Req, Resp>>>,
}

impl<Req, Resp> Chain<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    pub fn new() -> Self {
        Self {
            interceptors: Vec::new(),
        }
    }

    /// 追加到最内层
    pub fn push<I>(mut self, interceptor: I) -> Self
    where
        I: Interceptor<Req, Resp> + 'static,
    {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    pub fn push_arc(mut self, interceptor: Arc<dyn Interceptor<Req, Resp>>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// 以 `invoker` 为最内层构造完整调用
    ///
    /// 空链直接返回 `invoker`。
    pub fn build(&self, invoker: Handler<Req, Resp>) -> Handler<Req, Resp> {
        self.interceptors
            .iter()
            .rev()
            .fold(invoker, |next, interceptor| {
                let interceptor = Arc::clone(interceptor);
                let handler: Handler<Req, Resp> = Arc::new(move |ctx: CallContext, req: Req| {
                    interceptor.intercept(ctx, req, Arc::clone(&next))
                });
                handler
            })
    }
}

impl<Req, Resp> Default for Chain<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<Req, Resp> From<Vec<Arc<dyn Interceptor<Req, Resp>>>> for Chain<Req, Resp> {
    fn from(interceptors: Vec<Arc<dyn Interceptor<Req, Resp>>>) -> Self {
        Self { interceptors }
    }
}

/// 直接调用下一层
struct PassThrough;

impl<Req, Resp> Interceptor<Req, Resp> for PassThrough {
    fn intercept(
        &self,
        ctx: CallContext,
        req: Req,
        next: Handler<Req, Resp>,
    ) -> BoxFuture<'static, Result<Resp, AppError>> {
        next(ctx, req)
    }
}

struct Composite<Req, Resp>(Chain<Req, Resp>);

impl<Req, Resp> Interceptor<Req, Resp> for Composite<Req, Resp>
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
        self.0.build(next)(ctx, req)
    }
}

/// 把多个拦截器合成一个
///
/// 零个时返回直通拦截器，一个时原样返回，多个时返回按顺序嵌套的组合拦截器。
pub fn compose<Req, Resp>(
    mut interceptors: Vec<Arc<dyn Interceptor<Req, Resp>>>,
) -> Arc<dyn Interceptor<Req, Resp>>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    match interceptors.len() {
        0 => Arc::new(PassThrough),
        1 => interceptors.remove(0),
        _ => Arc::new(Composite(Chain::from(interceptors))),
    }
}
