//! keel-interceptor - 请求拦截器链
//!
//! 拦截器按洋葱模型组合：`interceptors[0]` 包裹 `interceptors[1]` ……
//! 最内层是真正的调用。前置逻辑按声明顺序执行，后置逻辑按相反顺序执行。
//!
//! 请求级的环境（方法名、元数据、应用上下文）通过显式的 `CallContext` 传递。

mod chain;
mod context;
mod logging;
mod propagate;
mod ratelimit;
mod recovery;

pub use chain::*;
pub use context::*;
pub use logging::LoggingInterceptor;
pub use propagate::{ClientContextInterceptor, ContextInterceptor};
pub use ratelimit::{RATE_LIMIT_MESSAGE, RateLimitInterceptor};
pub use recovery::{INTERNAL_ERROR_MESSAGE, RecoveryInterceptor};

pub use keel_errors::AppError;
