//! keel-bootstrap - 统一服务启动骨架
//!
//! 所有服务复用的启动逻辑：初始化日志、按顺序初始化并启动资源、
//! 提供健康检查 HTTP 端点、收到信号后在限定时间内停止。

mod app;
mod error;
mod health;
mod runtime;

pub use app::*;
pub use error::*;
pub use health::*;
pub use runtime::*;
