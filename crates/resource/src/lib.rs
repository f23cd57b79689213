//! keel-resource - 资源生命周期编排
//!
//! - `Resource`：带名称、初始化、启动、停止、健康检查的子系统契约
//! - `ResourceManager`：按注册顺序初始化、并发启动（失败回滚）、顺序停止
//! - `TaskManager`：共享取消信号、隔离 panic、有界排空的后台任务管理器

mod error;
mod manager;
mod resource;
mod task;

pub use error::*;
pub use keel_common::BoxError;
pub use manager::*;
pub use resource::*;
pub use task::*;

pub use tokio_util::sync::CancellationToken;
