//! common - 通用类型和工具库

pub mod health;
pub mod panic;

pub use health::*;
pub use panic::*;

/// 资源、任务等边界上传递的通用错误类型
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
