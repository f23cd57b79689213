use thiserror::Error;

/// 限流配置错误
///
/// 被限流不是错误，由 `allow` 返回 `Ok(false)` 表示。
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RateLimitError {
    #[error("invalid capacity {capacity} for operation {operation}, must be a positive finite number")]
    InvalidCapacity { operation: String, capacity: f64 },

    #[error("burst must be greater than zero")]
    InvalidBurst,

    #[error("no rate limit configured for operation {0}")]
    UnknownOperation(String),
}
