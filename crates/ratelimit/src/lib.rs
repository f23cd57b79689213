//! keel-ratelimit - 按操作划分的令牌桶限流
//!
//! 每个操作一个独立的令牌桶：补充速率为配置的容量（令牌/秒），桶大小为 burst。
//! `allow` 先尝试立即取令牌，取不到时按固定间隔轮询，直到拿到令牌或超时。

mod error;
mod manager;

pub use error::RateLimitError;
pub use keel_config::{RateLimitConfig, UnknownOperationPolicy};
pub use manager::RateLimitManager;
