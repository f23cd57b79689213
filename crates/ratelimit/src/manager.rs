//! 限流管理器

use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroU32;
use std::time::Duration;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use keel_config::{RateLimitConfig, UnknownOperationPolicy};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::error::RateLimitError;

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// 按操作名划分的限流管理器
///
/// 构造完成后映射表只读，每个限流器自身是线程安全的，
/// 因此可以直接放进 `Arc` 在多个请求之间共享。
pub struct RateLimitManager {
    limiters: HashMap<String, DefaultDirectRateLimiter>,
    timeout: Duration,
    poll_interval: Duration,
    unknown_operation: UnknownOperationPolicy,
}

impl RateLimitManager {
    pub fn new(config: &RateLimitConfig) -> Result<Self, RateLimitError> {
        let burst = NonZeroU32::new(config.burst).ok_or(RateLimitError::InvalidBurst)?;

        let mut limiters = HashMap::with_capacity(config.method_capacity.len());
        for (operation, &capacity) in &config.method_capacity {
            let quota = quota(operation, capacity, burst)?;
            limiters.insert(operation.clone(), RateLimiter::direct(quota));
        }

        info!(
            operations = limiters.len(),
            burst = config.burst,
            timeout_ms = config.timeout_ms,
            "Rate limit manager created"
        );

        Ok(Self {
            limiters,
            timeout: config.timeout(),
            poll_interval: config.poll_interval().max(MIN_POLL_INTERVAL),
            unknown_operation: config.unknown_operation,
        })
    }

    /// 慢路径的最长等待时间
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// 已配置限流的操作名
    pub fn operations(&self) -> impl Iterator<Item = &str> {
        self.limiters.keys().map(String::as_str)
    }

    /// 检查每个操作都配置了限流器
    ///
    /// 服务启动时调用，把缺失的配置提前暴露出来，而不是等到第一个请求。
    pub fn validate_operations<I, S>(&self, operations: I) -> Result<(), RateLimitError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for operation in operations {
            let operation = operation.as_ref();
            if !self.limiters.contains_key(operation) {
                return Err(RateLimitError::UnknownOperation(operation.to_string()));
            }
        }
        Ok(())
    }

    fn limiter(&self, operation: &str) -> Result<Option<&DefaultDirectRateLimiter>, RateLimitError> {
        match self.limiters.get(operation) {
            Some(limiter) => Ok(Some(limiter)),
            None => match self.unknown_operation {
                UnknownOperationPolicy::Reject => {
                    Err(RateLimitError::UnknownOperation(operation.to_string()))
                }
                UnknownOperationPolicy::Allow => Ok(None),
            },
        }
    }

    /// 只尝试立即取一个令牌，不等待
    pub fn try_allow(&self, operation: &str) -> Result<bool, RateLimitError> {
        match self.limiter(operation)? {
            Some(limiter) => Ok(limiter.check().is_ok()),
            None => Ok(true),
        }
    }

    /// 取一个令牌，必要时最多等待 `timeout`
    ///
    /// 返回 `Ok(false)` 表示被限流。等待是按 `poll_interval` 轮询，
    /// 多个等待者之间没有先后保证。丢弃返回的 future 即可取消等待。
    pub async fn allow(&self, operation: &str) -> Result<bool, RateLimitError> {
        let Some(limiter) = self.limiter(operation)? else {
            return Ok(true);
        };

        if limiter.check().is_ok() {
            return Ok(true);
        }

        let poll = async {
            let mut ticker = tokio::time::interval(self.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // 第一次 tick 立即完成
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if limiter.check().is_ok() {
                    return;
                }
            }
        };

        let admitted = tokio::time::timeout(self.timeout, poll).await.is_ok();
        if !admitted {
            debug!(operation, timeout_ms = self.timeout.as_millis() as u64, "Rate limit exceeded");
        }
        Ok(admitted)
    }
}

impl fmt::Debug for RateLimitManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut operations: Vec<_> = self.operations().collect();
        operations.sort_unstable();
        f.debug_struct("RateLimitManager")
            .field("operations", &operations)
            .field("timeout", &self.timeout)
            .field("poll_interval", &self.poll_interval)
            .field("unknown_operation", &self.unknown_operation)
            .finish()
    }
}

const MIN_REPLENISH_PERIOD: Duration = Duration::from_nanos(1);

/// 每秒 `capacity` 个令牌，即每 `1 / capacity` 秒补充一个
///
/// 补充周期最小为 1ns，超过 1e9/s 的容量按 1e9/s 处理。
fn quota(operation: &str, capacity: f64, burst: NonZeroU32) -> Result<Quota, RateLimitError> {
    let invalid = || RateLimitError::InvalidCapacity {
        operation: operation.to_string(),
        capacity,
    };

    if !capacity.is_finite() || capacity <= 0.0 {
        return Err(invalid());
    }

    let period = Duration::try_from_secs_f64(1.0 / capacity)
        .map_err(|_| invalid())?
        .max(MIN_REPLENISH_PERIOD);
    let quota = Quota::with_period(period).ok_or_else(invalid)?;
    Ok(quota.allow_burst(burst))
}
