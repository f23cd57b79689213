//! keel-config - 配置加载库
//!
//! 所有配置都是带默认值的显式结构体，加载顺序：
//! `{dir}/default.toml` → `{dir}/{APP_ENV}.toml` → `KEEL_` 前缀环境变量（`__` 分隔层级）

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 环境变量前缀
pub const ENV_PREFIX: &str = "KEEL_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    Load(#[from] figment::Error),

    #[error("Invalid address {addr}: {source}")]
    InvalidAddress {
        addr: String,
        source: std::net::AddrParseError,
    },
}

/// 未配置限流的操作如何处理
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownOperationPolicy {
    /// 视为配置错误
    #[default]
    Reject,
    /// 直接放行
    Allow,
}

/// 限流配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// 操作名 → 每秒令牌数
    #[serde(default)]
    pub method_capacity: HashMap<String, f64>,
    /// 慢路径最长等待时间（毫秒）
    #[serde(default = "default_rate_limit_timeout_ms")]
    pub timeout_ms: u64,
    /// 令牌桶容量
    #[serde(default = "default_burst")]
    pub burst: u32,
    /// 慢路径轮询间隔（毫秒）
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub unknown_operation: UnknownOperationPolicy,
}

fn default_rate_limit_timeout_ms() -> u64 {
    500
}

fn default_burst() -> u32 {
    10
}

fn default_poll_interval_ms() -> u64 {
    10
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            method_capacity: HashMap::new(),
            timeout_ms: default_rate_limit_timeout_ms(),
            burst: default_burst(),
            poll_interval_ms: default_poll_interval_ms(),
            unknown_operation: UnknownOperationPolicy::default(),
        }
    }
}

impl RateLimitConfig {
    /// 设置某个操作的容量（每秒令牌数）
    pub fn with_method_capacity(mut self, method: impl Into<String>, capacity: f64) -> Self {
        self.method_capacity.insert(method.into(), capacity);
        self
    }

    /// 设置慢路径等待时间
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_burst(mut self, burst: u32) -> Self {
        self.burst = burst;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_unknown_operation(mut self, policy: UnknownOperationPolicy) -> Self {
        self.unknown_operation = policy;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// 关闭配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// 整个 Stop 阶段的超时（秒）
    #[serde(default = "default_shutdown_timeout_secs")]
    pub timeout_secs: u64,
    /// 后台任务排空超时（秒）
    #[serde(default = "default_shutdown_timeout_secs")]
    pub drain_timeout_secs: u64,
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_shutdown_timeout_secs(),
            drain_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

impl ShutdownConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    /// 健康检查 / metrics HTTP 端口
    #[serde(default = "default_health_port")]
    pub health_port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_health_port() -> u16 {
    4014
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            health_port: default_health_port(),
        }
    }
}

impl ServerConfig {
    /// 健康检查服务监听地址
    pub fn health_addr(&self) -> Result<SocketAddr, ConfigError> {
        let addr = format!("{}:{}", self.host, self.health_port);
        addr.parse()
            .map_err(|source| ConfigError::InvalidAddress { addr, source })
    }
}

/// 遥测配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub app_name: String,
    #[serde(default = "default_app_env")]
    pub app_env: String,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

fn default_app_env() -> String {
    "development".to_string()
}

impl AppConfig {
    /// 除应用名外全部使用默认值
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            app_env: default_app_env(),
            server: ServerConfig::default(),
            telemetry: TelemetryConfig::default(),
            rate_limit: RateLimitConfig::default(),
            shutdown: ShutdownConfig::default(),
        }
    }

    /// 从配置文件和环境变量加载配置
    pub fn load(config_dir: &str) -> Result<Self, ConfigError> {
        Ok(Self::figment(config_dir).extract()?)
    }

    /// 构建配置来源，便于调用方追加自己的 provider
    pub fn figment(config_dir: &str) -> Figment {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| default_app_env());

        Figment::new()
            .merge(Toml::file(format!("{}/default.toml", config_dir)))
            .merge(Toml::file(format!("{}/{}.toml", config_dir, env)))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// 是否为生产环境
    pub fn is_production(&self) -> bool {
        self.app_env == "production"
    }

    /// 是否为开发环境
    pub fn is_development(&self) -> bool {
        self.app_env == "development"
    }
}
