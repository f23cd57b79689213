//! 健康检查报告
//!
//! 聚合多个组件的检查结果，供就绪探针和 HTTP 端点使用

use serde::{Deserialize, Serialize};

/// 单个组件的健康状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentHealth {
    /// 组件名称
    pub name: String,
    /// 是否健康
    pub healthy: bool,
    /// 检查耗时（毫秒）
    pub latency_ms: u64,
    /// 错误信息
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ComponentHealth {
    /// 创建健康结果
    pub fn healthy(name: impl Into<String>, latency_ms: u64) -> Self {
        Self {
            name: name.into(),
            healthy: true,
            latency_ms,
            error: None,
        }
    }

    /// 创建不健康结果
    pub fn unhealthy(name: impl Into<String>, latency_ms: u64, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            healthy: false,
            latency_ms,
            error: Some(error.into()),
        }
    }
}

/// 聚合健康报告
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    /// 整体是否健康（所有组件都健康）
    pub healthy: bool,
    /// 各组件状态，顺序与注册顺序一致
    pub components: Vec<ComponentHealth>,
}

impl HealthReport {
    pub fn new() -> Self {
        Self {
            healthy: true,
            components: Vec::new(),
        }
    }

    /// 追加组件状态
    pub fn push(&mut self, component: ComponentHealth) {
        if !component.healthy {
            self.healthy = false;
        }
        self.components.push(component);
    }

    pub fn healthy_count(&self) -> usize {
        self.components.iter().filter(|c| c.healthy).count()
    }

    pub fn total_count(&self) -> usize {
        self.components.len()
    }

    /// 不健康的组件
    pub fn failing(&self) -> impl Iterator<Item = &ComponentHealth> {
        self.components.iter().filter(|c| !c.healthy)
    }

    /// 状态字符串
    pub fn status(&self) -> &'static str {
        if self.healthy { "healthy" } else { "unhealthy" }
    }
}

impl Default for HealthReport {
    fn default() -> Self {
        Self::new()
    }
}

impl FromIterator<ComponentHealth> for HealthReport {
    fn from_iter<I: IntoIterator<Item = ComponentHealth>>(iter: I) -> Self {
        let mut report = Self::new();
        for component in iter {
            report.push(component);
        }
        report
    }
}
