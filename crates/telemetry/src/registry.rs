//! 指标注册表
//!
//! 由进程启动时创建，通过 `Arc` 传给需要打点的组件，随进程退出销毁

use std::collections::BTreeMap;

use metrics::{Key, Label, Level, Metadata, Recorder};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle, PrometheusRecorder};

/// 请求总数
pub const REQUESTS_TOTAL: &str = "keel_requests_total";
/// 请求耗时
pub const REQUEST_DURATION_MS: &str = "keel_request_duration_ms";
/// 被限流的请求数
pub const RATE_LIMITED_TOTAL: &str = "keel_rate_limited_total";
/// 被捕获的 panic 数
pub const PANICS_TOTAL: &str = "keel_panics_total";

/// 一次指标事件
#[derive(Debug, Clone, Default)]
pub struct MetricEvent {
    pub name: String,
    /// 标签，按 key 排序
    pub labels: BTreeMap<String, String>,
    pub value: u64,
}

impl MetricEvent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            labels: BTreeMap::new(),
            value: 1,
        }
    }

    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn value(mut self, value: u64) -> Self {
        self.value = value;
        self
    }
}

/// Prometheus 指标注册表
pub struct MetricsRegistry {
    recorder: PrometheusRecorder,
    handle: PrometheusHandle,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        Self { recorder, handle }
    }

    fn metadata() -> Metadata<'static> {
        Metadata::new(module_path!(), Level::INFO, Some(module_path!()))
    }

    fn key(name: &str, labels: &BTreeMap<String, String>) -> Key {
        let labels: Vec<Label> = labels
            .iter()
            .map(|(k, v)| Label::new(k.clone(), v.clone()))
            .collect();
        Key::from_parts(name.to_string(), labels)
    }

    /// 记录事件，计数器首次出现时自动注册
    pub fn record_event(&self, event: &MetricEvent) {
        let key = Self::key(&event.name, &event.labels);
        self.recorder
            .register_counter(&key, &Self::metadata())
            .increment(event.value);
    }

    /// 记录一次请求
    pub fn record_request(&self, method: &str, code: &str, duration_ms: f64) {
        let mut labels = BTreeMap::new();
        labels.insert("method".to_string(), method.to_string());
        labels.insert("code".to_string(), code.to_string());

        let key = Self::key(REQUESTS_TOTAL, &labels);
        self.recorder
            .register_counter(&key, &Self::metadata())
            .increment(1);

        let key = Self::key(REQUEST_DURATION_MS, &labels);
        self.recorder
            .register_histogram(&key, &Self::metadata())
            .record(duration_ms);
    }

    /// 记录一次限流拒绝
    pub fn record_rate_limited(&self, method: &str) {
        self.record_event(&MetricEvent::new(RATE_LIMITED_TOTAL).label("method", method));
    }

    /// 记录一次被捕获的 panic
    pub fn record_panic(&self, origin: &str) {
        self.record_event(&MetricEvent::new(PANICS_TOTAL).label("origin", origin));
    }

    /// 获取 Prometheus 文本格式的指标
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}
