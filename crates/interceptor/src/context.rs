//! 请求级上下文

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tonic::metadata::{Ascii, Binary, KeyAndValueRef, MetadataKey, MetadataMap, MetadataValue};
use tracing::warn;
use uuid::Uuid;

/// 调用方透传的业务元数据
pub const METADATA_KEY: &str = "metadata";
/// JSON 编码的 `AppContext`
pub const APP_CTX_KEY: &str = "app-ctx-bin";
/// 依次尝试的请求 ID 元数据键
pub const REQUEST_ID_KEYS: [&str; 3] = ["x-trace-id", "x-request-id", "x-correlation-id"];

/// 请求元数据，键统一为小写，同一个键可以有多个值
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    entries: BTreeMap<String, Vec<String>>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// 第一个值
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .get(&key.to_ascii_lowercase())
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    pub fn get_all(&self, key: &str) -> &[String] {
        self.entries
            .get(&key.to_ascii_lowercase())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// 替换已有的值
    pub fn insert(&mut self, key: impl AsRef<str>, value: impl Into<String>) {
        self.entries
            .insert(key.as_ref().to_ascii_lowercase(), vec![value.into()]);
    }

    pub fn append(&mut self, key: impl AsRef<str>, value: impl Into<String>) {
        self.entries
            .entry(key.as_ref().to_ascii_lowercase())
            .or_default()
            .push(value.into());
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(&key.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// 把 `other` 的值追加到自身之后
    ///
    /// 同一个键上自身的值排在前面，`get` 总是先看到自身的值。
    pub fn join(&mut self, other: &Metadata) {
        for (key, values) in &other.entries {
            self.entries
                .entry(key.clone())
                .or_default()
                .extend(values.iter().cloned());
        }
    }

    /// 从 gRPC 元数据转换，`-bin` 值解码后按 UTF-8 读取
    pub fn from_tonic(map: &MetadataMap) -> Self {
        let mut metadata = Self::new();
        for entry in map.iter() {
            match entry {
                KeyAndValueRef::Ascii(key, value) => match value.to_str() {
                    Ok(value) => metadata.append(key.as_str(), value),
                    Err(_) => warn!(key = key.as_str(), "Skipping non-visible ASCII metadata value"),
                },
                KeyAndValueRef::Binary(key, value) => {
                    match value.to_bytes().ok().and_then(|b| String::from_utf8(b.to_vec()).ok()) {
                        Some(value) => metadata.append(key.as_str(), value),
                        None => warn!(key = key.as_str(), "Skipping undecodable binary metadata value"),
                    }
                }
            }
        }
        metadata
    }

    /// 转换为 gRPC 元数据，无法表示的键值会被跳过
    pub fn to_tonic(&self) -> MetadataMap {
        let mut map = MetadataMap::new();
        for (key, values) in &self.entries {
            for value in values {
                let appended = if key.ends_with("-bin") {
                    MetadataKey::<Binary>::from_bytes(key.as_bytes())
                        .map(|k| map.append_bin(k, MetadataValue::<Binary>::from_bytes(value.as_bytes())))
                        .is_ok()
                } else {
                    match (
                        MetadataKey::<Ascii>::from_bytes(key.as_bytes()),
                        value.parse::<MetadataValue<Ascii>>(),
                    ) {
                        (Ok(k), Ok(v)) => {
                            map.append(k, v);
                            true
                        }
                        _ => false,
                    }
                };
                if !appended {
                    warn!(key = %key, "Skipping metadata entry not representable in gRPC");
                }
            }
        }
        map
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut metadata = Self::new();
        for (key, value) in iter {
            metadata.append(key, value);
        }
        metadata
    }
}

/// 发起请求的用户
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct User {
    pub id: i64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
}

/// 客户端请求的通用参数
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReqCommonParams {
    #[serde(rename = "aid")]
    pub app_id: i32,
    pub app_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub device_id: String,
    #[serde(rename = "iid", skip_serializing_if = "Option::is_none")]
    pub install_id: Option<i64>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub channel: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub device_platform: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub os_version: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub version_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub language: String,
    #[serde(rename = "tz_name", skip_serializing_if = "String::is_empty")]
    pub time_zone_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub ip: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub app_region: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub req_time: Option<i64>,
    pub now: Option<DateTime<Utc>>,
}

/// 跨服务传递的应用上下文
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppContext {
    pub user: User,
    pub common_params: Option<ReqCommonParams>,
}

impl AppContext {
    /// 解析 JSON，`common_params.now` 缺失时填入当前时间
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        let mut ctx: AppContext = serde_json::from_str(s)?;
        let params = ctx.common_params.get_or_insert_with(ReqCommonParams::default);
        if params.now.is_none_or(|now| now.timestamp() == 0) {
            params.now = Some(Utc::now());
        }
        Ok(ctx)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// 请求时间
    pub fn now(&self) -> Option<DateTime<Utc>> {
        self.common_params.as_ref().and_then(|p| p.now)
    }
}

/// 一次调用的上下文，沿拦截器链显式传递
#[derive(Debug, Clone)]
pub struct CallContext {
    /// 完整方法名，例如 `/order.OrderService/Create`
    pub method: String,
    pub request_id: String,
    /// 调用方发来的元数据
    pub incoming: Metadata,
    /// 将随下游调用发出的元数据
    pub outgoing: Metadata,
    pub app: Option<Arc<AppContext>>,
    /// 调用方透传的 `metadata` 条目
    pub caller_metadata: Option<String>,
    pub started_at: Instant,
}

impl CallContext {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            request_id: Uuid::now_v7().to_string(),
            incoming: Metadata::new(),
            outgoing: Metadata::new(),
            app: None,
            caller_metadata: None,
            started_at: Instant::now(),
        }
    }

    /// 设置调用方元数据，元数据里带有请求 ID 时沿用它
    pub fn with_incoming(mut self, incoming: Metadata) -> Self {
        if let Some(id) = REQUEST_ID_KEYS.iter().find_map(|key| incoming.get(key)) {
            self.request_id = id.to_string();
        }
        self.incoming = incoming;
        self
    }

    pub fn with_outgoing(mut self, outgoing: Metadata) -> Self {
        self.outgoing = outgoing;
        self
    }

    /// 从 tonic 请求构造服务端上下文
    pub fn from_request<T>(method: impl Into<String>, request: &tonic::Request<T>) -> Self {
        Self::new(method).with_incoming(Metadata::from_tonic(request.metadata()))
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_keys_are_case_insensitive() {
        let mut md = Metadata::new();
        md.insert("X-Request-Id", "abc");
        assert_eq!(md.get("x-request-id"), Some("abc"));
        assert!(md.contains_key("X-REQUEST-ID"));
    }

    #[test]
    fn test_join_keeps_own_values_first() {
        let mut outgoing: Metadata = [("tenant", "explicit")].into_iter().collect();
        let incoming: Metadata = [("tenant", "inherited"), ("locale", "zh-CN")]
            .into_iter()
            .collect();

        outgoing.join(&incoming);

        assert_eq!(outgoing.get("tenant"), Some("explicit"));
        assert_eq!(outgoing.get_all("tenant"), ["explicit", "inherited"]);
        assert_eq!(outgoing.get("locale"), Some("zh-CN"));
    }

    #[test]
    fn test_tonic_conversion_keeps_binary_entries() {
        let mut md = Metadata::new();
        md.insert("x-request-id", "req-1");
        md.insert(APP_CTX_KEY, r#"{"user":{"id":7}}"#);

        let map = md.to_tonic();
        assert_eq!(map.get("x-request-id").unwrap().to_str().unwrap(), "req-1");
        assert!(map.get_bin(APP_CTX_KEY).is_some());

        assert_eq!(Metadata::from_tonic(&map), md);
    }

    #[test]
    fn test_app_context_fills_now() {
        let ctx = AppContext::from_json(r#"{"user":{"id":42},"common_params":{"aid":3,"app_name":"shop"}}"#)
            .unwrap();
        assert_eq!(ctx.user.id, 42);
        let params = ctx.common_params.as_ref().unwrap();
        assert_eq!(params.app_id, 3);
        assert_eq!(params.app_name, "shop");
        assert!(ctx.now().is_some());

        let ctx = AppContext::from_json(r#"{"common_params":{"now":"2024-05-01T08:00:00Z"}}"#).unwrap();
        assert_eq!(ctx.now().unwrap().to_rfc3339(), "2024-05-01T08:00:00+00:00");
    }

    #[test]
    fn test_app_context_rejects_invalid_json() {
        assert!(AppContext::from_json("{not json").is_err());
    }

    #[test]
    fn test_request_id_from_incoming() {
        let ctx = CallContext::new("/svc/Get")
            .with_incoming([("x-request-id", "req-42")].into_iter().collect());
        assert_eq!(ctx.request_id, "req-42");

        let ctx = CallContext::new("/svc/Get");
        assert!(Uuid::parse_str(&ctx.request_id).is_ok());
    }
}
