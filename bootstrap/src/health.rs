//! 健康检查模块
//!
//! 提供 /health、/ready 和 /metrics 端点

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use keel_common::HealthReport;
use keel_resource::ResourceManager;
use keel_telemetry::MetricsRegistry;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// 存活检查响应
#[derive(Debug, Clone, Serialize)]
pub struct LivenessStatus {
    pub status: &'static str,
}

#[derive(Clone)]
struct HealthState {
    resources: Arc<ResourceManager>,
    metrics: Arc<MetricsRegistry>,
}

/// 构建健康检查路由
pub fn health_router(resources: Arc<ResourceManager>, metrics: Arc<MetricsRegistry>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(HealthState { resources, metrics })
}

/// 在已绑定的端口上提供健康检查服务，`shutdown` 取消后优雅退出
pub async fn serve_health(
    listener: TcpListener,
    router: Router,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "Health check HTTP server starting");
    }
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
}

/// Liveness 端点处理器，只说明进程还活着
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(LivenessStatus { status: "healthy" }))
}

/// Readiness 端点处理器，检查所有资源
async fn ready_handler(State(state): State<HealthState>) -> impl IntoResponse {
    let report: HealthReport = state.resources.health_report().await;
    let code = if report.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(report))
}

/// Metrics 端点处理器
async fn metrics_handler(State(state): State<HealthState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        state.metrics.render(),
    )
}
