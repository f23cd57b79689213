//! 服务进程骨架
//!
//! 生命周期：
//! 1. 绑定健康检查端口
//! 2. 按顺序初始化资源，并发启动资源
//! 3. 等待关闭信号，或健康检查服务异常退出
//! 4. 在 `shutdown.timeout_secs` 内停止所有资源

use std::future::Future;
use std::sync::Arc;

use keel_config::AppConfig;
use keel_resource::{ResourceError, ResourceManager};
use keel_telemetry::MetricsRegistry;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::BootstrapError;
use crate::health::{health_router, serve_health};
use crate::runtime::shutdown_signal;

/// 服务进程
pub struct App {
    config: AppConfig,
    resources: Arc<ResourceManager>,
    metrics: Arc<MetricsRegistry>,
}

impl App {
    /// 关闭超时和任务排空超时取自 `config.shutdown`，启动失败后的回滚同样受其约束
    pub fn new(resources: ResourceManager, config: AppConfig) -> Self {
        let resources = resources
            .with_shutdown_timeout(config.shutdown.timeout())
            .with_drain_timeout(config.shutdown.drain_timeout());
        Self {
            config,
            resources: Arc::new(resources),
            metrics: Arc::new(MetricsRegistry::new()),
        }
    }

    /// 使用外部创建的指标注册表，便于和拦截器共享
    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn resources(&self) -> &Arc<ResourceManager> {
        &self.resources
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    /// 运行直到收到 SIGINT / SIGTERM
    pub async fn run(self) -> Result<(), BootstrapError> {
        self.run_until(shutdown_signal()).await
    }

    /// 运行直到 `signal` 完成
    pub async fn run_until<S>(self, signal: S) -> Result<(), BootstrapError>
    where
        S: Future<Output = ()> + Send,
    {
        let addr = self.config.server.health_addr()?;
        let listener = TcpListener::bind(addr).await?;

        info!(app_name = %self.config.app_name, resources = self.resources.len(), "Starting application");

        let server_shutdown = CancellationToken::new();
        let router = health_router(Arc::clone(&self.resources), Arc::clone(&self.metrics));
        let mut server = tokio::spawn(serve_health(listener, router, server_shutdown.clone()));

        let started = match self.resources.init().await {
            Ok(()) => self.resources.start().await,
            Err(e) => Err(e),
        };
        if let Err(e) = started {
            error!(error = %e, "Failed to start resources, shutting down");
            server_shutdown.cancel();
            if let Err(stop_err) = self.stop().await {
                warn!(error = %stop_err, "Cleanup after failed start reported errors");
            }
            let _ = server.await;
            return Err(e.into());
        }

        info!("Application started");

        let mut server_failed = None;
        tokio::select! {
            _ = signal => info!("Shutting down"),
            joined = &mut server => {
                let reason = match joined {
                    Ok(Ok(())) => "health server exited".to_string(),
                    Ok(Err(e)) => e.to_string(),
                    Err(e) => e.to_string(),
                };
                error!(error = %reason, "Health server stopped unexpectedly, shutting down");
                server_failed = Some(reason);
            }
        }

        server_shutdown.cancel();
        let stopped = self.stop().await;
        if server_failed.is_none() {
            let _ = server.await;
        }

        stopped?;
        if let Some(reason) = server_failed {
            return Err(BootstrapError::HealthServer(std::io::Error::other(reason)));
        }
        info!("Application stopped");
        Ok(())
    }

    /// 在配置的超时时间内停止所有资源
    pub async fn stop(&self) -> Result<(), BootstrapError> {
        let timeout = self.config.shutdown.timeout();
        match tokio::time::timeout(timeout, self.resources.stop()).await {
            Ok(result) => result.map_err(Into::into),
            Err(_) => {
                error!(timeout_secs = timeout.as_secs(), "Resources did not stop in time");
                Err(ResourceError::StopTimeout(timeout).into())
            }
        }
    }
}
