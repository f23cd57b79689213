//! 服务运行时

use keel_config::AppConfig;
use keel_telemetry::{init_tracing, init_tracing_json};
use tracing::{debug, error, info};

/// 初始化服务运行时
///
/// 生产环境输出 JSON 日志，其他环境输出便于阅读的文本日志。
/// 已经安装过 subscriber 时保留原有的。
pub fn init_runtime(config: &AppConfig) {
    let installed = if config.is_production() {
        init_tracing_json(&config.telemetry.log_level)
    } else {
        init_tracing(&config.telemetry.log_level)
    };
    if let Err(e) = installed {
        debug!(error = %e, "Tracing subscriber already installed");
    }

    info!(
        app_name = %config.app_name,
        app_env = %config.app_env,
        "Runtime initialized"
    );
}

/// 等待关闭信号（SIGINT / SIGTERM）
///
/// 某个信号无法监听时只记录错误，继续等待其他信号。
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
