use keel_config::ConfigError;
use keel_resource::ResourceError;
use thiserror::Error;

/// 启动骨架错误
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error("Health server error: {0}")]
    HealthServer(#[from] std::io::Error),
}
