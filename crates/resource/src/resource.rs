//! Resource 契约

use async_trait::async_trait;
use keel_common::BoxError;
use tokio_util::sync::CancellationToken;

/// 由 `ResourceManager` 管理的子系统（缓存、连接池、worker 运行时等）
///
/// 实现方通过内部可变性管理自身状态；每个实例只注册到一个 manager。
/// `ctx` 被取消表示请求尽快返回，实现方必须在长时间等待中检查它。
#[async_trait]
pub trait Resource: Send + Sync {
    /// 资源名称，用于日志和错误信息
    fn name(&self) -> &str;

    /// 初始化阶段，按注册顺序串行调用
    async fn init(&self, _ctx: &CancellationToken) -> Result<(), BoxError> {
        Ok(())
    }

    /// 启动阶段，所有资源并发调用
    async fn start(&self, ctx: &CancellationToken) -> Result<(), BoxError>;

    /// 停止阶段，按注册顺序串行调用；启动失败回滚时也会调用未启动的资源
    async fn stop(&self) -> Result<(), BoxError>;

    /// 健康检查
    async fn health_check(&self) -> Result<(), BoxError>;
}
