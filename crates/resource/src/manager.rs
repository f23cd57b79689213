//! 资源管理器
//!
//! 生命周期：
//! 1. `init`：按注册顺序逐个初始化，遇到第一个错误立即返回
//! 2. `start`：所有资源并发启动，任一失败会取消其他资源并回滚（调用 `stop`），
//!    回滚受关闭超时约束
//! 3. `stop`：按注册顺序逐个停止，单个失败不会中断后续资源的停止
//!
//! 管理器内部持有一个 `TaskManager`，通过 `spawn` 启动的后台任务在 `stop`
//! 的最后阶段统一排空。

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use keel_common::{BoxError, ComponentHealth, HealthReport, PanicHook, PanicReport, panic_message};
use parking_lot::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{ResourceError, StopFailure};
use crate::resource::Resource;
use crate::task::TaskManager;

/// 默认关闭超时
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// 管理器生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Created,
    Initializing,
    Initialized,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Initializing => "initializing",
            Self::Initialized => "initialized",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// 资源管理器
pub struct ResourceManager {
    resources: Vec<Arc<dyn Resource>>,
    state: Mutex<LifecycleState>,
    root: CancellationToken,
    tasks: TaskManager,
    panic_hook: Option<PanicHook>,
    shutdown_timeout: Duration,
}

impl ResourceManager {
    pub fn new() -> Self {
        let root = CancellationToken::new();
        let tasks = TaskManager::new();
        tasks.init(&root);
        Self {
            resources: Vec::new(),
            state: Mutex::new(LifecycleState::Created),
            root,
            tasks,
            panic_hook: None,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// 按给定顺序注册一组资源
    pub fn with_resources(resources: Vec<Arc<dyn Resource>>) -> Self {
        let mut manager = Self::new();
        manager.resources = resources;
        manager
    }

    /// 资源启动或后台任务 panic 时调用的上报回调
    pub fn with_panic_hook(mut self, hook: PanicHook) -> Self {
        self.tasks.set_panic_hook(hook.clone());
        self.panic_hook = Some(hook);
        self
    }

    /// 启动失败后回滚的最长时间
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// `stop` 排空后台任务的最长时间
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.tasks.set_drain_timeout(timeout);
        self
    }

    /// 注册资源，只允许在 `start` 之前调用
    pub fn add_resource(&mut self, resource: Arc<dyn Resource>) -> Result<(), ResourceError> {
        match *self.state.get_mut() {
            LifecycleState::Created | LifecycleState::Initialized => {
                debug!(resource = resource.name(), "Resource registered");
                self.resources.push(resource);
                Ok(())
            }
            _ => Err(ResourceError::AlreadyStarted),
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.lock()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// 按注册顺序返回资源名称
    pub fn resource_names(&self) -> Vec<&str> {
        self.resources.iter().map(|r| r.name()).collect()
    }

    /// 管理器的根取消信号，`stop` 结束时取消
    pub fn context(&self) -> CancellationToken {
        self.root.clone()
    }

    /// 在管理器的取消信号下启动后台任务，`stop` 时统一排空
    ///
    /// # Panics
    ///
    /// `stop` 之后调用会 panic。
    pub fn spawn<F, Fut>(&self, name: impl Into<String>, task: F)
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.tasks.run(name, task);
    }

    /// 检查并迁移状态
    fn transition(
        &self,
        action: &'static str,
        allowed: &[LifecycleState],
        next: LifecycleState,
    ) -> Result<(), ResourceError> {
        let mut state = self.state.lock();
        if !allowed.contains(&*state) {
            return Err(ResourceError::InvalidState {
                action,
                state: *state,
            });
        }
        *state = next;
        Ok(())
    }

    fn set_state(&self, next: LifecycleState) {
        *self.state.lock() = next;
    }

    /// 按注册顺序初始化所有资源
    pub async fn init(&self) -> Result<(), ResourceError> {
        self.transition(
            "init",
            &[LifecycleState::Created],
            LifecycleState::Initializing,
        )?;

        for resource in &self.resources {
            let name = resource.name();
            debug!(resource = name, "Initializing resource");
            if let Err(e) = resource.init(&self.root).await {
                error!(resource = name, error = %e, "Failed to init resource");
                self.set_state(LifecycleState::Failed);
                return Err(ResourceError::Init {
                    resource: name.to_string(),
                    source: e,
                });
            }
        }

        self.set_state(LifecycleState::Initialized);
        info!(count = self.resources.len(), "All resources initialized");
        Ok(())
    }

    /// 并发启动所有资源
    ///
    /// 第一个失败会取消其他仍在启动的资源，随后对所有资源执行 `stop` 回滚，
    /// 返回的错误带有失败资源的名称。回滚超过关闭超时会被放弃，
    /// 此时仍返回原始的启动错误。
    pub async fn start(&self) -> Result<(), ResourceError> {
        self.transition(
            "start",
            &[LifecycleState::Created, LifecycleState::Initialized],
            LifecycleState::Starting,
        )?;

        let ctx = self.root.child_token();
        let mut set = JoinSet::new();
        let mut names = HashMap::with_capacity(self.resources.len());
        for resource in &self.resources {
            let name = resource.name().to_string();
            let resource = Arc::clone(resource);
            let ctx = ctx.clone();
            let hook = self.panic_hook.clone();
            let handle = set.spawn(async move {
                match AssertUnwindSafe(resource.start(&ctx)).catch_unwind().await {
                    Ok(result) => result,
                    Err(payload) => {
                        // 在 panic 所在线程上取调用栈
                        let report = PanicReport::capture(resource.name(), payload.as_ref());
                        report.report("resource start", hook.as_ref());
                        Err(format!("panic: {}", report.message).into())
                    }
                }
            });
            names.insert(handle.id(), name);
        }

        let mut first: Option<ResourceError> = None;
        while let Some(joined) = set.join_next_with_id().await {
            let (name, result): (String, Result<(), BoxError>) = match joined {
                Ok((id, result)) => (task_name(&names, id), result),
                Err(e) => {
                    let name = task_name(&names, e.id());
                    let error: BoxError = if e.is_panic() {
                        format!("panic: {}", panic_message(e.into_panic().as_ref())).into()
                    } else {
                        e.into()
                    };
                    (name, Err(error))
                }
            };

            match result {
                Ok(()) => debug!(resource = %name, "Resource started"),
                Err(e) if first.is_none() => {
                    error!(resource = %name, error = %e, "Failed to start resource, cancelling siblings");
                    ctx.cancel();
                    first = Some(ResourceError::Start {
                        resource: name,
                        source: e,
                    });
                }
                Err(e) => {
                    warn!(resource = %name, error = %e, "Resource start failed after cancellation")
                }
            }
        }

        if let Some(err) = first {
            self.set_state(LifecycleState::Failed);
            match tokio::time::timeout(self.shutdown_timeout, self.stop_all()).await {
                Ok(Ok(())) => {}
                Ok(Err(stop_err)) => {
                    error!(error = %stop_err, "Rollback after failed start reported errors")
                }
                Err(_) => {
                    error!(
                        timeout_ms = self.shutdown_timeout.as_millis() as u64,
                        "Rollback after failed start timed out"
                    );
                    self.root.cancel();
                }
            }
            self.set_state(LifecycleState::Stopped);
            return Err(err);
        }

        self.set_state(LifecycleState::Running);
        info!(count = self.resources.len(), "All resources started");
        Ok(())
    }

    /// 按注册顺序停止所有资源
    ///
    /// 单个资源停止失败不会阻止后续资源停止，所有失败汇总在
    /// `ResourceError::Stop` 中返回。重复调用直接返回 `Ok`。
    pub async fn stop(&self) -> Result<(), ResourceError> {
        {
            let mut state = self.state.lock();
            if matches!(*state, LifecycleState::Stopping | LifecycleState::Stopped) {
                return Ok(());
            }
            *state = LifecycleState::Stopping;
        }

        let result = self.stop_all().await;
        self.set_state(LifecycleState::Stopped);
        result
    }

    async fn stop_all(&self) -> Result<(), ResourceError> {
        let mut failures = Vec::new();
        for resource in &self.resources {
            let name = resource.name();
            debug!(resource = name, "Stopping resource");
            let outcome = AssertUnwindSafe(resource.stop()).catch_unwind().await;
            let error: Option<BoxError> = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e),
                Err(payload) => {
                    PanicReport::capture(name, payload.as_ref())
                        .report("resource stop", self.panic_hook.as_ref());
                    Some(format!("panic: {}", panic_message(payload.as_ref())).into())
                }
            };
            if let Some(error) = error {
                error!(resource = name, error = %error, "Failed to stop resource");
                failures.push(StopFailure {
                    resource: name.to_string(),
                    error,
                });
            }
        }

        if let Err(e) = self.tasks.shutdown(self.tasks.drain_timeout()).await {
            error!(error = %e, "Failed to drain background tasks");
            failures.push(StopFailure {
                resource: self.tasks.name().to_string(),
                error: e.into(),
            });
        }
        self.root.cancel();

        if failures.is_empty() {
            info!("All resources stopped");
            Ok(())
        } else {
            Err(ResourceError::Stop { failures })
        }
    }

    /// 检查所有资源，返回第一个错误
    pub async fn health_check(&self) -> Result<(), ResourceError> {
        for resource in &self.resources {
            if let Err(e) = resource.health_check().await {
                return Err(ResourceError::Unhealthy {
                    resource: resource.name().to_string(),
                    source: e,
                });
            }
        }
        Ok(())
    }

    /// `health_check` 的别名
    pub async fn ok(&self) -> Result<(), ResourceError> {
        self.health_check().await
    }

    /// 检查所有资源并生成完整报告
    pub async fn health_report(&self) -> HealthReport {
        let mut report = HealthReport::new();
        for resource in &self.resources {
            let begin = Instant::now();
            let result = resource.health_check().await;
            let latency_ms = begin.elapsed().as_millis() as u64;
            report.push(match result {
                Ok(()) => ComponentHealth::healthy(resource.name(), latency_ms),
                Err(e) => ComponentHealth::unhealthy(resource.name(), latency_ms, e.to_string()),
            });
        }
        report
    }
}

fn task_name(names: &HashMap<tokio::task::Id, String>, id: tokio::task::Id) -> String {
    names
        .get(&id)
        .cloned()
        .unwrap_or_else(|| format!("<task {id}>"))
}

impl Default for ResourceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ResourceManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceManager")
            .field("resources", &self.resource_names())
            .field("state", &self.state())
            .finish()
    }
}
