//! 后台任务管理器
//!
//! 所有任务共享一个取消信号和一个排空屏障。取消只是协作式的请求，
//! 任务必须自己观察 `ctx.cancelled()` 并退出。
//!
//! `run` 与 `shutdown` 预期由同一个持有者调用，多个调用方并发 `shutdown`
//! 需要调用方自己同步。

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use keel_common::{BoxError, PanicHook, PanicReport, install_panic_hook};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::error::TaskError;
use crate::resource::Resource;

/// 默认排空超时
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// 管理器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Uninitialized,
    Running,
    Stopped,
}

enum Inner {
    Uninitialized,
    Running(CancellationToken),
    Stopped,
}

/// 后台任务管理器
pub struct TaskManager {
    state: Mutex<Inner>,
    tracker: TaskTracker,
    drain_timeout: Duration,
    panic_hook: Option<PanicHook>,
}

impl TaskManager {
    pub fn new() -> Self {
        install_panic_hook();
        Self {
            state: Mutex::new(Inner::Uninitialized),
            tracker: TaskTracker::new(),
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            panic_hook: None,
        }
    }

    /// 作为 Resource 停止时使用的排空超时
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// 任务 panic 时调用的上报回调
    pub fn with_panic_hook(mut self, hook: PanicHook) -> Self {
        self.panic_hook = Some(hook);
        self
    }

    pub(crate) fn set_panic_hook(&mut self, hook: PanicHook) {
        self.panic_hook = Some(hook);
    }

    pub(crate) fn set_drain_timeout(&mut self, timeout: Duration) {
        self.drain_timeout = timeout;
    }

    pub fn drain_timeout(&self) -> Duration {
        self.drain_timeout
    }

    /// 从父取消信号派生自己的取消信号，进入 running 状态
    pub fn init(&self, parent: &CancellationToken) {
        let mut state = self.state.lock();
        match *state {
            Inner::Uninitialized => *state = Inner::Running(parent.child_token()),
            Inner::Running(_) => debug!("Task manager already initialized"),
            Inner::Stopped => warn!("Task manager already stopped, ignoring init"),
        }
    }

    pub fn state(&self) -> SupervisorState {
        match *self.state.lock() {
            Inner::Uninitialized => SupervisorState::Uninitialized,
            Inner::Running(_) => SupervisorState::Running,
            Inner::Stopped => SupervisorState::Stopped,
        }
    }

    /// 仍在运行的任务数
    pub fn active_tasks(&self) -> usize {
        self.tracker.len()
    }

    /// 启动一个受管任务
    ///
    /// 任务返回的错误和 panic 都只会被记录，不会影响其他任务或进程。
    ///
    /// # Panics
    ///
    /// 在 `init` 之前或 `shutdown` 之后调用属于编程错误，会直接 panic。
    pub fn run<F, Fut>(&self, name: impl Into<String>, task: F)
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let name = name.into();
        let state = self.state.lock();
        let ctx = match &*state {
            Inner::Running(token) => token.clone(),
            Inner::Uninitialized => panic!("TaskManager::run({name}) called before init"),
            Inner::Stopped => panic!("TaskManager::run({name}) called after shutdown"),
        };
        let hook = self.panic_hook.clone();

        self.tracker.spawn(async move {
            debug!(task = %name, "Task started");
            let outcome = AssertUnwindSafe(async move { task(ctx).await })
                .catch_unwind()
                .await;

            match outcome {
                Ok(Ok(())) => debug!(task = %name, "Task finished"),
                Ok(Err(e)) => error!(task = %name, error = %e, "Task returned error"),
                Err(payload) => {
                    PanicReport::capture(name.as_str(), payload.as_ref())
                        .report("task", hook.as_ref());
                }
            }
        });
        drop(state);
    }

    fn cancel(&self) {
        let previous = std::mem::replace(&mut *self.state.lock(), Inner::Stopped);
        if let Inner::Running(token) = previous {
            token.cancel();
        }
        self.tracker.close();
    }

    /// 取消所有任务并等待排空，最多等待 `timeout`
    ///
    /// 超时后返回 `TaskError::DrainTimeout`，未退出的任务继续在后台运行。
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), TaskError> {
        self.cancel();
        info!(
            pending = self.tracker.len(),
            "Task manager cancelled, waiting for tasks to complete"
        );

        match tokio::time::timeout(timeout, self.tracker.wait()).await {
            Ok(()) => {
                info!("All tasks drained");
                Ok(())
            }
            Err(_) => {
                let pending = self.tracker.len();
                warn!(pending, timeout_ms = timeout.as_millis() as u64, "Task drain timed out");
                Err(TaskError::DrainTimeout { timeout, pending })
            }
        }
    }
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Resource for TaskManager {
    fn name(&self) -> &str {
        "task_manager"
    }

    async fn init(&self, ctx: &CancellationToken) -> Result<(), BoxError> {
        TaskManager::init(self, ctx);
        Ok(())
    }

    async fn start(&self, _ctx: &CancellationToken) -> Result<(), BoxError> {
        Ok(())
    }

    async fn stop(&self) -> Result<(), BoxError> {
        self.shutdown(self.drain_timeout).await?;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), BoxError> {
        Ok(())
    }
}
