//! 测试用资源

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use keel_resource::{BoxError, CancellationToken, Resource};
use parking_lot::Mutex;

/// 调用记录，格式为 `"{action}:{name}"`
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn record(&self, action: &str, name: &str) {
        self.0.lock().push(format!("{action}:{name}"));
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    /// 指定动作的资源名称，按调用顺序
    pub fn names(&self, action: &str) -> Vec<String> {
        let prefix = format!("{action}:");
        self.0
            .lock()
            .iter()
            .filter_map(|e| e.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }
}

/// 启动行为
#[derive(Clone)]
pub enum StartBehavior {
    Ok,
    Fail(&'static str),
    /// 阻塞直到收到取消信号，然后返回 Ok
    WaitForCancel,
    Panic(&'static str),
}

pub struct TestResource {
    name: String,
    log: CallLog,
    init_error: Option<&'static str>,
    start: StartBehavior,
    start_delay: Duration,
    stop_error: Option<&'static str>,
    stop_delay: Duration,
    health_error: Option<&'static str>,
}

impl TestResource {
    pub fn new(name: &str, log: &CallLog) -> Self {
        Self {
            name: name.to_string(),
            log: log.clone(),
            init_error: None,
            start: StartBehavior::Ok,
            start_delay: Duration::ZERO,
            stop_error: None,
            stop_delay: Duration::ZERO,
            health_error: None,
        }
    }

    pub fn fail_init(mut self, msg: &'static str) -> Self {
        self.init_error = Some(msg);
        self
    }

    pub fn start_with(mut self, behavior: StartBehavior) -> Self {
        self.start = behavior;
        self
    }

    pub fn start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }

    pub fn fail_stop(mut self, msg: &'static str) -> Self {
        self.stop_error = Some(msg);
        self
    }

    pub fn stop_delay(mut self, delay: Duration) -> Self {
        self.stop_delay = delay;
        self
    }

    pub fn unhealthy(mut self, msg: &'static str) -> Self {
        self.health_error = Some(msg);
        self
    }

    pub fn build(self) -> Arc<dyn Resource> {
        Arc::new(self)
    }
}

#[async_trait]
impl Resource for TestResource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn init(&self, _ctx: &CancellationToken) -> Result<(), BoxError> {
        self.log.record("init", &self.name);
        match self.init_error {
            Some(msg) => Err(msg.into()),
            None => Ok(()),
        }
    }

    async fn start(&self, ctx: &CancellationToken) -> Result<(), BoxError> {
        self.log.record("start", &self.name);
        if !self.start_delay.is_zero() {
            tokio::time::sleep(self.start_delay).await;
        }
        match &self.start {
            StartBehavior::Ok => Ok(()),
            StartBehavior::Fail(msg) => Err((*msg).into()),
            StartBehavior::WaitForCancel => {
                ctx.cancelled().await;
                self.log.record("cancelled", &self.name);
                Ok(())
            }
            StartBehavior::Panic(msg) => panic!("{}", msg),
        }
    }

    async fn stop(&self) -> Result<(), BoxError> {
        if !self.stop_delay.is_zero() {
            tokio::time::sleep(self.stop_delay).await;
        }
        self.log.record("stop", &self.name);
        match self.stop_error {
            Some(msg) => Err(msg.into()),
            None => Ok(()),
        }
    }

    async fn health_check(&self) -> Result<(), BoxError> {
        match self.health_error {
            Some(msg) => Err(msg.into()),
            None => Ok(()),
        }
    }
}
