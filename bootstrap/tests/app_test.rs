//! 服务骨架生命周期测试

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use keel_bootstrap::{App, BootstrapError, init_runtime};
use keel_config::{AppConfig, ConfigError};
use keel_resource::{BoxError, CancellationToken, Resource, ResourceError, ResourceManager};
use tokio::sync::Mutex;

#[derive(Clone, Default)]
struct Events(Arc<Mutex<Vec<String>>>);

impl Events {
    async fn push(&self, event: String) {
        self.0.lock().await.push(event);
    }

    async fn all(&self) -> Vec<String> {
        self.0.lock().await.clone()
    }
}

struct StubResource {
    name: &'static str,
    events: Events,
    fail_start: bool,
    stop_delay: Duration,
}

impl StubResource {
    fn new(name: &'static str, events: &Events) -> Self {
        Self {
            name,
            events: events.clone(),
            fail_start: false,
            stop_delay: Duration::ZERO,
        }
    }
}

#[async_trait]
impl Resource for StubResource {
    fn name(&self) -> &str {
        self.name
    }

    async fn init(&self, _ctx: &CancellationToken) -> Result<(), BoxError> {
        self.events.push(format!("init:{}", self.name)).await;
        Ok(())
    }

    async fn start(&self, _ctx: &CancellationToken) -> Result<(), BoxError> {
        self.events.push(format!("start:{}", self.name)).await;
        if self.fail_start {
            return Err("port already in use".into());
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), BoxError> {
        tokio::time::sleep(self.stop_delay).await;
        self.events.push(format!("stop:{}", self.name)).await;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), BoxError> {
        Ok(())
    }
}

fn test_config() -> AppConfig {
    let mut config = AppConfig::new("keel-test");
    config.server.host = "127.0.0.1".to_string();
    config.server.health_port = 0;
    config
}

fn manager(resources: Vec<StubResource>) -> ResourceManager {
    ResourceManager::with_resources(
        resources
            .into_iter()
            .map(|r| Arc::new(r) as Arc<dyn Resource>)
            .collect(),
    )
}

#[tokio::test]
async fn test_run_until_signal() {
    let events = Events::default();
    let app = App::new(
        manager(vec![StubResource::new("db", &events), StubResource::new("grpc", &events)]),
        test_config(),
    );

    app.run_until(tokio::time::sleep(Duration::from_millis(50)))
        .await
        .unwrap();

    let events = events.all().await;
    assert_eq!(&events[..2], ["init:db", "init:grpc"]);
    assert!(events.contains(&"start:db".to_string()));
    assert!(events.contains(&"start:grpc".to_string()));
    assert_eq!(&events[4..], ["stop:db", "stop:grpc"]);
}

#[tokio::test]
async fn test_start_failure_is_returned() {
    let events = Events::default();
    let mut failing = StubResource::new("grpc", &events);
    failing.fail_start = true;
    let app = App::new(manager(vec![StubResource::new("db", &events), failing]), test_config());

    let err = app.run_until(std::future::pending()).await.unwrap_err();

    match err {
        BootstrapError::Resource(ResourceError::Start { resource, .. }) => {
            assert_eq!(resource, "grpc")
        }
        other => panic!("unexpected error: {other}"),
    }
    let events = events.all().await;
    assert!(events.contains(&"stop:db".to_string()));
    assert!(events.contains(&"stop:grpc".to_string()));
}

#[tokio::test]
async fn test_failed_start_rollback_is_bounded() {
    let events = Events::default();
    let mut failing = StubResource::new("grpc", &events);
    failing.fail_start = true;
    let mut stuck = StubResource::new("db", &events);
    stuck.stop_delay = Duration::from_secs(3600);

    let mut config = test_config();
    config.shutdown.timeout_secs = 1;
    let app = App::new(manager(vec![stuck, failing]), config);

    let err = tokio::time::timeout(
        Duration::from_secs(5),
        app.run_until(std::future::pending()),
    )
    .await
    .expect("rollback should give up after the shutdown timeout")
    .unwrap_err();

    match err {
        BootstrapError::Resource(ResourceError::Start { resource, .. }) => {
            assert_eq!(resource, "grpc")
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!events.all().await.contains(&"stop:db".to_string()));
}

#[tokio::test]
async fn test_stop_is_bounded() {
    let events = Events::default();
    let mut slow = StubResource::new("slow", &events);
    slow.stop_delay = Duration::from_secs(30);

    let mut config = test_config();
    config.shutdown.timeout_secs = 1;
    let app = App::new(manager(vec![slow]), config);

    let err = app
        .run_until(tokio::time::sleep(Duration::from_millis(10)))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        BootstrapError::Resource(ResourceError::StopTimeout(timeout)) if timeout == Duration::from_secs(1)
    ));
}

#[tokio::test]
async fn test_invalid_health_address() {
    let mut config = test_config();
    config.server.host = "not-an-ip".to_string();
    let app = App::new(ResourceManager::new(), config);

    let err = app.run_until(async {}).await.unwrap_err();
    assert!(matches!(
        err,
        BootstrapError::Config(ConfigError::InvalidAddress { .. })
    ));
}

#[test]
fn test_init_runtime_is_repeatable() {
    let config = test_config();
    init_runtime(&config);
    init_runtime(&config);
}
