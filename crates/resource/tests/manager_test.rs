//! 资源管理器测试

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use common::{CallLog, StartBehavior, TestResource};
use keel_resource::{LifecycleState, ResourceError, ResourceManager};

fn manager_with(resources: Vec<TestResource>) -> ResourceManager {
    let mut manager = ResourceManager::new();
    for resource in resources {
        manager.add_resource(resource.build()).unwrap();
    }
    manager
}

#[tokio::test]
async fn test_init_runs_in_registration_order() {
    let log = CallLog::default();
    let manager = manager_with(vec![
        TestResource::new("db", &log),
        TestResource::new("cache", &log),
        TestResource::new("queue", &log),
    ]);

    manager.init().await.unwrap();

    assert_eq!(log.names("init"), vec!["db", "cache", "queue"]);
    assert_eq!(manager.state(), LifecycleState::Initialized);
}

#[tokio::test]
async fn test_init_stops_at_first_error() {
    let log = CallLog::default();
    let manager = manager_with(vec![
        TestResource::new("A", &log),
        TestResource::new("B", &log).fail_init("connection refused"),
        TestResource::new("C", &log),
    ]);

    let err = manager.init().await.unwrap_err();

    assert!(matches!(err, ResourceError::Init { .. }));
    assert_eq!(err.resource(), Some("B"));
    assert!(err.to_string().contains("connection refused"));
    assert_eq!(log.names("init"), vec!["A", "B"]);
    assert_eq!(manager.state(), LifecycleState::Failed);
}

#[tokio::test]
async fn test_start_failure_rolls_back_every_resource() {
    let log = CallLog::default();
    let manager = manager_with(vec![
        TestResource::new("A", &log),
        TestResource::new("B", &log).start_with(StartBehavior::Fail("disk full")),
        TestResource::new("C", &log),
    ]);
    manager.init().await.unwrap();

    let err = manager.start().await.unwrap_err();

    let message = err.to_string();
    assert!(message.contains("B"), "unexpected error: {message}");
    assert!(message.contains("disk full"), "unexpected error: {message}");
    assert_eq!(err.resource(), Some("B"));

    let mut stopped = log.names("stop");
    stopped.sort();
    assert_eq!(stopped, vec!["A", "B", "C"]);
    assert_eq!(manager.state(), LifecycleState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_start_rollback_gives_up_after_shutdown_timeout() {
    let log = CallLog::default();
    let mut manager = ResourceManager::new().with_shutdown_timeout(Duration::from_millis(100));
    manager
        .add_resource(
            TestResource::new("A", &log)
                .stop_delay(Duration::from_secs(3600))
                .build(),
        )
        .unwrap();
    manager
        .add_resource(
            TestResource::new("B", &log)
                .start_with(StartBehavior::Fail("disk full"))
                .build(),
        )
        .unwrap();

    let err = tokio::time::timeout(Duration::from_secs(5), manager.start())
        .await
        .expect("rollback must respect the shutdown timeout")
        .unwrap_err();

    assert_eq!(err.resource(), Some("B"));
    assert!(log.names("stop").is_empty());
    assert_eq!(manager.state(), LifecycleState::Stopped);
    assert!(manager.context().is_cancelled());
}

#[tokio::test]
async fn test_start_failure_cancels_siblings() {
    let log = CallLog::default();
    let manager = manager_with(vec![
        TestResource::new("server", &log).start_with(StartBehavior::WaitForCancel),
        TestResource::new("worker", &log)
            .start_delay(Duration::from_millis(20))
            .start_with(StartBehavior::Fail("bad config")),
    ]);

    let result = tokio::time::timeout(Duration::from_secs(5), manager.start())
        .await
        .expect("start must not hang when a sibling fails");

    let err = result.unwrap_err();
    assert_eq!(err.resource(), Some("worker"));
    assert_eq!(log.names("cancelled"), vec!["server"]);
}

#[tokio::test]
async fn test_start_reports_panicking_resource() {
    let log = CallLog::default();
    let manager = manager_with(vec![
        TestResource::new("A", &log),
        TestResource::new("exploder", &log).start_with(StartBehavior::Panic("boom")),
    ]);

    let err = manager.start().await.unwrap_err();

    assert_eq!(err.resource(), Some("exploder"));
    assert!(err.to_string().contains("boom"));
    assert_eq!(log.names("stop").len(), 2);
}

#[tokio::test]
async fn test_panic_hook_receives_start_panic() {
    let log = CallLog::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = calls.clone();

    let mut manager = ResourceManager::new().with_panic_hook(Arc::new(move |report| {
        assert_eq!(report.origin, "exploder");
        assert_eq!(report.message, "kaboom");
        seen.fetch_add(1, Ordering::SeqCst);
    }));
    manager
        .add_resource(
            TestResource::new("exploder", &log)
                .start_with(StartBehavior::Panic("kaboom"))
                .build(),
        )
        .unwrap();

    assert!(manager.start().await.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_start_runs_resources_concurrently() {
    let log = CallLog::default();
    let delay = Duration::from_millis(100);
    let manager = manager_with(vec![
        TestResource::new("A", &log).start_delay(delay),
        TestResource::new("B", &log).start_delay(delay),
        TestResource::new("C", &log).start_delay(delay),
    ]);

    let begin = tokio::time::Instant::now();
    manager.start().await.unwrap();

    assert!(begin.elapsed() < delay * 2);
    assert_eq!(manager.state(), LifecycleState::Running);
}

#[tokio::test]
async fn test_stop_continues_after_failure() {
    let log = CallLog::default();
    let manager = manager_with(vec![
        TestResource::new("A", &log),
        TestResource::new("B", &log).fail_stop("flush failed"),
        TestResource::new("C", &log),
    ]);
    manager.init().await.unwrap();
    manager.start().await.unwrap();

    let err = manager.stop().await.unwrap_err();

    assert_eq!(log.names("stop"), vec!["A", "B", "C"]);
    match err {
        ResourceError::Stop { failures } => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].resource, "B");
            assert_eq!(failures[0].error.to_string(), "flush failed");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(manager.state(), LifecycleState::Stopped);
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let log = CallLog::default();
    let manager = manager_with(vec![TestResource::new("A", &log)]);
    manager.start().await.unwrap();

    manager.stop().await.unwrap();
    manager.stop().await.unwrap();

    assert_eq!(log.names("stop"), vec!["A"]);
    assert!(manager.context().is_cancelled());
}

#[tokio::test]
async fn test_lifecycle_state_guards() {
    let log = CallLog::default();
    let mut manager = manager_with(vec![TestResource::new("A", &log)]);
    manager.start().await.unwrap();

    let err = manager
        .add_resource(TestResource::new("late", &log).build())
        .unwrap_err();
    assert!(matches!(err, ResourceError::AlreadyStarted));

    let err = manager.start().await.unwrap_err();
    assert!(matches!(
        err,
        ResourceError::InvalidState {
            action: "start",
            state: LifecycleState::Running
        }
    ));

    let err = manager.init().await.unwrap_err();
    assert!(matches!(err, ResourceError::InvalidState { action: "init", .. }));
}

#[tokio::test]
async fn test_empty_manager_lifecycle() {
    let manager = ResourceManager::new();
    assert!(manager.is_empty());

    manager.init().await.unwrap();
    manager.start().await.unwrap();
    manager.health_check().await.unwrap();
    manager.stop().await.unwrap();
}

#[tokio::test]
async fn test_health_after_successful_start() {
    let log = CallLog::default();
    let manager = manager_with(vec![
        TestResource::new("A", &log),
        TestResource::new("B", &log),
        TestResource::new("C", &log),
    ]);
    manager.init().await.unwrap();
    manager.start().await.unwrap();

    manager.ok().await.unwrap();

    let report = manager.health_report().await;
    assert!(report.healthy);
    assert_eq!(report.total_count(), 3);
    assert_eq!(report.healthy_count(), 3);
    let names: Vec<_> = report.components.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["A", "B", "C"]);
}

#[tokio::test]
async fn test_health_check_returns_first_error() {
    let log = CallLog::default();
    let manager = manager_with(vec![
        TestResource::new("A", &log),
        TestResource::new("B", &log).unhealthy("replica lag"),
        TestResource::new("C", &log).unhealthy("not connected"),
    ]);

    let err = manager.ok().await.unwrap_err();
    assert_eq!(err.resource(), Some("B"));
    assert!(err.to_string().contains("replica lag"));

    let report = manager.health_report().await;
    assert!(!report.healthy);
    assert_eq!(report.total_count(), 3);
    assert_eq!(report.healthy_count(), 1);
    let failing: Vec<_> = report.failing().map(|c| c.name.as_str()).collect();
    assert_eq!(failing, vec!["B", "C"]);
}

#[tokio::test]
async fn test_spawned_tasks_drain_on_stop() {
    let log = CallLog::default();
    let manager = manager_with(vec![TestResource::new("A", &log)]);
    manager.start().await.unwrap();

    let cleaned = Arc::new(AtomicBool::new(false));
    let flag = cleaned.clone();
    manager.spawn("flusher", move |ctx| async move {
        ctx.cancelled().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        flag.store(true, Ordering::SeqCst);
        Ok(())
    });

    manager.stop().await.unwrap();
    assert!(cleaned.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_stop_reports_stuck_background_task() {
    let log = CallLog::default();
    let mut manager = ResourceManager::new().with_drain_timeout(Duration::from_millis(50));
    manager
        .add_resource(TestResource::new("A", &log).build())
        .unwrap();
    manager.start().await.unwrap();

    manager.spawn("stuck", |_ctx| async {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(())
    });

    let err = tokio::time::timeout(Duration::from_secs(5), manager.stop())
        .await
        .expect("stop must respect the drain timeout")
        .unwrap_err();

    match err {
        ResourceError::Stop { failures } => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].resource, "task_manager");
            assert!(failures[0].error.to_string().contains("still running"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(log.names("stop"), vec!["A"]);
    assert_eq!(manager.state(), LifecycleState::Stopped);
}

#[test]
fn test_resource_names_keep_registration_order() {
    let log = CallLog::default();
    let manager = manager_with(vec![
        TestResource::new("db", &log),
        TestResource::new("http", &log),
    ]);
    assert_eq!(manager.resource_names(), vec!["db", "http"]);
    assert_eq!(manager.len(), 2);
}
