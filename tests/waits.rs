//! Wait manager behavior: resume, cancel, timeout strategies, extension.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;

use common::linear_definition;
use taskloom::error::EngineError;
use taskloom::event_bus::{EventBus, EventKind, EventScope, EventStream};
use taskloom::runtime::{ProgressManager, TimeoutStrategy, WaitManager};
use taskloom::types::WaitKind;

fn manager() -> (WaitManager, EventStream, EventBus) {
    let bus = EventBus::silent();
    let stream = bus.subscribe();
    let scope = EventScope::new("wf", "inst", bus.get_emitter());
    let progress = Arc::new(ProgressManager::new(
        &linear_definition("wf", &["s", "t"]),
        scope.clone(),
    ));
    (WaitManager::new(scope, progress), stream, bus)
}

fn count_kind(stream: &mut EventStream, kind: EventKind) -> usize {
    let mut count = 0;
    while let Ok(event) = stream.try_recv() {
        if event.kind == kind {
            count += 1;
        }
    }
    count
}

#[tokio::test]
async fn resume_resolves_the_future() {
    let (manager, mut stream, _bus) = manager();
    let future = manager
        .start_wait("s", WaitKind::Signal, "external", None, None)
        .unwrap();

    assert!(manager.is_waiting("s"));
    assert_eq!(manager.waiting_step_ids(), vec!["s".to_string()]);
    assert!(manager.resume_wait("s", json!({"ok": true})));

    let value = future.await.unwrap();
    assert_eq!(value, json!({"ok": true}));
    assert!(!manager.is_waiting("s"));
    assert_eq!(manager.waiting_count(), 0);
    assert_eq!(count_kind(&mut stream, EventKind::WaitResume), 1);
}

#[tokio::test]
async fn resume_without_wait_returns_false() {
    let (manager, _stream, _bus) = manager();
    assert!(!manager.resume_wait("ghost", json!(null)));
}

#[tokio::test]
async fn second_wait_for_same_step_conflicts() {
    let (manager, _stream, _bus) = manager();
    let _first = manager
        .start_wait("s", WaitKind::Signal, "one", None, None)
        .unwrap();
    let err = manager
        .start_wait("s", WaitKind::Signal, "two", None, None)
        .unwrap_err();
    assert!(matches!(err, EngineError::WaitConflict { .. }));
}

#[tokio::test]
async fn error_strategy_times_out_no_earlier_than_deadline() {
    let (manager, mut stream, _bus) = manager();
    let started = Instant::now();
    let future = manager
        .start_wait("s", WaitKind::Tool, "calc", Some(Duration::from_millis(50)), None)
        .unwrap();

    let err = future.await.unwrap_err();
    assert!(started.elapsed() >= Duration::from_millis(50));
    assert!(matches!(err, EngineError::Timeout { timeout_ms: 50, .. }));
    assert!(!manager.is_waiting("s"));
    assert_eq!(count_kind(&mut stream, EventKind::WaitTimeout), 1);
}

#[tokio::test]
async fn default_strategy_resolves_with_fallback() {
    let (manager, mut stream, _bus) = manager();
    let future = manager
        .start_wait_with_config(
            "s",
            WaitKind::Ui,
            "panel",
            Some(Duration::from_millis(20)),
            None,
            TimeoutStrategy::Default(json!("fallback")),
        )
        .unwrap();

    let value = future.await.unwrap();
    assert_eq!(value, json!("fallback"));
    assert_eq!(count_kind(&mut stream, EventKind::WaitTimeout), 1);
}

#[tokio::test]
async fn ignore_strategy_survives_timeouts_until_resumed() {
    let (manager, mut stream, _bus) = manager();
    let future = manager
        .start_wait_with_config(
            "s",
            WaitKind::Signal,
            "slowpoke",
            Some(Duration::from_millis(25)),
            None,
            TimeoutStrategy::Ignore,
        )
        .unwrap();

    // Outlive two timer firings, then resume.
    tokio::time::sleep(Duration::from_millis(70)).await;
    assert!(manager.is_waiting("s"));
    assert!(manager.resume_wait("s", json!("late but fine")));

    let value = future.await.unwrap();
    assert_eq!(value, json!("late but fine"));
    assert!(count_kind(&mut stream, EventKind::WaitTimeout) >= 2);
}

#[tokio::test]
async fn cancel_rejects_with_reason() {
    let (manager, mut stream, _bus) = manager();
    let future = manager
        .start_wait("s", WaitKind::Ui, "panel", None, None)
        .unwrap();
    assert!(manager.cancel_wait("s", "operator abort"));

    let err = future.await.unwrap_err();
    match err {
        EngineError::Cancelled { reason } => assert_eq!(reason, "operator abort"),
        other => panic!("expected Cancelled, got {other:?}"),
    }
    assert_eq!(count_kind(&mut stream, EventKind::WaitCancel), 1);
}

#[tokio::test]
async fn cancel_all_rejects_every_wait() {
    let (manager, _stream, _bus) = manager();
    let first = manager
        .start_wait("s", WaitKind::Signal, "one", None, None)
        .unwrap();
    let second = manager
        .start_wait("t", WaitKind::Signal, "two", None, None)
        .unwrap();
    assert_eq!(manager.waiting_count(), 2);

    manager.cancel_all_waits("shutdown");
    assert!(first.await.unwrap_err().is_cancelled());
    assert!(second.await.unwrap_err().is_cancelled());
    assert_eq!(manager.waiting_count(), 0);
}

#[tokio::test]
async fn extend_timeout_pushes_the_deadline() {
    let (manager, _stream, _bus) = manager();
    let future = manager
        .start_wait("s", WaitKind::Tool, "calc", Some(Duration::from_millis(40)), None)
        .unwrap();

    assert!(manager.extend_timeout("s", 120));
    tokio::time::sleep(Duration::from_millis(80)).await;
    // The original deadline has passed but the extension keeps it alive.
    assert!(manager.is_waiting("s"));
    assert!(manager.remaining_time("s").is_some());

    assert!(manager.resume_wait("s", json!("made it")));
    assert_eq!(future.await.unwrap(), json!("made it"));
}

#[tokio::test]
async fn negative_extension_fires_the_timeout_immediately() {
    let (manager, _stream, _bus) = manager();
    let future = manager
        .start_wait("s", WaitKind::Tool, "calc", Some(Duration::from_secs(60)), None)
        .unwrap();

    assert!(manager.extend_timeout("s", -120_000));
    let err = future.await.unwrap_err();
    assert!(err.is_timeout());
    assert!(!manager.is_waiting("s"));
}

#[tokio::test]
async fn extend_without_timer_is_rejected() {
    let (manager, _stream, _bus) = manager();
    let _future = manager
        .start_wait("s", WaitKind::Signal, "one", None, None)
        .unwrap();
    assert!(!manager.extend_timeout("s", 1000));
    assert!(!manager.extend_timeout("ghost", 1000));
}

#[tokio::test]
async fn waiting_info_reflects_the_wait() {
    let (manager, _stream, _bus) = manager();
    let _future = manager
        .start_wait(
            "s",
            WaitKind::Ui,
            "panel",
            Some(Duration::from_secs(5)),
            Some(json!({"prompt": "continue?"})),
        )
        .unwrap();

    let info = manager.waiting_info("s").unwrap();
    assert_eq!(info.kind, WaitKind::Ui);
    assert_eq!(info.target_id, "panel");
    assert_eq!(info.timeout_ms, Some(5000));
    assert_eq!(info.data, Some(json!({"prompt": "continue?"})));

    let remaining = manager.remaining_time("s").unwrap();
    assert!(remaining <= Duration::from_secs(5));
    assert!(remaining > Duration::from_secs(3));
}
