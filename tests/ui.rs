//! UI interaction handler behavior: modes, timeouts, cancellation.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use common::*;
use taskloom::context::ExecutionContext;
use taskloom::definition::UiConfig;
use taskloom::error::EngineError;
use taskloom::event_bus::{EventBus, EventKind, EventScope, EventStream};
use taskloom::registry::{UiMeta, UiRegistration, UiRegistry, UiRenderResult};
use taskloom::runtime::{ProgressManager, UiInteractionHandler, WaitManager};
use taskloom::types::UiMode;

struct Fixture {
    handler: UiInteractionHandler,
    registry: Arc<UiRegistry>,
    ctx: Arc<ExecutionContext>,
    stream: EventStream,
    _bus: EventBus,
}

fn fixture() -> Fixture {
    let bus = EventBus::silent();
    let stream = bus.subscribe();
    let scope = EventScope::new("wf", "inst", bus.get_emitter());
    let progress = Arc::new(ProgressManager::new(
        &linear_definition("wf", &["s", "t"]),
        scope.clone(),
    ));
    let waits = WaitManager::new(scope.clone(), progress);
    let registry = Arc::new(UiRegistry::new());
    let handler = UiInteractionHandler::new(Arc::clone(&registry), waits, scope);
    Fixture {
        handler,
        registry,
        ctx: Arc::new(ExecutionContext::new()),
        stream,
        _bus: bus,
    }
}

fn events_of(stream: &mut EventStream, kind: EventKind) -> Vec<serde_json::Value> {
    let mut payloads = Vec::new();
    while let Ok(event) = stream.try_recv() {
        if event.kind == kind {
            payloads.push(event.payload);
        }
    }
    payloads
}

#[tokio::test]
async fn unknown_component_fails() {
    let fixture = fixture();
    let config = UiConfig::new("ghost", UiMode::Display);
    let err = fixture
        .handler
        .handle_ui("s", &config, &fixture.ctx)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::UiComponentNotFound { .. }));
}

#[tokio::test]
async fn unsupported_mode_fails() {
    let fixture = fixture();
    fixture
        .registry
        .register(UiRegistration::from_fn(
            UiMeta::new("banner", "Banner", vec![UiMode::Display]),
            |_config, _ctx| async move { Ok(UiRenderResult::rendered()) },
        ))
        .unwrap();

    let config = UiConfig::new("banner", UiMode::Confirm);
    let err = fixture
        .handler
        .handle_ui("s", &config, &fixture.ctx)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::UnsupportedMode { .. }));
}

#[tokio::test]
async fn display_auto_advances_with_renderer_response() {
    let mut fixture = fixture();
    fixture
        .registry
        .register(passive_ui_component("banner"))
        .unwrap();

    let config = UiConfig::new("banner", UiMode::Display).with_timeout_ms(20);
    let output = fixture
        .handler
        .handle_ui("s", &config, &fixture.ctx)
        .await
        .unwrap();

    assert_eq!(output["autoCompleted"], true);
    assert_eq!(output["response"], "shown");

    let responses = events_of(&mut fixture.stream, EventKind::UiResponse);
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0]["autoCompleted"], true);
}

#[tokio::test]
async fn display_swallows_renderer_errors() {
    let fixture = fixture();
    fixture
        .registry
        .register(UiRegistration::from_fn(
            UiMeta::new("broken", "Broken", vec![UiMode::Display]),
            |_config, _ctx| async move {
                Err(EngineError::validation("renderer blew up"))
            },
        ))
        .unwrap();

    let config = UiConfig::new("broken", UiMode::Display).with_timeout_ms(10);
    let output = fixture
        .handler
        .handle_ui("s", &config, &fixture.ctx)
        .await
        .unwrap();
    assert_eq!(output["autoCompleted"], true);
    assert_eq!(output["response"], json!(null));
}

#[tokio::test]
async fn confirm_waits_for_external_response() {
    let fixture = fixture();
    fixture
        .registry
        .register(passive_ui_component("dialog"))
        .unwrap();

    let handler = fixture.handler.clone();
    let ctx = Arc::clone(&fixture.ctx);
    let config = UiConfig::new("dialog", UiMode::Confirm);
    let pending =
        tokio::spawn(async move { handler.handle_ui("s", &config, &ctx).await });

    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    while fixture.handler.pending_interactions().is_empty() {
        assert!(tokio::time::Instant::now() < deadline);
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    fixture
        .handler
        .respond_to_ui("s", UiRenderResult::rendered().with_response(json!(true)))
        .unwrap();

    let output = pending.await.unwrap().unwrap();
    assert_eq!(output["response"], true);
    assert!(fixture.handler.pending_interactions().is_empty());
}

#[tokio::test]
async fn confirm_timeout_fails_the_interaction() {
    let mut fixture = fixture();
    fixture
        .registry
        .register(passive_ui_component("dialog"))
        .unwrap();

    let config = UiConfig::new("dialog", UiMode::Confirm).with_timeout_ms(25);
    let err = fixture
        .handler
        .handle_ui("s", &config, &fixture.ctx)
        .await
        .unwrap_err();
    assert!(err.is_timeout());

    let responses = events_of(&mut fixture.stream, EventKind::UiResponse);
    assert!(responses.iter().any(|p| p["timeout"] == true));
}

#[tokio::test]
async fn select_requires_options() {
    let fixture = fixture();
    fixture
        .registry
        .register(passive_ui_component("picker"))
        .unwrap();

    let config = UiConfig::new("picker", UiMode::Select);
    let err = fixture
        .handler
        .handle_ui("s", &config, &fixture.ctx)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation { .. }));
}

#[tokio::test]
async fn respond_without_pending_interaction_fails() {
    let fixture = fixture();
    let err = fixture
        .handler
        .respond_to_ui("s", UiRenderResult::rendered())
        .unwrap_err();
    assert!(matches!(err, EngineError::NoPendingInteraction { .. }));
}

#[tokio::test]
async fn cancel_pending_interaction_rejects_the_step() {
    let mut fixture = fixture();
    fixture
        .registry
        .register(passive_ui_component("dialog"))
        .unwrap();

    let handler = fixture.handler.clone();
    let ctx = Arc::clone(&fixture.ctx);
    let config = UiConfig::new("dialog", UiMode::Confirm);
    let pending =
        tokio::spawn(async move { handler.handle_ui("s", &config, &ctx).await });

    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    while fixture.handler.pending_interactions().is_empty() {
        assert!(tokio::time::Instant::now() < deadline);
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert!(fixture.handler.cancel_pending_interaction("s"));

    let err = pending.await.unwrap().unwrap_err();
    match err {
        EngineError::Cancelled { reason } => assert_eq!(reason, "UI interaction cancelled"),
        other => panic!("expected Cancelled, got {other:?}"),
    }
    let responses = events_of(&mut fixture.stream, EventKind::UiResponse);
    assert!(responses.iter().any(|p| p["cancelled"] == true));
}

#[tokio::test]
async fn interactions_for_different_steps_coexist() {
    let fixture = fixture();
    fixture
        .registry
        .register(passive_ui_component("dialog"))
        .unwrap();

    let first = {
        let handler = fixture.handler.clone();
        let ctx = Arc::clone(&fixture.ctx);
        let config = UiConfig::new("dialog", UiMode::Confirm);
        tokio::spawn(async move { handler.handle_ui("s", &config, &ctx).await })
    };
    let second = {
        let handler = fixture.handler.clone();
        let ctx = Arc::clone(&fixture.ctx);
        let config = UiConfig::new("dialog", UiMode::Confirm);
        tokio::spawn(async move { handler.handle_ui("t", &config, &ctx).await })
    };

    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    while fixture.handler.pending_interactions().len() < 2 {
        assert!(tokio::time::Instant::now() < deadline);
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    fixture
        .handler
        .respond_to_ui("t", UiRenderResult::rendered().with_response(json!("second")))
        .unwrap();
    fixture
        .handler
        .respond_to_ui("s", UiRenderResult::rendered().with_response(json!("first")))
        .unwrap();

    assert_eq!(first.await.unwrap().unwrap()["response"], "first");
    assert_eq!(second.await.unwrap().unwrap()["response"], "second");
}
