//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use taskloom::config::EngineConfig;
use taskloom::definition::{Definition, Step};
use taskloom::error::EngineError;
use taskloom::event_bus::{EventKind, EventStream, WorkflowEvent};
use taskloom::registry::{ToolMeta, ToolRegistration, UiMeta, UiRegistration, UiRenderResult};
use taskloom::runtime::Engine;
use taskloom::types::{StepStatus, ToolMode, UiMode};

/// An engine with a silent bus and a fast poll interval for tests.
pub fn test_engine() -> Arc<Engine> {
    Arc::new(Engine::new(
        EngineConfig::default()
            .with_silent_event_bus()
            .with_poll_interval(Duration::from_millis(2)),
    ))
}

/// Drains every event already published to the stream.
pub fn drain(stream: &mut EventStream) -> Vec<WorkflowEvent> {
    let mut events = Vec::new();
    while let Ok(event) = stream.try_recv() {
        events.push(event);
    }
    events
}

/// Kinds in publication order, with progress noise filtered out.
pub fn kinds_without_progress(events: &[WorkflowEvent]) -> Vec<EventKind> {
    events
        .iter()
        .map(|e| e.kind)
        .filter(|k| !matches!(k, EventKind::ProgressUpdate | EventKind::StepBarUpdate))
        .collect()
}

/// Events of one kind, in publication order.
pub fn of_kind(events: &[WorkflowEvent], kind: EventKind) -> Vec<WorkflowEvent> {
    events.iter().filter(|e| e.kind == kind).cloned().collect()
}

/// A linear pass-through chain: ids[0] <- ids[1] <- ... <- ids[n-1].
pub fn linear_definition(workflow_id: &str, ids: &[&str]) -> Definition {
    let mut def = Definition::new(workflow_id, workflow_id);
    for (idx, id) in ids.iter().enumerate() {
        let mut step = Step::new(*id, id.to_uppercase(), "task");
        if idx > 0 {
            step = step.with_dependency(ids[idx - 1]);
        }
        def = def.with_step(step);
    }
    def
}

/// A sync tool echoing its params back.
pub fn echo_tool(id: &str) -> ToolRegistration {
    ToolRegistration::from_fn(
        ToolMeta::new(id, "Echo", ToolMode::Sync),
        |params, _ctx| async move { Ok(params) },
    )
}

/// A sync tool that always fails.
pub fn failing_tool(id: &str) -> ToolRegistration {
    let message = format!("{id} exploded");
    ToolRegistration::from_fn(ToolMeta::new(id, "Boom", ToolMode::Sync), move |_, _| {
        let message = message.clone();
        async move { Err(EngineError::validation(message)) }
    })
}

/// A UI component supporting every mode whose renderer reports success.
pub fn passive_ui_component(id: &str) -> UiRegistration {
    UiRegistration::from_fn(
        UiMeta::new(
            id,
            "Passive",
            vec![UiMode::Display, UiMode::Confirm, UiMode::Select],
        ),
        |_config, _ctx| async move { Ok(UiRenderResult::rendered().with_response(json!("shown"))) },
    )
}

/// Polls until the step reaches `status` or the deadline passes.
pub async fn wait_for_status(engine: &Engine, step_id: &str, status: StepStatus) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if engine
            .get_step_state(step_id)
            .is_some_and(|state| state.status == status)
        {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "step '{step_id}' never reached {status}"
        );
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

/// The step output committed for `step_id` in a context snapshot.
pub fn step_output(snapshot: &taskloom::context::ContextSnapshot, step_id: &str) -> Value {
    snapshot
        .step_outputs
        .get(step_id)
        .cloned()
        .unwrap_or_else(|| panic!("no output committed for step '{step_id}'"))
}
