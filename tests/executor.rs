//! Step executor pipeline: skip, hooks, retry, cancellation, commit.

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use common::*;
use taskloom::context::ExecutionContext;
use taskloom::definition::{RetryPolicy, SkipPolicy, Step};
use taskloom::error::EngineError;
use taskloom::event_bus::{EventBus, EventKind, EventScope, EventStream};
use taskloom::hooks::{Hook, HookManager, HookSet};
use taskloom::runtime::{PassThroughBody, ProgressManager, StepBody, StepExecutor};
use taskloom::types::StepStatus;

struct Fixture {
    executor: StepExecutor,
    hooks: Arc<HookManager>,
    ctx: Arc<ExecutionContext>,
    stream: EventStream,
    _bus: EventBus,
}

fn fixture() -> Fixture {
    let bus = EventBus::silent();
    let stream = bus.subscribe();
    let scope = EventScope::new("wf", "inst", bus.get_emitter());
    let progress = Arc::new(ProgressManager::new(
        &linear_definition("wf", &["s"]),
        scope.clone(),
    ));
    let hooks = Arc::new(HookManager::new());
    let executor = StepExecutor::new(Arc::clone(&hooks), progress, scope);
    Fixture {
        executor,
        hooks,
        ctx: Arc::new(ExecutionContext::new()),
        stream,
        _bus: bus,
    }
}

/// Body that fails a configurable number of times before succeeding.
struct FlakyBody {
    calls: Arc<AtomicU32>,
    failures: u32,
}

#[async_trait]
impl StepBody for FlakyBody {
    async fn run(&self, _step: &Step, input: Value) -> Result<Value, EngineError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
            Err(EngineError::validation("flaky"))
        } else {
            Ok(input)
        }
    }
}

/// Body that records the input it received.
struct CapturingBody {
    seen: Arc<parking_lot::Mutex<Option<Value>>>,
}

#[async_trait]
impl StepBody for CapturingBody {
    async fn run(&self, _step: &Step, input: Value) -> Result<Value, EngineError> {
        *self.seen.lock() = Some(input.clone());
        Ok(input)
    }
}

fn kinds(stream: &mut EventStream) -> Vec<EventKind> {
    let mut kinds = Vec::new();
    while let Ok(event) = stream.try_recv() {
        if !matches!(
            event.kind,
            EventKind::StepBarUpdate | EventKind::ProgressUpdate
        ) {
            kinds.push(event.kind);
        }
    }
    kinds
}

#[tokio::test]
async fn success_commits_output_and_emits_lifecycle() {
    let mut fixture = fixture();
    let step = Step::new("s", "S", "task");

    let result = fixture
        .executor
        .execute_step(&step, &fixture.ctx, &PassThroughBody, json!("in"))
        .await;

    assert_eq!(result.status, StepStatus::Success);
    assert_eq!(result.output, Some(json!("in")));
    assert_eq!(result.attempts, 1);
    assert_eq!(fixture.ctx.get_step_output("s"), Some(json!("in")));
    assert_eq!(
        kinds(&mut fixture.stream),
        vec![EventKind::StepStart, EventKind::StepComplete]
    );
}

#[tokio::test]
async fn skip_policy_bypasses_hooks_and_body() {
    let mut fixture = fixture();
    fixture
        .hooks
        .add_global_before(Hook::from_fn("never", "Never", |_| async {
            panic!("before-hooks must not run for skipped steps")
        }));

    let step = Step::new("s", "S", "task").with_skip(
        SkipPolicy::expression("true").with_default_output(json!({"via": "skip"})),
    );
    let result = fixture
        .executor
        .execute_step(&step, &fixture.ctx, &PassThroughBody, json!(null))
        .await;

    assert_eq!(result.status, StepStatus::Skipped);
    assert_eq!(result.attempts, 0);
    assert_eq!(
        fixture.ctx.get_step_output("s"),
        Some(json!({"via": "skip"}))
    );
    assert_eq!(kinds(&mut fixture.stream), vec![EventKind::StepSkip]);
}

#[tokio::test]
async fn before_hooks_shape_the_body_input() {
    let fixture = fixture();
    fixture
        .hooks
        .add_global_before(Hook::from_fn("global", "Global", |mut hc| async move {
            hc.input = json!({"chain": ["global"]});
            Ok(hc)
        }));
    let step_hooks = HookSet::new().with_before(Hook::from_fn(
        "step",
        "Step",
        |mut hc| async move {
            hc.input["chain"]
                .as_array_mut()
                .unwrap()
                .push(json!("step"));
            Ok(hc)
        },
    ));

    let seen = Arc::new(parking_lot::Mutex::new(None));
    let body = CapturingBody {
        seen: Arc::clone(&seen),
    };
    let step = Step::new("s", "S", "task").with_hooks(step_hooks);
    let result = fixture
        .executor
        .execute_step(&step, &fixture.ctx, &body, json!("original"))
        .await;

    assert_eq!(result.status, StepStatus::Success);
    // Global hooks run first, then step hooks; the body sees the final value.
    assert_eq!(
        seen.lock().clone().unwrap(),
        json!({"chain": ["global", "step"]})
    );
}

#[tokio::test]
async fn before_hook_failure_prevents_the_body() {
    let mut fixture = fixture();
    fixture
        .hooks
        .add_global_before(Hook::from_fn("gate", "Gate", |_| async {
            Err(EngineError::validation("denied"))
        }));

    let body_calls = Arc::new(AtomicU32::new(0));
    let body = FlakyBody {
        calls: Arc::clone(&body_calls),
        failures: 0,
    };
    let step = Step::new("s", "S", "task");
    let result = fixture
        .executor
        .execute_step(&step, &fixture.ctx, &body, json!(null))
        .await;

    assert_eq!(result.status, StepStatus::Failed);
    assert_eq!(body_calls.load(Ordering::SeqCst), 0);
    assert!(matches!(
        result.error,
        Some(EngineError::HookExecution { .. })
    ));
    assert!(!fixture.ctx.has_step_output("s"));
    assert_eq!(kinds(&mut fixture.stream), vec![EventKind::StepFailed]);
}

#[tokio::test]
async fn after_hook_failure_leaves_result_intact() {
    let fixture = fixture();
    fixture
        .hooks
        .add_global_after(Hook::from_fn("audit", "Audit", |_| async {
            Err(EngineError::validation("audit offline"))
        }));

    let step = Step::new("s", "S", "task");
    let result = fixture
        .executor
        .execute_step(&step, &fixture.ctx, &PassThroughBody, json!(42))
        .await;

    assert_eq!(result.status, StepStatus::Success);
    assert_eq!(result.output, Some(json!(42)));
    assert!(matches!(
        result.hook_warning,
        Some(EngineError::HookExecution { .. })
    ));
    assert_eq!(fixture.ctx.get_step_output("s"), Some(json!(42)));
}

#[tokio::test]
async fn exhausted_retries_fail_with_attempt_count() {
    let mut fixture = fixture();
    let calls = Arc::new(AtomicU32::new(0));
    let body = FlakyBody {
        calls: Arc::clone(&calls),
        failures: u32::MAX,
    };
    let step = Step::new("s", "S", "task").with_retry(RetryPolicy::fixed(2, 5));

    let result = fixture
        .executor
        .execute_step(&step, &fixture.ctx, &body, json!(null))
        .await;

    assert_eq!(result.status, StepStatus::Failed);
    assert_eq!(result.attempts, 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(!fixture.ctx.has_step_output("s"));
    assert_eq!(
        kinds(&mut fixture.stream),
        vec![
            EventKind::StepStart,
            EventKind::StepRetry,
            EventKind::StepRetry,
            EventKind::StepFailed,
        ]
    );
}

#[tokio::test]
async fn pre_cancelled_step_never_runs() {
    let fixture = fixture();
    fixture.executor.cancel_step("s");

    let calls = Arc::new(AtomicU32::new(0));
    let body = FlakyBody {
        calls: Arc::clone(&calls),
        failures: 0,
    };
    let step = Step::new("s", "S", "task");
    let result = fixture
        .executor
        .execute_step(&step, &fixture.ctx, &body, json!(null))
        .await;

    assert_eq!(result.status, StepStatus::Failed);
    assert!(result.error.unwrap().is_cancelled());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn cancellation_during_retry_sleep_fails_the_step() {
    let fixture = fixture();
    let calls = Arc::new(AtomicU32::new(0));
    let body = FlakyBody {
        calls: Arc::clone(&calls),
        failures: u32::MAX,
    };
    let step = Step::new("s", "S", "task").with_retry(RetryPolicy::fixed(5, 5_000));

    let executor = fixture.executor;
    let ctx = Arc::clone(&fixture.ctx);
    let executor = Arc::new(executor);
    let runner = Arc::clone(&executor);
    let run = tokio::spawn(async move {
        runner
            .execute_step(&step, &ctx, &body, json!(null))
            .await
    });

    // Let attempt 1 fail and the long retry sleep begin, then cancel.
    tokio::time::sleep(Duration::from_millis(30)).await;
    executor.cancel_step("s");

    let result = run.await.unwrap();
    assert_eq!(result.status, StepStatus::Failed);
    assert!(result.error.unwrap().is_cancelled());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
