//! The per-step execution pipeline.
//!
//! [`StepExecutor::execute_step`] drives one step from input to committed
//! output through a fixed pipeline: pre-cancellation check, skip policy,
//! before-hooks (which may replace the input), the body under the retry
//! policy, after-hooks (failures swallowed), and finally the output commit.
//!
//! The body itself is supplied by the orchestrator as a [`StepBody`]; inside
//! the engine it dispatches to the UI handler, the tool invoker, or falls
//! through to returning the input unchanged.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::{json, Value};

use super::cancel::CancelToken;
use super::progress::ProgressManager;
use super::skip;
use crate::context::ExecutionContext;
use crate::definition::Step;
use crate::error::EngineError;
use crate::event_bus::{EventKind, EventScope};
use crate::hooks::HookManager;
use crate::types::StepStatus;

/// The work a step performs between its hook pipelines.
#[async_trait]
pub trait StepBody: Send + Sync {
    async fn run(&self, step: &Step, input: Value) -> Result<Value, EngineError>;
}

/// Pass-through body: returns the input unchanged.
pub struct PassThroughBody;

#[async_trait]
impl StepBody for PassThroughBody {
    async fn run(&self, _step: &Step, input: Value) -> Result<Value, EngineError> {
        Ok(input)
    }
}

/// Outcome of one step execution.
#[derive(Clone, Debug)]
pub struct StepResult {
    pub step_id: String,
    pub status: StepStatus,
    pub output: Option<Value>,
    pub error: Option<EngineError>,
    /// Body attempts performed (0 when the body never ran).
    pub attempts: u32,
    /// First after-hook failure, recorded without changing the result.
    pub hook_warning: Option<EngineError>,
}

impl StepResult {
    fn skipped(step_id: &str, output: Value) -> Self {
        Self {
            step_id: step_id.to_string(),
            status: StepStatus::Skipped,
            output: Some(output),
            error: None,
            attempts: 0,
            hook_warning: None,
        }
    }

    fn failed(step_id: &str, error: EngineError, attempts: u32) -> Self {
        Self {
            step_id: step_id.to_string(),
            status: StepStatus::Failed,
            output: None,
            error: Some(error),
            attempts,
            hook_warning: None,
        }
    }
}

/// Runs steps through the skip/hook/retry pipeline.
///
/// One executor serves a whole instance; per-step cancellation flags live
/// here so a step can be cancelled before or during execution.
pub struct StepExecutor {
    hooks: Arc<HookManager>,
    progress: Arc<ProgressManager>,
    scope: EventScope,
    cancels: Mutex<FxHashMap<String, CancelToken>>,
}

impl StepExecutor {
    pub fn new(hooks: Arc<HookManager>, progress: Arc<ProgressManager>, scope: EventScope) -> Self {
        Self {
            hooks,
            progress,
            scope,
            cancels: Mutex::new(FxHashMap::default()),
        }
    }

    /// The cancellation token for a step, created on first use.
    pub fn cancel_token(&self, step_id: &str) -> CancelToken {
        self.cancels
            .lock()
            .entry(step_id.to_string())
            .or_default()
            .clone()
    }

    /// Marks a step cancelled; observed before execution, between attempts
    /// and during retry sleeps.
    pub fn cancel_step(&self, step_id: &str) {
        self.cancel_token(step_id).cancel();
    }

    /// Cancels every step known to this executor.
    pub fn cancel_all(&self) {
        for token in self.cancels.lock().values() {
            token.cancel();
        }
    }

    /// Runs one step to a terminal status.
    pub async fn execute_step(
        &self,
        step: &Step,
        ctx: &Arc<ExecutionContext>,
        body: &dyn StepBody,
        input: Value,
    ) -> StepResult {
        let step_id = step.id.as_str();
        let token = self.cancel_token(step_id);

        if token.is_cancelled() {
            let error = EngineError::cancelled("step cancelled");
            self.progress
                .set_status(step_id, StepStatus::Failed, Some(error.to_string()));
            return StepResult::failed(step_id, error, 0);
        }

        if let Some(policy) = &step.skip {
            if skip::should_skip(policy, step_id, ctx).await {
                let output = policy.default_output.clone().unwrap_or(Value::Null);
                self.scope.emit(
                    EventKind::StepSkip,
                    Some(step_id),
                    json!({ "reason": "skip condition met" }),
                );
                ctx.set_step_output(step_id, output.clone());
                self.progress.set_status(step_id, StepStatus::Skipped, None);
                return StepResult::skipped(step_id, output);
            }
        }

        self.progress.set_status(step_id, StepStatus::Running, None);

        let effective_input = match self
            .hooks
            .execute_before(step_id, input, ctx, step.hooks.as_ref())
            .await
        {
            Ok(value) => value,
            Err(error) => {
                self.scope.emit(
                    EventKind::StepFailed,
                    Some(step_id),
                    json!({
                        "error": error.to_string(),
                        "phase": "beforeHook",
                    }),
                );
                self.progress
                    .set_status(step_id, StepStatus::Failed, Some(error.to_string()));
                return StepResult::failed(step_id, error, 0);
            }
        };

        let max_retries = step.retry.as_ref().map_or(0, |r| r.max_retries);
        let mut attempt: u32 = 1;
        self.scope.emit(
            EventKind::StepStart,
            Some(step_id),
            json!({ "attempt": attempt }),
        );

        let output = loop {
            self.progress.record_attempt(step_id);
            let outcome = body
                .run(step, effective_input.clone())
                .await
                .map_err(|err| annotate_body_error(err, step_id));

            match outcome {
                Ok(output) => {
                    self.scope.emit(
                        EventKind::StepComplete,
                        Some(step_id),
                        json!({
                            "output": &output,
                            "retryCount": attempt - 1,
                        }),
                    );
                    break output;
                }
                Err(error) => {
                    if attempt > max_retries {
                        self.scope.emit(
                            EventKind::StepFailed,
                            Some(step_id),
                            json!({
                                "error": error.to_string(),
                                "retryCount": attempt - 1,
                                "maxRetries": max_retries,
                            }),
                        );
                        self.progress.set_status(
                            step_id,
                            StepStatus::Failed,
                            Some(error.to_string()),
                        );
                        return StepResult::failed(step_id, error, attempt);
                    }

                    let policy = step.retry.as_ref().expect("retries imply a policy");
                    let delay = policy.delay_before_attempt(attempt + 1);
                    if let Err(cancelled) = token.sleep(delay, "step cancelled").await {
                        self.progress.set_status(
                            step_id,
                            StepStatus::Failed,
                            Some(cancelled.to_string()),
                        );
                        return StepResult::failed(step_id, cancelled, attempt);
                    }

                    attempt += 1;
                    self.scope.emit(
                        EventKind::StepRetry,
                        Some(step_id),
                        json!({
                            "attempt": attempt,
                            "maxRetries": max_retries,
                            "lastError": error.to_string(),
                        }),
                    );
                }
            }
        };

        let hook_warning = self
            .hooks
            .execute_after(step_id, &effective_input, &output, ctx, step.hooks.as_ref())
            .await;

        ctx.set_step_output(step_id, output.clone());
        self.progress.set_status(step_id, StepStatus::Success, None);

        StepResult {
            step_id: step_id.to_string(),
            status: StepStatus::Success,
            output: Some(output),
            error: None,
            attempts: attempt,
            hook_warning,
        }
    }
}

/// Body errors carry the step id; engine-level errors (timeouts,
/// cancellations, tool and hook failures) pass through untouched.
fn annotate_body_error(err: EngineError, step_id: &str) -> EngineError {
    match err {
        EngineError::Timeout { .. }
        | EngineError::Cancelled { .. }
        | EngineError::ToolExecution { .. }
        | EngineError::ToolNotFound { .. }
        | EngineError::UiComponentNotFound { .. }
        | EngineError::SchemaValidation { .. }
        | EngineError::InvalidOption { .. }
        | EngineError::UnsupportedMode { .. }
        | EngineError::HookExecution { .. }
        | EngineError::StepExecution { .. } => err,
        other => EngineError::step_execution(step_id, other.to_string()),
    }
}
