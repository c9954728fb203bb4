//! Synchronous and asynchronous tool dispatch.
//!
//! Sync tools run their executor directly, racing an optional per-call
//! timeout. Async tools suspend through the wait manager and are resolved
//! externally via [`ToolInvoker::respond_to_tool`] /
//! [`ToolInvoker::respond_to_tool_error`]; an armed timer fails the call
//! with a timeout if neither arrives.
//!
//! [`ToolInvoker::execute_tool_invocations`] runs a step's declarative
//! invocation list sequentially, depositing results into globals when an
//! `output_key` is declared and stopping at the first failure. The batch
//! list is the step output for tool-only steps.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::{json, Value};

use super::wait::WaitManager;
use crate::context::ExecutionContext;
use crate::definition::ToolInvocation;
use crate::error::EngineError;
use crate::event_bus::{EventKind, EventScope};
use crate::registry::{ToolRegistry, ToolRegistration};
use crate::types::{ToolMode, WaitKind};

/// Outcome of one tool call.
#[derive(Clone, Debug)]
pub struct ToolCallResult {
    pub tool_id: String,
    pub result: Result<Value, EngineError>,
    pub duration: Duration,
}

impl ToolCallResult {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// Per-invocation output object used in batch step outputs.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match &self.result {
            Ok(result) => json!({
                "toolId": self.tool_id,
                "success": true,
                "result": result,
                "durationMs": self.duration.as_millis() as u64,
            }),
            Err(err) => json!({
                "toolId": self.tool_id,
                "success": false,
                "error": err.to_string(),
                "durationMs": self.duration.as_millis() as u64,
            }),
        }
    }
}

/// Dispatches tool calls for one workflow instance.
#[derive(Clone)]
pub struct ToolInvoker {
    registry: Arc<ToolRegistry>,
    waits: WaitManager,
    scope: EventScope,
    /// Step id -> tool id currently awaited by that step.
    pending: Arc<Mutex<FxHashMap<String, String>>>,
}

impl ToolInvoker {
    pub fn new(registry: Arc<ToolRegistry>, waits: WaitManager, scope: EventScope) -> Self {
        Self {
            registry,
            waits,
            scope,
            pending: Arc::new(Mutex::new(FxHashMap::default())),
        }
    }

    /// Invokes a tool by id.
    ///
    /// Never returns `Err` for tool-level failures; the failure is carried
    /// inside the returned [`ToolCallResult`] so batch execution can collect
    /// partial results.
    pub async fn invoke(
        &self,
        tool_id: &str,
        params: Value,
        ctx: &Arc<ExecutionContext>,
        step_id: Option<&str>,
    ) -> ToolCallResult {
        let started = Instant::now();
        let registration = match self.registry.get(tool_id) {
            Ok(registration) => registration,
            Err(err) => {
                return ToolCallResult {
                    tool_id: tool_id.to_string(),
                    result: Err(err),
                    duration: started.elapsed(),
                };
            }
        };

        if let Some(schema) = &registration.meta.input_schema {
            let failures = schema.validate(&params);
            if !failures.is_empty() {
                let err = EngineError::SchemaValidation { failures };
                self.emit_failed(tool_id, step_id, &err, started.elapsed());
                return ToolCallResult {
                    tool_id: tool_id.to_string(),
                    result: Err(err),
                    duration: started.elapsed(),
                };
            }
        }

        self.scope.emit(
            EventKind::ToolInvoke,
            step_id,
            json!({
                "toolId": tool_id,
                "params": &params,
                "mode": registration.meta.mode,
            }),
        );

        let result = match registration.meta.mode {
            ToolMode::Sync => {
                self.run_sync(&registration, tool_id, params, ctx, step_id)
                    .await
            }
            ToolMode::Async => self.run_async(&registration, tool_id, step_id).await,
        };

        let duration = started.elapsed();
        match &result {
            Ok(value) => {
                self.scope.emit(
                    EventKind::ToolComplete,
                    step_id,
                    json!({
                        "toolId": tool_id,
                        "result": value,
                        "duration": duration.as_millis() as u64,
                        "mode": registration.meta.mode,
                    }),
                );
            }
            Err(err) => self.emit_failed(tool_id, step_id, err, duration),
        }

        ToolCallResult {
            tool_id: tool_id.to_string(),
            result,
            duration,
        }
    }

    async fn run_sync(
        &self,
        registration: &ToolRegistration,
        tool_id: &str,
        params: Value,
        ctx: &Arc<ExecutionContext>,
        step_id: Option<&str>,
    ) -> Result<Value, EngineError> {
        let call = registration.executor.execute(params, Arc::clone(ctx));
        let outcome = match registration.meta.timeout_ms {
            Some(timeout_ms) => {
                match tokio::time::timeout(Duration::from_millis(timeout_ms), call).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(EngineError::Timeout {
                        step_id: step_id.map(str::to_string),
                        timeout_ms,
                    }),
                }
            }
            None => call.await,
        };
        outcome.map_err(|err| wrap_tool_error(err, tool_id, step_id))
    }

    async fn run_async(
        &self,
        registration: &ToolRegistration,
        tool_id: &str,
        step_id: Option<&str>,
    ) -> Result<Value, EngineError> {
        let Some(step_id) = step_id else {
            return Err(EngineError::ToolExecution {
                tool_id: tool_id.to_string(),
                step_id: None,
                message: "async tools require a step context".to_string(),
            });
        };

        let timeout = registration.meta.timeout_ms.map(Duration::from_millis);
        let future = self
            .waits
            .start_wait(step_id, WaitKind::Tool, tool_id, timeout, None)?;
        self.pending
            .lock()
            .insert(step_id.to_string(), tool_id.to_string());

        let result = future.await;
        self.pending.lock().remove(step_id);
        result.map_err(|err| {
            if err.is_timeout() {
                err
            } else {
                wrap_tool_error(err, tool_id, Some(step_id))
            }
        })
    }

    /// Resolves a pending async call with a successful result.
    ///
    /// Returns `false` when no call matching `(step_id, tool_id)` is pending.
    pub fn respond_to_tool(&self, step_id: &str, tool_id: &str, result: Value) -> bool {
        if !self.is_pending(step_id, tool_id) {
            return false;
        }
        self.waits.resume_wait(step_id, result)
    }

    /// Resolves a pending async call with a failure.
    pub fn respond_to_tool_error(&self, step_id: &str, tool_id: &str, error: &str) -> bool {
        if !self.is_pending(step_id, tool_id) {
            return false;
        }
        self.waits.fail_wait(
            step_id,
            EngineError::ToolExecution {
                tool_id: tool_id.to_string(),
                step_id: Some(step_id.to_string()),
                message: error.to_string(),
            },
        )
    }

    /// Rejects pending calls for a step (optionally restricted to one tool)
    /// with "tool call cancelled". Returns the number of calls rejected.
    pub fn cancel_pending_calls(&self, step_id: &str, tool_id: Option<&str>) -> usize {
        let matched = {
            let pending = self.pending.lock();
            match (pending.get(step_id), tool_id) {
                (Some(pending_tool), Some(filter)) => pending_tool == filter,
                (Some(_), None) => true,
                (None, _) => false,
            }
        };
        if matched && self.waits.cancel_wait(step_id, "tool call cancelled") {
            self.pending.lock().remove(step_id);
            1
        } else {
            0
        }
    }

    /// Pending async calls as `(step_id, tool_id)` pairs.
    #[must_use]
    pub fn pending_calls(&self) -> Vec<(String, String)> {
        let mut calls: Vec<(String, String)> = self
            .pending
            .lock()
            .iter()
            .map(|(step, tool)| (step.clone(), tool.clone()))
            .collect();
        calls.sort();
        calls
    }

    /// Runs a step's invocation list sequentially.
    ///
    /// Successful results are written to `ctx.globals[output_key]` when an
    /// output key is declared. The first failure stops the batch; the
    /// results collected so far and the failure are both returned.
    pub async fn execute_tool_invocations(
        &self,
        invocations: &[ToolInvocation],
        ctx: &Arc<ExecutionContext>,
        step_id: &str,
    ) -> (Vec<ToolCallResult>, Option<EngineError>) {
        let mut results = Vec::with_capacity(invocations.len());
        for invocation in invocations {
            let params = invocation.params.clone().unwrap_or(Value::Null);
            let call = self
                .invoke(&invocation.tool_id, params, ctx, Some(step_id))
                .await;
            match &call.result {
                Ok(value) => {
                    if let Some(output_key) = &invocation.output_key {
                        ctx.set_global(output_key.clone(), value.clone());
                    }
                    results.push(call);
                }
                Err(err) => {
                    let err = err.clone();
                    results.push(call);
                    return (results, Some(err));
                }
            }
        }
        (results, None)
    }

    fn is_pending(&self, step_id: &str, tool_id: &str) -> bool {
        self.pending
            .lock()
            .get(step_id)
            .is_some_and(|pending_tool| pending_tool == tool_id)
    }

    fn emit_failed(
        &self,
        tool_id: &str,
        step_id: Option<&str>,
        err: &EngineError,
        duration: Duration,
    ) {
        self.scope.emit(
            EventKind::ToolFailed,
            step_id,
            json!({
                "toolId": tool_id,
                "error": err.to_string(),
                "errorName": err.name(),
                "duration": duration.as_millis() as u64,
            }),
        );
    }
}

fn wrap_tool_error(err: EngineError, tool_id: &str, step_id: Option<&str>) -> EngineError {
    match err {
        EngineError::Timeout { .. } => err,
        EngineError::Cancelled { .. } => err,
        EngineError::ToolExecution { .. } => err,
        other => EngineError::ToolExecution {
            tool_id: tool_id.to_string(),
            step_id: step_id.map(str::to_string),
            message: other.to_string(),
        },
    }
}
