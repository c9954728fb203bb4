//! The engine orchestrator.
//!
//! [`Engine`] couples the DAG scheduler, step executor, wait manager, tool
//! invoker and UI handler into the main execution loop: load and validate a
//! definition, then repeatedly compute the ready frontier and fan every
//! ready step out as a concurrent task, waiting for the whole batch before
//! recomputing. Success and Skipped steps enter the completed set; Failed
//! steps are tracked separately and block their downstream dependents, so
//! the loop exits cleanly once the remaining reachable work is gated behind
//! a failure.
//!
//! # Example
//!
//! ```rust,no_run
//! use taskloom::config::EngineConfig;
//! use taskloom::definition::{Definition, Step};
//! use taskloom::runtime::Engine;
//!
//! # async fn example() -> Result<(), taskloom::error::EngineError> {
//! let engine = Engine::new(EngineConfig::default());
//! let def = Definition::new("demo", "Demo")
//!     .with_step(Step::new("a", "A", "task"))
//!     .with_step(Step::new("b", "B", "task").with_dependency("a"));
//!
//! engine.load_workflow(def)?;
//! let result = engine.start(None).await?;
//! println!("finished: {}", result.status);
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::{json, Map, Value};
use tracing::instrument;
use uuid::Uuid;

use super::executor::{StepBody, StepExecutor, StepResult};
use super::progress::{ProgressManager, StepBarState, StepRuntimeState};
use super::tool::{ToolCallResult, ToolInvoker};
use super::ui::UiInteractionHandler;
use super::wait::WaitManager;
use crate::config::EngineConfig;
use crate::context::{ContextSnapshot, ExecutionContext};
use crate::dag::Dag;
use crate::definition::{Definition, Step};
use crate::error::EngineError;
use crate::event_bus::{EventBus, EventKind, EventScope, EventStream, SinkId};
use crate::hooks::{Hook, HookManager};
use crate::registry::{
    StepTypeMeta, StepTypeRegistry, ToolMeta, ToolRegistration, ToolRegistry, UiMeta,
    UiRegistration, UiRegistry, UiRenderResult,
};
use crate::serialize;
use crate::types::{HookPhase, StepStatus, WorkflowStatus};

/// Final outcome of a workflow run.
#[derive(Clone, Debug)]
pub struct WorkflowResult {
    pub status: WorkflowStatus,
    /// Snapshot of the context at termination; the live context is preserved
    /// on the engine for further inspection.
    pub context: ContextSnapshot,
    pub error: Option<EngineError>,
}

/// Body dispatched by the orchestrator: UI config first, then declarative
/// tool invocations, else pass-through.
struct EngineBody {
    ui: UiInteractionHandler,
    tools: ToolInvoker,
    ctx: Arc<ExecutionContext>,
}

#[async_trait]
impl StepBody for EngineBody {
    async fn run(&self, step: &Step, input: Value) -> Result<Value, EngineError> {
        if let Some(ui_config) = &step.ui {
            return self.ui.handle_ui(&step.id, ui_config, &self.ctx).await;
        }
        if !step.tools.is_empty() {
            let (results, error) = self
                .tools
                .execute_tool_invocations(&step.tools, &self.ctx, &step.id)
                .await;
            if let Some(error) = error {
                return Err(error);
            }
            let batch: Vec<Value> = results.iter().map(ToolCallResult::to_value).collect();
            return Ok(Value::Array(batch));
        }
        Ok(input)
    }
}

/// Everything belonging to one loaded workflow instance.
struct Instance {
    definition: Arc<Definition>,
    dag: Arc<Dag>,
    instance_id: String,
    ctx: Arc<ExecutionContext>,
    scope: EventScope,
    progress: Arc<ProgressManager>,
    waits: WaitManager,
    tool_invoker: ToolInvoker,
    ui_handler: UiInteractionHandler,
    executor: Arc<StepExecutor>,
    body: Arc<EngineBody>,
    status: RwLock<WorkflowStatus>,
    completed: RwLock<FxHashSet<String>>,
    failed: RwLock<Vec<(String, EngineError)>>,
    started_at: RwLock<Option<DateTime<Utc>>>,
    ended_at: RwLock<Option<DateTime<Utc>>>,
    cancelled: AtomicBool,
}

impl Instance {
    fn status(&self) -> WorkflowStatus {
        *self.status.read()
    }

    fn set_status(&self, status: WorkflowStatus) {
        *self.status.write() = status;
    }

    fn completed_count(&self) -> usize {
        self.completed.read().len()
    }

    fn first_failure(&self) -> Option<(String, EngineError)> {
        self.failed.read().first().cloned()
    }
}

/// The workflow engine: registries, hook manager, event bus and the
/// currently loaded instance.
///
/// Registries and the hook manager are engine-scoped rather than module
/// globals, so multiple engines can coexist in one process.
pub struct Engine {
    config: EngineConfig,
    event_bus: EventBus,
    tools: Arc<ToolRegistry>,
    ui_components: Arc<UiRegistry>,
    step_types: Arc<StepTypeRegistry>,
    hooks: Arc<HookManager>,
    instance: RwLock<Option<Arc<Instance>>>,
}

impl Engine {
    /// Creates an engine whose event bus is built from the configuration.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        let event_bus = config.event_bus.build_event_bus();
        Self::with_bus(config, event_bus)
    }

    /// Creates an engine around a caller-supplied event bus (custom sinks,
    /// per-request isolation, streaming).
    #[must_use]
    pub fn with_bus(config: EngineConfig, event_bus: EventBus) -> Self {
        event_bus.listen_for_events();
        Self {
            config,
            event_bus,
            tools: Arc::new(ToolRegistry::new()),
            ui_components: Arc::new(UiRegistry::new()),
            step_types: Arc::new(StepTypeRegistry::with_defaults()),
            hooks: Arc::new(HookManager::new()),
            instance: RwLock::new(None),
        }
    }

    // -----------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------

    /// Validates a definition and prepares a fresh instance for it.
    ///
    /// Returns the new instance id. Replaces any previously loaded
    /// instance.
    #[instrument(skip(self, definition), fields(workflow = %definition.id))]
    pub fn load_workflow(&self, definition: Definition) -> Result<String, EngineError> {
        definition.validate()?;
        let dag = Dag::build(&definition)?;

        let instance_id = Uuid::new_v4().to_string();
        let scope = EventScope::new(
            definition.id.clone(),
            instance_id.clone(),
            self.event_bus.get_emitter(),
        );
        let ctx = Arc::new(ExecutionContext::new());
        let progress = Arc::new(ProgressManager::new(&definition, scope.clone()));
        let waits = WaitManager::new(scope.clone(), Arc::clone(&progress));
        let tool_invoker = ToolInvoker::new(Arc::clone(&self.tools), waits.clone(), scope.clone());
        let ui_handler = UiInteractionHandler::new(
            Arc::clone(&self.ui_components),
            waits.clone(),
            scope.clone(),
        );
        let executor = Arc::new(StepExecutor::new(
            Arc::clone(&self.hooks),
            Arc::clone(&progress),
            scope.clone(),
        ));
        let body = Arc::new(EngineBody {
            ui: ui_handler.clone(),
            tools: tool_invoker.clone(),
            ctx: Arc::clone(&ctx),
        });

        if let Some(global_hooks) = &definition.global_hooks {
            for hook in &global_hooks.before {
                self.hooks.add_global_before(hook.clone());
            }
            for hook in &global_hooks.after {
                self.hooks.add_global_after(hook.clone());
            }
        }

        let instance = Instance {
            definition: Arc::new(definition),
            dag: Arc::new(dag),
            instance_id: instance_id.clone(),
            ctx,
            scope,
            progress,
            waits,
            tool_invoker,
            ui_handler,
            executor,
            body,
            status: RwLock::new(WorkflowStatus::Idle),
            completed: RwLock::new(FxHashSet::default()),
            failed: RwLock::new(Vec::new()),
            started_at: RwLock::new(None),
            ended_at: RwLock::new(None),
            cancelled: AtomicBool::new(false),
        };
        *self.instance.write() = Some(Arc::new(instance));
        Ok(instance_id)
    }

    /// Runs the loaded workflow to termination.
    ///
    /// `initial_globals` seed the context before the first frontier is
    /// computed. Rejects when no workflow is loaded or the instance is
    /// already executing.
    #[instrument(skip(self, initial_globals))]
    pub async fn start(
        &self,
        initial_globals: Option<FxHashMap<String, Value>>,
    ) -> Result<WorkflowResult, EngineError> {
        let instance = self.require_instance()?;
        match instance.status() {
            WorkflowStatus::Running | WorkflowStatus::Paused => {
                return Err(EngineError::AlreadyRunning);
            }
            _ => {}
        }

        instance.completed.write().clear();
        instance.failed.write().clear();
        instance.cancelled.store(false, Ordering::SeqCst);

        if let Some(globals) = initial_globals {
            for (key, value) in globals {
                instance.ctx.set_global(key, value);
            }
        }

        let started_at = Utc::now();
        *instance.started_at.write() = Some(started_at);
        instance.set_status(WorkflowStatus::Running);
        instance.scope.emit(
            EventKind::WorkflowStart,
            None,
            json!({
                "totalSteps": instance.dag.len(),
                "startTime": started_at.to_rfc3339(),
            }),
        );

        self.run_loop(&instance).await;
        Ok(self.finalize(&instance))
    }

    /// Parks the main loop; in-flight steps run to completion.
    pub fn pause(&self) -> Result<(), EngineError> {
        self.transition(WorkflowStatus::Running, WorkflowStatus::Paused)
    }

    /// Un-parks a paused main loop.
    pub fn resume(&self) -> Result<(), EngineError> {
        self.transition(WorkflowStatus::Paused, WorkflowStatus::Running)
    }

    /// Cancels the running workflow: all waits fail with a cancellation,
    /// step cancel flags are raised, and the instance transitions to Failed.
    pub fn cancel(&self) -> Result<(), EngineError> {
        let instance = self.require_instance()?;
        match instance.status() {
            WorkflowStatus::Running | WorkflowStatus::Paused => {}
            other => {
                return Err(EngineError::InvalidTransition {
                    from: other,
                    to: WorkflowStatus::Failed,
                });
            }
        }

        instance.cancelled.store(true, Ordering::SeqCst);
        for step in &instance.definition.steps {
            instance.executor.cancel_step(&step.id);
        }
        instance.waits.cancel_all_waits("workflow cancelled");
        instance.set_status(WorkflowStatus::Failed);
        let ended_at = Utc::now();
        *instance.ended_at.write() = Some(ended_at);
        instance.scope.emit(
            EventKind::WorkflowFailed,
            None,
            json!({
                "error": "workflow cancelled",
                "errorName": "Cancelled",
                "totalSteps": instance.dag.len(),
                "completedSteps": instance.completed_count(),
                "percentage": instance.progress.percentage(),
                "endTime": ended_at.to_rfc3339(),
            }),
        );
        Ok(())
    }

    /// Cancels one step: its cancel flag, any active wait, pending tool
    /// calls and pending UI interaction.
    pub fn cancel_step(&self, step_id: &str) -> Result<(), EngineError> {
        let instance = self.require_instance()?;
        instance.executor.cancel_step(step_id);
        instance.ui_handler.cancel_pending_interaction(step_id);
        instance.tool_invoker.cancel_pending_calls(step_id, None);
        instance.waits.cancel_wait(step_id, "step cancelled");
        Ok(())
    }

    // -----------------------------------------------------------------
    // Main loop
    // -----------------------------------------------------------------

    async fn run_loop(&self, instance: &Arc<Instance>) {
        let poll = self.config.poll_interval;
        loop {
            match instance.status() {
                WorkflowStatus::Paused => {
                    tokio::time::sleep(poll).await;
                    continue;
                }
                WorkflowStatus::Running => {}
                _ => break,
            }

            let completed = instance.completed.read().clone();
            let failed_ids: FxHashSet<String> = instance
                .failed
                .read()
                .iter()
                .map(|(id, _)| id.clone())
                .collect();
            let ready: Vec<Step> = instance
                .dag
                .ready_steps(&completed)
                .into_iter()
                .filter(|step| !failed_ids.contains(&step.id))
                .cloned()
                .collect();

            if ready.is_empty() {
                if completed.len() == instance.dag.len() {
                    break;
                }
                if !failed_ids.is_empty() {
                    break;
                }
                tokio::time::sleep(poll).await;
                continue;
            }

            let mut handles = Vec::with_capacity(ready.len());
            for step in ready {
                let input = dependency_input(&instance.ctx, instance.dag.deps_of(&step.id));
                let executor = Arc::clone(&instance.executor);
                let ctx = Arc::clone(&instance.ctx);
                let body = Arc::clone(&instance.body);
                let step_id = step.id.clone();
                let handle = tokio::spawn(async move {
                    executor.execute_step(&step, &ctx, body.as_ref(), input).await
                });
                handles.push((step_id, handle));
            }

            for (step_id, handle) in handles {
                match handle.await {
                    Ok(result) => self.dispatch_result(instance, result),
                    Err(join_err) => {
                        tracing::error!(step = %step_id, error = %join_err, "step task panicked");
                        instance.failed.write().push((
                            step_id.clone(),
                            EngineError::step_execution(&step_id, "step task panicked"),
                        ));
                        instance
                            .progress
                            .set_status(&step_id, StepStatus::Failed, Some("panic".into()));
                    }
                }
            }
        }
    }

    fn dispatch_result(&self, instance: &Arc<Instance>, result: StepResult) {
        if result.status.counts_as_completed() {
            instance.completed.write().insert(result.step_id);
        } else {
            let error = result
                .error
                .unwrap_or_else(|| EngineError::step_execution(&result.step_id, "step failed"));
            instance.failed.write().push((result.step_id, error));
        }
    }

    fn finalize(&self, instance: &Arc<Instance>) -> WorkflowResult {
        let context = instance.ctx.snapshot();

        // A cancel already transitioned the instance and emitted the
        // terminal event; do not repeat either.
        if instance.cancelled.load(Ordering::SeqCst) {
            return WorkflowResult {
                status: WorkflowStatus::Failed,
                context,
                error: Some(EngineError::cancelled("workflow cancelled")),
            };
        }

        let ended_at = Utc::now();
        *instance.ended_at.write() = Some(ended_at);
        let total = instance.dag.len();
        let completed = instance.completed_count();

        match instance.first_failure() {
            Some((failed_step_id, error)) => {
                instance.set_status(WorkflowStatus::Failed);
                instance.scope.emit(
                    EventKind::WorkflowFailed,
                    None,
                    json!({
                        "error": error.to_string(),
                        "errorName": error.name(),
                        "failedStepId": failed_step_id,
                        "totalSteps": total,
                        "completedSteps": completed,
                        "percentage": instance.progress.percentage(),
                        "endTime": ended_at.to_rfc3339(),
                    }),
                );
                WorkflowResult {
                    status: WorkflowStatus::Failed,
                    context,
                    error: Some(error),
                }
            }
            None => {
                instance.set_status(WorkflowStatus::Completed);
                instance.scope.emit(
                    EventKind::WorkflowComplete,
                    None,
                    json!({
                        "totalSteps": total,
                        "completedSteps": completed,
                        "percentage": 100,
                        "endTime": ended_at.to_rfc3339(),
                    }),
                );
                WorkflowResult {
                    status: WorkflowStatus::Completed,
                    context,
                    error: None,
                }
            }
        }
    }

    // -----------------------------------------------------------------
    // External responses
    // -----------------------------------------------------------------

    /// Resolves a pending Confirm/Select interaction.
    pub fn respond_to_ui(
        &self,
        step_id: &str,
        result: UiRenderResult,
    ) -> Result<(), EngineError> {
        let instance = self.require_instance()?;
        instance.ui_handler.respond_to_ui(step_id, result)
    }

    /// Resolves a pending async tool call with a result.
    pub fn respond_to_tool(
        &self,
        step_id: &str,
        tool_id: &str,
        result: Value,
    ) -> Result<bool, EngineError> {
        let instance = self.require_instance()?;
        Ok(instance.tool_invoker.respond_to_tool(step_id, tool_id, result))
    }

    /// Resolves a pending async tool call with a failure.
    pub fn respond_to_tool_error(
        &self,
        step_id: &str,
        tool_id: &str,
        error: &str,
    ) -> Result<bool, EngineError> {
        let instance = self.require_instance()?;
        Ok(instance
            .tool_invoker
            .respond_to_tool_error(step_id, tool_id, error))
    }

    /// Resolves an explicit signal wait started by a custom body.
    pub fn signal(&self, step_id: &str, value: Value) -> Result<bool, EngineError> {
        let instance = self.require_instance()?;
        Ok(instance.waits.resume_wait(step_id, value))
    }

    // -----------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------

    pub fn register_tool(&self, registration: ToolRegistration) -> Result<(), EngineError> {
        self.tools.register(registration)
    }

    pub fn unregister_tool(&self, tool_id: &str) -> bool {
        self.tools.unregister(tool_id)
    }

    pub fn register_ui_component(&self, registration: UiRegistration) -> Result<(), EngineError> {
        self.ui_components.register(registration)
    }

    pub fn unregister_ui_component(&self, component_id: &str) -> bool {
        self.ui_components.unregister(component_id)
    }

    pub fn register_step_type(&self, meta: StepTypeMeta) -> Result<(), EngineError> {
        self.step_types.register(meta)
    }

    pub fn add_global_hook(&self, phase: HookPhase, hook: Hook) {
        match phase {
            HookPhase::Before => self.hooks.add_global_before(hook),
            HookPhase::After => self.hooks.add_global_after(hook),
        }
    }

    pub fn remove_global_hook(&self, hook_id: &str) -> bool {
        self.hooks.remove_global_hook(hook_id)
    }

    // -----------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------

    /// Subscribes to the event stream (pull-style consumption).
    pub fn subscribe(&self) -> EventStream {
        self.event_bus.subscribe()
    }

    /// Attaches an event sink (push-style consumption); the returned id
    /// detaches it again via [`Engine::off`].
    pub fn on<S: crate::event_bus::EventSink + 'static>(&self, sink: S) -> SinkId {
        self.event_bus.add_sink(sink)
    }

    /// Detaches a sink attached with [`Engine::on`].
    pub fn off(&self, id: SinkId) -> bool {
        self.event_bus.remove_sink(id)
    }

    // -----------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------

    /// Aggregate status; Idle when nothing is loaded.
    #[must_use]
    pub fn get_status(&self) -> WorkflowStatus {
        self.instance
            .read()
            .as_ref()
            .map_or(WorkflowStatus::Idle, |instance| instance.status())
    }

    /// The live context of the loaded instance.
    ///
    /// Mutation is reserved to hooks and tool executors; other callers
    /// should treat the handle as read-only or use
    /// [`Engine::get_context_snapshot`].
    pub fn get_context(&self) -> Result<Arc<ExecutionContext>, EngineError> {
        Ok(Arc::clone(&self.require_instance()?.ctx))
    }

    pub fn get_context_snapshot(&self) -> Result<ContextSnapshot, EngineError> {
        Ok(self.require_instance()?.ctx.snapshot())
    }

    pub fn get_step_bar_state(&self) -> Result<StepBarState, EngineError> {
        Ok(self.require_instance()?.progress.step_bar_state())
    }

    pub fn get_step_state(&self, step_id: &str) -> Option<StepRuntimeState> {
        self.instance
            .read()
            .as_ref()
            .and_then(|instance| instance.progress.runtime_state(step_id))
    }

    pub fn instance_id(&self) -> Option<String> {
        self.instance
            .read()
            .as_ref()
            .map(|instance| instance.instance_id.clone())
    }

    #[must_use]
    pub fn get_registered_tools(&self) -> Vec<ToolMeta> {
        self.tools.get_all()
    }

    #[must_use]
    pub fn get_registered_ui_components(&self) -> Vec<UiMeta> {
        self.ui_components.get_all()
    }

    #[must_use]
    pub fn get_registered_step_types(&self) -> Vec<StepTypeMeta> {
        self.step_types.get_all()
    }

    /// The same checks as load, without replacing the loaded instance.
    pub fn validate_workflow_definition(&self, definition: &Definition) -> Result<(), EngineError> {
        definition.validate()?;
        Dag::build(definition).map(|_| ())
    }

    /// Canonical JSON for the loaded definition.
    pub fn export_definition(&self) -> Result<Value, EngineError> {
        let instance = self.require_instance()?;
        Ok(serialize::export_definition(&instance.definition))
    }

    /// Parses and re-validates a definition from canonical JSON. Callback
    /// fields are inert until re-bound by the caller.
    pub fn import_definition(&self, json: &Value) -> Result<Definition, EngineError> {
        serialize::import_definition(json)
    }

    // -----------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------

    fn require_instance(&self) -> Result<Arc<Instance>, EngineError> {
        self.instance
            .read()
            .as_ref()
            .map(Arc::clone)
            .ok_or(EngineError::NotLoaded)
    }

    fn transition(&self, from: WorkflowStatus, to: WorkflowStatus) -> Result<(), EngineError> {
        let instance = self.require_instance()?;
        let mut status = instance.status.write();
        if *status != from {
            return Err(EngineError::InvalidTransition { from: *status, to });
        }
        *status = to;
        Ok(())
    }
}

/// Input handed to a step body, derived from its dependencies' outputs:
/// nothing for roots, the single output verbatim for one dependency, and a
/// map keyed by dependency id for joins.
fn dependency_input(ctx: &Arc<ExecutionContext>, deps: &[String]) -> Value {
    match deps {
        [] => Value::Null,
        [only] => ctx.get_step_output(only).unwrap_or(Value::Null),
        many => {
            let mut object = Map::new();
            for dep in many {
                object.insert(
                    dep.clone(),
                    ctx.get_step_output(dep).unwrap_or(Value::Null),
                );
            }
            Value::Object(object)
        }
    }
}
