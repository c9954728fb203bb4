//! Runtime execution: the orchestrator and the managers it coordinates.
//!
//! - [`Engine`]: load/validate/start/pause/resume/cancel and the main loop
//! - [`StepExecutor`]: the per-step skip/hook/retry pipeline
//! - [`WaitManager`]: step-scoped async waits with timeout strategies
//! - [`ToolInvoker`]: sync/async tool dispatch and response matching
//! - [`UiInteractionHandler`]: display/confirm/select interactions
//! - [`ProgressManager`]: per-step runtime state and progress events

mod cancel;
mod engine;
mod executor;
mod progress;
mod skip;
mod tool;
mod ui;
mod wait;

pub use cancel::CancelToken;
pub use engine::{Engine, WorkflowResult};
pub use executor::{PassThroughBody, StepBody, StepExecutor, StepResult};
pub use progress::{ProgressManager, StepBarEntry, StepBarState, StepRuntimeState};
pub use skip::should_skip;
pub use tool::{ToolCallResult, ToolInvoker};
pub use ui::UiInteractionHandler;
pub use wait::{TimeoutStrategy, WaitFuture, WaitManager};
