//! Core types for the taskloom workflow engine.
//!
//! This module defines the fundamental vocabulary used throughout the system:
//! the status of a step and of a whole workflow instance, the kinds of
//! asynchronous waits a step can be suspended on, the interaction modes a UI
//! step can run in, and the dispatch modes a tool can declare.
//!
//! These are the core domain concepts; runtime execution types (per-step
//! runtime state, wait bookkeeping) live in [`crate::runtime`].
//!
//! # Examples
//!
//! ```rust
//! use taskloom::types::{StepStatus, WorkflowStatus};
//!
//! let status = StepStatus::Skipped;
//! assert!(status.is_terminal());
//! assert!(status.counts_as_completed());
//!
//! assert_eq!(WorkflowStatus::Running.to_string(), "running");
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Lifecycle status of a single step within a workflow instance.
///
/// Steps begin `Pending`, move to `Running` when the executor picks them up,
/// may pass through `WaitingInput` while suspended on an external signal, and
/// end in exactly one of the terminal states.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Not yet scheduled; dependencies may still be outstanding.
    Pending,
    /// Currently executing (hooks, body or retry sleep).
    Running,
    /// Suspended on an external signal, tool response or UI response.
    WaitingInput,
    /// Finished successfully; output committed to the context.
    Success,
    /// Finished unsuccessfully after exhausting retries (or cancelled).
    Failed,
    /// Bypassed by a skip policy; the default output was committed instead.
    Skipped,
}

impl StepStatus {
    /// Returns `true` once the step can never run again in this instance.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Skipped)
    }

    /// Returns `true` if the step satisfies downstream dependencies.
    ///
    /// Failed steps are terminal but never satisfy dependents; they block
    /// their downstream subtree instead.
    #[must_use]
    pub fn counts_as_completed(&self) -> bool {
        matches!(self, Self::Success | Self::Skipped)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::WaitingInput => "waiting_input",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        write!(f, "{label}")
    }
}

/// Aggregate status of a workflow instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Loaded and validated, not yet started.
    Idle,
    /// Main loop is actively scheduling ready steps.
    Running,
    /// Main loop is parked; in-flight steps run to completion.
    Paused,
    /// All steps reached Success or Skipped.
    Completed,
    /// At least one step failed, or the workflow was cancelled.
    Failed,
}

impl WorkflowStatus {
    /// Returns `true` once the instance can no longer make progress.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{label}")
    }
}

/// What an asynchronous wait is suspended on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitKind {
    /// Waiting for a UI interaction response.
    Ui,
    /// Waiting for an asynchronous tool response.
    Tool,
    /// Waiting for an arbitrary external signal.
    Signal,
}

impl fmt::Display for WaitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Ui => "ui",
            Self::Tool => "tool",
            Self::Signal => "signal",
        };
        write!(f, "{label}")
    }
}

/// Interaction mode of a UI step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UiMode {
    /// Render, wait a fixed interval, auto-advance.
    Display,
    /// Render, then block until an external confirmation arrives.
    Confirm,
    /// Render a non-empty option list, then block until a selection arrives.
    Select,
}

impl fmt::Display for UiMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Display => "display",
            Self::Confirm => "confirm",
            Self::Select => "select",
        };
        write!(f, "{label}")
    }
}

/// Dispatch mode declared by a tool registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolMode {
    /// The engine calls the executor directly and awaits its result.
    Sync,
    /// The engine suspends the call; an external caller resolves it via
    /// the tool response entry points.
    Async,
}

impl fmt::Display for ToolMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Sync => "sync",
            Self::Async => "async",
        };
        write!(f, "{label}")
    }
}

/// Which side of the step body a hook runs on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookPhase {
    Before,
    After,
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Before => write!(f, "before"),
            Self::After => write!(f, "after"),
        }
    }
}

/// Description of what a suspended step is currently waiting on.
///
/// Attached to the step's runtime state while a wait is active and cleared
/// when the wait resolves.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitingInfo {
    /// The kind of external event being waited on.
    pub kind: WaitKind,
    /// Identifier of the awaited target (tool id, component id, signal name).
    pub target_id: String,
    /// When the wait was started.
    pub started_at: DateTime<Utc>,
    /// Timeout in milliseconds, if one was armed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Opaque data supplied at wait start, surfaced for inspection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(StepStatus::Success.is_terminal());
        assert!(StepStatus::Failed.is_terminal());
        assert!(StepStatus::Skipped.is_terminal());
        assert!(!StepStatus::Running.is_terminal());
        assert!(!StepStatus::WaitingInput.is_terminal());
    }

    #[test]
    fn failed_does_not_count_as_completed() {
        assert!(StepStatus::Success.counts_as_completed());
        assert!(StepStatus::Skipped.counts_as_completed());
        assert!(!StepStatus::Failed.counts_as_completed());
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&StepStatus::WaitingInput).unwrap();
        assert_eq!(json, "\"waiting_input\"");
    }
}
