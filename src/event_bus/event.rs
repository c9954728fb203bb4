//! Structured workflow events.
//!
//! Every observable transition in the engine publishes a [`WorkflowEvent`]:
//! a typed kind, a wall-clock timestamp, the workflow and instance ids, an
//! optional step id, and an opaque JSON payload whose shape is fixed per
//! kind (see the payload table in the crate documentation).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// The full event taxonomy, grouped by category.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    WorkflowStart,
    WorkflowComplete,
    WorkflowFailed,
    StepStart,
    StepComplete,
    StepFailed,
    StepRetry,
    StepSkip,
    ProgressUpdate,
    StepBarUpdate,
    ToolInvoke,
    ToolComplete,
    ToolFailed,
    UiRender,
    UiResponse,
    WaitStart,
    WaitResume,
    WaitTimeout,
    WaitCancel,
}

impl EventKind {
    /// Coarse category label used by formatters and filters.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::WorkflowStart | Self::WorkflowComplete | Self::WorkflowFailed => "workflow",
            Self::StepStart
            | Self::StepComplete
            | Self::StepFailed
            | Self::StepRetry
            | Self::StepSkip => "step",
            Self::ProgressUpdate | Self::StepBarUpdate => "progress",
            Self::ToolInvoke | Self::ToolComplete | Self::ToolFailed => "tool",
            Self::UiRender | Self::UiResponse => "ui",
            Self::WaitStart | Self::WaitResume | Self::WaitTimeout | Self::WaitCancel => "wait",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::WorkflowStart => "workflow_start",
            Self::WorkflowComplete => "workflow_complete",
            Self::WorkflowFailed => "workflow_failed",
            Self::StepStart => "step_start",
            Self::StepComplete => "step_complete",
            Self::StepFailed => "step_failed",
            Self::StepRetry => "step_retry",
            Self::StepSkip => "step_skip",
            Self::ProgressUpdate => "progress_update",
            Self::StepBarUpdate => "step_bar_update",
            Self::ToolInvoke => "tool_invoke",
            Self::ToolComplete => "tool_complete",
            Self::ToolFailed => "tool_failed",
            Self::UiRender => "ui_render",
            Self::UiResponse => "ui_response",
            Self::WaitStart => "wait_start",
            Self::WaitResume => "wait_resume",
            Self::WaitTimeout => "wait_timeout",
            Self::WaitCancel => "wait_cancel",
        };
        write!(f, "{label}")
    }
}

/// One published event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowEvent {
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub workflow_id: String,
    pub instance_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    pub payload: Value,
}

impl WorkflowEvent {
    pub fn new(
        kind: EventKind,
        workflow_id: impl Into<String>,
        instance_id: impl Into<String>,
        step_id: Option<String>,
        payload: Value,
    ) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            workflow_id: workflow_id.into(),
            instance_id: instance_id.into(),
            step_id,
            payload,
        }
    }

    /// Normalized JSON projection used by the JSONL sink.
    ///
    /// ```json
    /// {
    ///   "kind": "step_complete",
    ///   "category": "step",
    ///   "timestamp": "2026-08-01T12:34:56.789Z",
    ///   "workflowId": "etl",
    ///   "instanceId": "6f1c…",
    ///   "stepId": "load",
    ///   "payload": { "output": 42, "retryCount": 0 }
    /// }
    /// ```
    #[must_use]
    pub fn to_json_value(&self) -> Value {
        let mut object = serde_json::Map::new();
        object.insert("kind".into(), Value::String(self.kind.to_string()));
        object.insert(
            "category".into(),
            Value::String(self.kind.category().to_string()),
        );
        object.insert(
            "timestamp".into(),
            Value::String(self.timestamp.to_rfc3339()),
        );
        object.insert("workflowId".into(), Value::String(self.workflow_id.clone()));
        object.insert("instanceId".into(), Value::String(self.instance_id.clone()));
        if let Some(step_id) = &self.step_id {
            object.insert("stepId".into(), Value::String(step_id.clone()));
        }
        object.insert("payload".into(), self.payload.clone());
        Value::Object(object)
    }

    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.to_json_value())
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.to_json_value())
    }
}

impl fmt::Display for WorkflowEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.step_id {
            Some(step) => write!(
                f,
                "[{}] {} step={} {}",
                self.kind.category(),
                self.kind,
                step,
                self.payload
            ),
            None => write!(
                f,
                "[{}] {} {}",
                self.kind.category(),
                self.kind,
                self.payload
            ),
        }
    }
}
