//! Error taxonomy for the taskloom workflow engine.
//!
//! A single [`EngineError`] enum covers definition validation, graph
//! construction, step execution, registry lookups, schema validation,
//! timeouts, hook failures and cancellation. Variants carry owned string
//! context so results can be cloned into events and retained across retry
//! attempts as `last_error`.
//!
//! Validation and [`EngineError::CyclicDependency`] fail load/import and
//! never surface at runtime; everything else flows through step results and
//! the event stream.

use miette::Diagnostic;
use thiserror::Error;

use crate::types::{HookPhase, WorkflowStatus};

/// Errors produced while loading, validating or executing a workflow.
#[derive(Clone, Debug, Error, Diagnostic)]
pub enum EngineError {
    /// The definition failed structural validation.
    #[error("definition validation failed: {}", .issues.join("; "))]
    #[diagnostic(
        code(taskloom::validation),
        help("Check that ids and names are non-empty and step ids are unique.")
    )]
    Validation {
        /// One entry per structural problem found.
        issues: Vec<String>,
    },

    /// The dependency graph contains a cycle.
    #[error("cyclic dependency detected: {}", .cycle.join(" -> "))]
    #[diagnostic(
        code(taskloom::cyclic_dependency),
        help("Remove one of the dependencies along the reported path.")
    )]
    CyclicDependency {
        /// One representative cycle path; first and last entries coincide.
        cycle: Vec<String>,
    },

    /// A step body raised an error.
    #[error("step '{step_id}' failed: {message}")]
    #[diagnostic(code(taskloom::step_execution))]
    StepExecution { step_id: String, message: String },

    /// Registry lookup for a tool id came up empty.
    #[error("tool not found: {tool_id}")]
    #[diagnostic(
        code(taskloom::tool_not_found),
        help("Register the tool before starting the workflow.")
    )]
    ToolNotFound { tool_id: String },

    /// Registry lookup for a UI component id came up empty.
    #[error("UI component not found: {component_id}")]
    #[diagnostic(
        code(taskloom::ui_component_not_found),
        help("Register the UI component before starting the workflow.")
    )]
    UiComponentNotFound { component_id: String },

    /// An id was registered twice; registries reject rather than overwrite.
    #[error("duplicate registration: {id}")]
    #[diagnostic(
        code(taskloom::duplicate_registration),
        help("Unregister the existing entry first if replacement is intended.")
    )]
    DuplicateRegistration { id: String },

    /// Tool parameters did not match the declared input schema.
    #[error("schema validation failed: {}", .failures.join("; "))]
    #[diagnostic(code(taskloom::schema_validation))]
    SchemaValidation {
        /// Path-qualified failure descriptions (dotted/indexed paths).
        failures: Vec<String>,
    },

    /// A wait, tool call or UI interaction exceeded its deadline.
    #[error("timed out after {timeout_ms} ms{}", .step_id.as_deref().map(|s| format!(" (step '{s}')")).unwrap_or_default())]
    #[diagnostic(code(taskloom::timeout))]
    Timeout {
        step_id: Option<String>,
        timeout_ms: u64,
    },

    /// A lifecycle hook raised.
    #[error("{phase} hook '{hook_id}' failed for step '{step_id}': {message}")]
    #[diagnostic(code(taskloom::hook_execution))]
    HookExecution {
        hook_id: String,
        phase: HookPhase,
        step_id: String,
        message: String,
    },

    /// A tool executor raised (anything other than a timeout).
    #[error("tool '{tool_id}' failed{}: {message}", .step_id.as_deref().map(|s| format!(" for step '{s}'")).unwrap_or_default())]
    #[diagnostic(code(taskloom::tool_execution))]
    ToolExecution {
        tool_id: String,
        step_id: Option<String>,
        message: String,
    },

    /// A UI response named an option the config never declared.
    #[error("invalid option '{selected}' for step '{step_id}'")]
    #[diagnostic(
        code(taskloom::invalid_option),
        help("Respond with one of the option ids declared in the step's UI config.")
    )]
    InvalidOption { step_id: String, selected: String },

    /// The requested UI mode is not supported by the component.
    #[error("component '{component_id}' does not support mode '{mode}'")]
    #[diagnostic(code(taskloom::unsupported_mode))]
    UnsupportedMode { component_id: String, mode: String },

    /// A wait, step or workflow was cancelled.
    #[error("cancelled: {reason}")]
    #[diagnostic(code(taskloom::cancelled))]
    Cancelled { reason: String },

    /// A second wait was requested while one is still active for the step.
    #[error("step '{step_id}' already has an active wait")]
    #[diagnostic(
        code(taskloom::wait_conflict),
        help("Resolve or cancel the existing wait before starting another.")
    )]
    WaitConflict { step_id: String },

    /// A response arrived for a step with no pending interaction or call.
    #[error("no pending interaction for step '{step_id}'")]
    #[diagnostic(code(taskloom::no_pending_interaction))]
    NoPendingInteraction { step_id: String },

    /// An operation requires a loaded workflow.
    #[error("no workflow loaded")]
    #[diagnostic(
        code(taskloom::not_loaded),
        help("Call load_workflow before start, pause, resume or cancel.")
    )]
    NotLoaded,

    /// `start` was called while the instance is already executing.
    #[error("workflow is already running")]
    #[diagnostic(code(taskloom::already_running))]
    AlreadyRunning,

    /// Pause/resume called from an incompatible status.
    #[error("invalid status transition: {from} -> {to}")]
    #[diagnostic(code(taskloom::invalid_transition))]
    InvalidTransition {
        from: WorkflowStatus,
        to: WorkflowStatus,
    },

    /// Definition JSON could not be parsed on import.
    #[error("definition import failed: {message}")]
    #[diagnostic(code(taskloom::import))]
    Import { message: String },
}

impl EngineError {
    /// Shorthand for a single-issue validation error.
    pub fn validation(issue: impl Into<String>) -> Self {
        Self::Validation {
            issues: vec![issue.into()],
        }
    }

    /// Wrap an arbitrary error raised inside a step body.
    pub fn step_execution(step_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StepExecution {
            step_id: step_id.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a cancellation error.
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled {
            reason: reason.into(),
        }
    }

    /// Returns `true` for cancellation errors.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Returns `true` for timeout errors.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Stable short name of the variant, used in event payloads.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "Validation",
            Self::CyclicDependency { .. } => "CyclicDependency",
            Self::StepExecution { .. } => "StepExecution",
            Self::ToolNotFound { .. } => "ToolNotFound",
            Self::UiComponentNotFound { .. } => "UIComponentNotFound",
            Self::DuplicateRegistration { .. } => "DuplicateRegistration",
            Self::SchemaValidation { .. } => "SchemaValidation",
            Self::Timeout { .. } => "Timeout",
            Self::HookExecution { .. } => "HookExecution",
            Self::ToolExecution { .. } => "ToolExecution",
            Self::InvalidOption { .. } => "InvalidOption",
            Self::UnsupportedMode { .. } => "UnsupportedMode",
            Self::Cancelled { .. } => "Cancelled",
            Self::WaitConflict { .. } => "WaitConflict",
            Self::NoPendingInteraction { .. } => "NoPendingInteraction",
            Self::NotLoaded => "NotLoaded",
            Self::AlreadyRunning => "AlreadyRunning",
            Self::InvalidTransition { .. } => "InvalidTransition",
            Self::Import { .. } => "Import",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_message_joins_path() {
        let err = EngineError::CyclicDependency {
            cycle: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "cyclic dependency detected: a -> b -> a");
    }

    #[test]
    fn timeout_message_mentions_step() {
        let err = EngineError::Timeout {
            step_id: Some("s1".into()),
            timeout_ms: 250,
        };
        assert_eq!(err.to_string(), "timed out after 250 ms (step 's1')");
        assert!(err.is_timeout());
    }

    #[test]
    fn names_are_stable() {
        assert_eq!(EngineError::NotLoaded.name(), "NotLoaded");
        assert_eq!(
            EngineError::cancelled("workflow cancelled").name(),
            "Cancelled"
        );
    }
}
