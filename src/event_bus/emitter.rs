use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use super::event::{EventKind, WorkflowEvent};

/// Trait representing an abstract event emitter that engine components clone.
pub trait EventEmitter: Send + Sync + fmt::Debug {
    /// Emit an event in a synchronous, non-blocking manner.
    fn emit(&self, event: WorkflowEvent) -> Result<(), EmitterError>;
}

/// Errors that can occur when emitting an event.
#[derive(Debug, Error)]
pub enum EmitterError {
    #[error("event hub closed")]
    Closed,
    #[error("event lag exceeded buffer; dropped {0} messages")]
    Lagged(usize),
    #[error("event emission failed: {0}")]
    Other(String),
}

impl EmitterError {
    pub fn other(error: impl Into<String>) -> Self {
        Self::Other(error.into())
    }
}

/// An emitter bound to one workflow instance.
///
/// Components hold an `EventScope` and publish with just a kind, step id and
/// payload; the workflow/instance identifiers are stamped on automatically.
/// Emission failures (hub closed during teardown) are logged at debug level
/// and never propagate into execution paths.
#[derive(Clone, Debug)]
pub struct EventScope {
    pub workflow_id: String,
    pub instance_id: String,
    emitter: Arc<dyn EventEmitter>,
}

impl EventScope {
    pub fn new(
        workflow_id: impl Into<String>,
        instance_id: impl Into<String>,
        emitter: Arc<dyn EventEmitter>,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            instance_id: instance_id.into(),
            emitter,
        }
    }

    /// Publish an event within this scope.
    pub fn emit(&self, kind: EventKind, step_id: Option<&str>, payload: Value) {
        let event = WorkflowEvent::new(
            kind,
            self.workflow_id.clone(),
            self.instance_id.clone(),
            step_id.map(str::to_string),
            payload,
        );
        if let Err(err) = self.emitter.emit(event) {
            tracing::debug!(
                kind = %kind,
                workflow = %self.workflow_id,
                error = %err,
                "event dropped; hub unavailable"
            );
        }
    }
}
