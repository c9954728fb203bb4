//! Per-step runtime state tracking and progress reporting.
//!
//! The [`ProgressManager`] owns the authoritative map of
//! [`StepRuntimeState`]s for one instance. Every status transition publishes
//! a `step_bar_update` event carrying the full step list plus the most
//! recently activated step; completion transitions (Success or Skipped)
//! additionally publish a `progress_update` with the overall percentage.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::definition::Definition;
use crate::event_bus::{EventKind, EventScope};
use crate::types::{StepStatus, WaitingInfo};

/// Mutable runtime record of one step.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRuntimeState {
    pub id: String,
    pub name: String,
    pub status: StepStatus,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub waiting: Option<WaitingInfo>,
}

impl StepRuntimeState {
    fn new(id: String, name: String) -> Self {
        Self {
            id,
            name,
            status: StepStatus::Pending,
            attempts: 0,
            started_at: None,
            ended_at: None,
            error: None,
            waiting: None,
        }
    }
}

/// One row of the external step bar view.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepBarEntry {
    pub id: String,
    pub name: String,
    pub status: StepStatus,
}

/// External view of the per-step status list.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepBarState {
    pub steps: Vec<StepBarEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_step_id: Option<String>,
}

#[derive(Debug, Default)]
struct ProgressInner {
    states: FxHashMap<String, StepRuntimeState>,
    order: Vec<String>,
    active_step_id: Option<String>,
}

/// Tracks per-step runtime state and emits progress events.
#[derive(Debug)]
pub struct ProgressManager {
    inner: RwLock<ProgressInner>,
    scope: EventScope,
}

impl ProgressManager {
    /// Initializes one Pending record per definition step.
    pub fn new(definition: &Definition, scope: EventScope) -> Self {
        let mut inner = ProgressInner::default();
        for step in &definition.steps {
            inner.order.push(step.id.clone());
            inner.states.insert(
                step.id.clone(),
                StepRuntimeState::new(step.id.clone(), step.name.clone()),
            );
        }
        Self {
            inner: RwLock::new(inner),
            scope,
        }
    }

    /// Applies a status transition and publishes the step bar.
    ///
    /// Running and WaitingInput transitions update the active step; Success
    /// and Skipped transitions additionally publish a progress update.
    pub fn set_status(&self, step_id: &str, status: StepStatus, error: Option<String>) {
        {
            let mut inner = self.inner.write();
            if let Some(state) = inner.states.get_mut(step_id) {
                state.status = status;
                match status {
                    StepStatus::Running => {
                        if state.started_at.is_none() {
                            state.started_at = Some(Utc::now());
                        }
                    }
                    StepStatus::Success | StepStatus::Failed | StepStatus::Skipped => {
                        state.ended_at = Some(Utc::now());
                        state.waiting = None;
                    }
                    _ => {}
                }
                if let Some(message) = error {
                    state.error = Some(message);
                }
            }
            if matches!(status, StepStatus::Running | StepStatus::WaitingInput) {
                inner.active_step_id = Some(step_id.to_string());
            }
        }
        self.emit_step_bar();
        if status.counts_as_completed() {
            self.emit_progress();
        }
    }

    /// Records a body attempt against the step.
    pub fn record_attempt(&self, step_id: &str) {
        let mut inner = self.inner.write();
        if let Some(state) = inner.states.get_mut(step_id) {
            state.attempts += 1;
        }
    }

    /// Marks the step as suspended on `info` and publishes the step bar.
    pub fn set_waiting(&self, step_id: &str, info: WaitingInfo) {
        {
            let mut inner = self.inner.write();
            if let Some(state) = inner.states.get_mut(step_id) {
                state.status = StepStatus::WaitingInput;
                state.waiting = Some(info);
            }
            inner.active_step_id = Some(step_id.to_string());
        }
        self.emit_step_bar();
    }

    /// Clears the waiting marker, returning the step to Running.
    pub fn clear_waiting(&self, step_id: &str) {
        {
            let mut inner = self.inner.write();
            if let Some(state) = inner.states.get_mut(step_id) {
                if state.status == StepStatus::WaitingInput {
                    state.status = StepStatus::Running;
                }
                state.waiting = None;
            }
        }
        self.emit_step_bar();
    }

    #[must_use]
    pub fn runtime_state(&self, step_id: &str) -> Option<StepRuntimeState> {
        self.inner.read().states.get(step_id).cloned()
    }

    #[must_use]
    pub fn waiting_info(&self, step_id: &str) -> Option<WaitingInfo> {
        self.inner
            .read()
            .states
            .get(step_id)
            .and_then(|s| s.waiting.clone())
    }

    /// Snapshot of the step bar in definition order.
    #[must_use]
    pub fn step_bar_state(&self) -> StepBarState {
        let inner = self.inner.read();
        let steps = inner
            .order
            .iter()
            .filter_map(|id| inner.states.get(id))
            .map(|state| StepBarEntry {
                id: state.id.clone(),
                name: state.name.clone(),
                status: state.status,
            })
            .collect();
        StepBarState {
            steps,
            active_step_id: inner.active_step_id.clone(),
        }
    }

    #[must_use]
    pub fn total_steps(&self) -> usize {
        self.inner.read().order.len()
    }

    #[must_use]
    pub fn completed_steps(&self) -> usize {
        self.inner
            .read()
            .states
            .values()
            .filter(|s| s.status.counts_as_completed())
            .count()
    }

    /// Completion ratio as a whole percentage.
    #[must_use]
    pub fn percentage(&self) -> u32 {
        let total = self.total_steps();
        if total == 0 {
            return 100;
        }
        ((self.completed_steps() as f64 / total as f64) * 100.0).round() as u32
    }

    fn emit_step_bar(&self) {
        let bar = self.step_bar_state();
        let active = bar.active_step_id.clone();
        self.scope.emit(
            EventKind::StepBarUpdate,
            active.as_deref(),
            json!({
                "steps": bar.steps,
                "activeStepId": bar.active_step_id,
            }),
        );
    }

    fn emit_progress(&self) {
        let completed = self.completed_steps();
        let total = self.total_steps();
        self.scope.emit(
            EventKind::ProgressUpdate,
            None,
            json!({
                "currentStep": completed,
                "totalSteps": total,
                "completedSteps": completed,
                "percentage": self.percentage(),
            }),
        );
    }
}
