//! Human-in-the-loop interaction handling.
//!
//! Display steps render, wait a fixed interval (3000 ms unless configured),
//! and auto-advance with the renderer's response. Confirm and Select steps
//! render for side effect and then suspend on the wait manager until an
//! external caller responds via [`UiInteractionHandler::respond_to_ui`], the
//! optional timer fires, or the interaction is cancelled. Select responses
//! must name one of the declared option ids.
//!
//! Interactions for different steps may be pending simultaneously (parallel
//! branches each suspend independently).

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::{json, Value};

use super::wait::WaitManager;
use crate::context::ExecutionContext;
use crate::definition::UiConfig;
use crate::error::EngineError;
use crate::event_bus::{EventKind, EventScope};
use crate::registry::{UiRegistry, UiRenderResult};
use crate::types::{UiMode, WaitKind};

const DEFAULT_DISPLAY_TIMEOUT_MS: u64 = 3000;

#[derive(Clone, Debug)]
struct PendingInteraction {
    component_id: String,
    mode: UiMode,
    option_ids: Vec<String>,
}

/// Dispatches UI interactions for one workflow instance.
#[derive(Clone)]
pub struct UiInteractionHandler {
    registry: Arc<UiRegistry>,
    waits: WaitManager,
    scope: EventScope,
    pending: Arc<Mutex<FxHashMap<String, PendingInteraction>>>,
}

impl UiInteractionHandler {
    pub fn new(registry: Arc<UiRegistry>, waits: WaitManager, scope: EventScope) -> Self {
        Self {
            registry,
            waits,
            scope,
            pending: Arc::new(Mutex::new(FxHashMap::default())),
        }
    }

    /// Runs one UI interaction to completion, returning the step output.
    pub async fn handle_ui(
        &self,
        step_id: &str,
        config: &UiConfig,
        ctx: &Arc<ExecutionContext>,
    ) -> Result<Value, EngineError> {
        let registration = self.registry.get(&config.component_id)?;
        if !registration.meta.supported_modes.contains(&config.mode) {
            return Err(EngineError::UnsupportedMode {
                component_id: config.component_id.clone(),
                mode: config.mode.to_string(),
            });
        }
        if config.mode == UiMode::Select && config.options.is_empty() {
            return Err(EngineError::validation(format!(
                "select step '{step_id}' declares no options"
            )));
        }

        self.scope.emit(
            EventKind::UiRender,
            Some(step_id),
            json!({
                "componentId": config.component_id,
                "mode": config.mode,
                "data": config.data,
                "timeout": config.timeout_ms,
                "options": config.options,
            }),
        );

        // Renderers are best-effort in every mode; a broken renderer must
        // not take the step down with it.
        let rendered = match registration
            .renderer
            .render(config, Arc::clone(ctx))
            .await
        {
            Ok(result) => Some(result),
            Err(err) => {
                tracing::warn!(
                    component = %config.component_id,
                    step = %step_id,
                    error = %err,
                    "UI renderer failed; continuing without render result"
                );
                None
            }
        };

        match config.mode {
            UiMode::Display => self.handle_display(step_id, config, rendered).await,
            UiMode::Confirm | UiMode::Select => {
                self.handle_interactive(step_id, config).await
            }
        }
    }

    async fn handle_display(
        &self,
        step_id: &str,
        config: &UiConfig,
        rendered: Option<UiRenderResult>,
    ) -> Result<Value, EngineError> {
        let timeout = Duration::from_millis(config.timeout_ms.unwrap_or(DEFAULT_DISPLAY_TIMEOUT_MS));
        tokio::time::sleep(timeout).await;

        let response = rendered.and_then(|r| r.user_response);
        self.scope.emit(
            EventKind::UiResponse,
            Some(step_id),
            json!({
                "response": &response,
                "autoCompleted": true,
            }),
        );
        Ok(json!({
            "response": response,
            "autoCompleted": true,
        }))
    }

    async fn handle_interactive(
        &self,
        step_id: &str,
        config: &UiConfig,
    ) -> Result<Value, EngineError> {
        let timeout = config
            .timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis);
        let future = self.waits.start_wait(
            step_id,
            WaitKind::Ui,
            &config.component_id,
            timeout,
            Some(config.data.clone()),
        )?;

        self.pending.lock().insert(
            step_id.to_string(),
            PendingInteraction {
                component_id: config.component_id.clone(),
                mode: config.mode,
                option_ids: config.options.iter().map(|o| o.id.clone()).collect(),
            },
        );

        let outcome = future.await;
        self.pending.lock().remove(step_id);

        match outcome {
            Ok(value) => Ok(value),
            Err(err) if err.is_timeout() => {
                self.scope.emit(
                    EventKind::UiResponse,
                    Some(step_id),
                    json!({ "timeout": true }),
                );
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// External resolution for a pending Confirm/Select interaction.
    ///
    /// Select responses are validated against the declared option ids; an
    /// unknown option fails the waiting step with
    /// [`EngineError::InvalidOption`] and returns the same error to the
    /// responder.
    pub fn respond_to_ui(
        &self,
        step_id: &str,
        result: UiRenderResult,
    ) -> Result<(), EngineError> {
        let interaction = {
            let pending = self.pending.lock();
            pending.get(step_id).cloned()
        }
        .ok_or_else(|| EngineError::NoPendingInteraction {
            step_id: step_id.to_string(),
        })?;

        if interaction.mode == UiMode::Select {
            let valid = result
                .selected_option
                .as_deref()
                .is_some_and(|selected| interaction.option_ids.iter().any(|id| id == selected));
            if !valid {
                let selected = result.selected_option.unwrap_or_default();
                let err = EngineError::InvalidOption {
                    step_id: step_id.to_string(),
                    selected,
                };
                self.scope.emit(
                    EventKind::UiResponse,
                    Some(step_id),
                    json!({
                        "response": result.user_response,
                        "selectedOption": Value::Null,
                        "error": err.to_string(),
                    }),
                );
                self.waits.fail_wait(step_id, err.clone());
                return Err(err);
            }
        }

        let response = result.user_response.clone();
        let selected_option = result.selected_option.clone();
        self.scope.emit(
            EventKind::UiResponse,
            Some(step_id),
            json!({
                "response": &response,
                "selectedOption": &selected_option,
            }),
        );
        let value = json!({
            "componentId": interaction.component_id,
            "response": response,
            "selectedOption": selected_option,
        });
        if self.waits.resume_wait(step_id, value) {
            Ok(())
        } else {
            Err(EngineError::NoPendingInteraction {
                step_id: step_id.to_string(),
            })
        }
    }

    /// Rejects a pending interaction with "UI interaction cancelled".
    pub fn cancel_pending_interaction(&self, step_id: &str) -> bool {
        if self.pending.lock().remove(step_id).is_none() {
            return false;
        }
        self.scope.emit(
            EventKind::UiResponse,
            Some(step_id),
            json!({ "cancelled": true }),
        );
        self.waits.cancel_wait(step_id, "UI interaction cancelled")
    }

    /// Step ids with a pending interaction, sorted.
    #[must_use]
    pub fn pending_interactions(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.pending.lock().keys().cloned().collect();
        ids.sort();
        ids
    }
}
