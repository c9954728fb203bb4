//! Declarative workflow definitions.
//!
//! A [`Definition`] is the immutable description the engine loads: an ordered
//! list of [`Step`]s, each carrying its dependencies and optional retry, skip,
//! hook, UI and tool declarations. Definitions are plain data; the engine
//! parses them into a [`crate::dag::Dag`] at load time and never mutates them
//! afterwards.
//!
//! # Building definitions
//!
//! ```rust
//! use taskloom::definition::{Definition, RetryPolicy, Step};
//!
//! let def = Definition::new("etl", "Nightly ETL")
//!     .with_description("extract, transform, load")
//!     .with_step(Step::new("extract", "Extract", "task"))
//!     .with_step(
//!         Step::new("load", "Load", "task")
//!             .with_dependency("extract")
//!             .with_retry(RetryPolicy::fixed(3, 500)),
//!     );
//!
//! assert!(def.validate().is_ok());
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::context::ExecutionContext;
use crate::error::EngineError;
use crate::hooks::HookSet;
use crate::types::UiMode;

/// Bounded repetition of a step body on failure.
///
/// `max_retries` counts retries *after* the first attempt, so the body runs
/// at most `1 + max_retries` times. With exponential backoff enabled the
/// sleep before attempt `k` (k >= 2) is
/// `retry_interval_ms * backoff_multiplier^(k-2)` milliseconds; otherwise it
/// is a flat `retry_interval_ms`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_interval_ms: u64,
    #[serde(default)]
    pub exponential_backoff: bool,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl RetryPolicy {
    /// Flat-interval policy.
    #[must_use]
    pub fn fixed(max_retries: u32, retry_interval_ms: u64) -> Self {
        Self {
            max_retries,
            retry_interval_ms,
            exponential_backoff: false,
            backoff_multiplier: default_backoff_multiplier(),
        }
    }

    /// Exponential backoff policy with the default multiplier of 2.
    #[must_use]
    pub fn exponential(max_retries: u32, retry_interval_ms: u64) -> Self {
        Self {
            max_retries,
            retry_interval_ms,
            exponential_backoff: true,
            backoff_multiplier: default_backoff_multiplier(),
        }
    }

    #[must_use]
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Sleep duration before attempt `attempt` (1-based; attempt >= 2).
    #[must_use]
    pub fn delay_before_attempt(&self, attempt: u32) -> Duration {
        let base = self.retry_interval_ms as f64;
        let millis = if self.exponential_backoff && attempt >= 2 {
            base * self.backoff_multiplier.powi(attempt as i32 - 2)
        } else {
            base
        };
        Duration::from_millis(millis.round() as u64)
    }
}

/// Async predicate deciding whether a step should be skipped.
///
/// Callback-style skip conditions receive the live execution context; they
/// are the programmatic alternative to expression strings.
#[async_trait]
pub trait SkipPredicate: Send + Sync {
    async fn should_skip(&self, ctx: &ExecutionContext) -> bool;

    /// Lossy source-text representation used by definition export.
    fn describe(&self) -> String {
        "<callback>".to_string()
    }
}

struct FnSkipPredicate<F> {
    f: F,
}

#[async_trait]
impl<F> SkipPredicate for FnSkipPredicate<F>
where
    F: Fn(&ExecutionContext) -> bool + Send + Sync,
{
    async fn should_skip(&self, ctx: &ExecutionContext) -> bool {
        (self.f)(ctx)
    }
}

/// The predicate form of a [`SkipPolicy`].
#[derive(Clone)]
pub enum SkipCondition {
    /// A sandboxed expression evaluated against a read-only context
    /// projection; see [`crate::expr`] for the grammar.
    Expression(String),
    /// A programmatic callback over the live context.
    Callback(Arc<dyn SkipPredicate>),
}

impl SkipCondition {
    /// Wraps a plain closure as a callback condition.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&ExecutionContext) -> bool + Send + Sync + 'static,
    {
        Self::Callback(Arc::new(FnSkipPredicate { f }))
    }
}

impl fmt::Debug for SkipCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Expression(src) => f.debug_tuple("Expression").field(src).finish(),
            Self::Callback(cb) => f.debug_tuple("Callback").field(&cb.describe()).finish(),
        }
    }
}

/// Predicate plus the output substituted when a step is skipped.
#[derive(Clone, Debug)]
pub struct SkipPolicy {
    pub condition: SkipCondition,
    /// Committed as the step output when skipped; `Value::Null` if absent.
    pub default_output: Option<Value>,
}

impl SkipPolicy {
    #[must_use]
    pub fn expression(src: impl Into<String>) -> Self {
        Self {
            condition: SkipCondition::Expression(src.into()),
            default_output: None,
        }
    }

    pub fn callback<F>(f: F) -> Self
    where
        F: Fn(&ExecutionContext) -> bool + Send + Sync + 'static,
    {
        Self {
            condition: SkipCondition::from_fn(f),
            default_output: None,
        }
    }

    #[must_use]
    pub fn with_default_output(mut self, output: Value) -> Self {
        self.default_output = Some(output);
        self
    }
}

/// One selectable option of a Select-mode UI step.
///
/// `next_step_id` is declarative only: it is serialized and preserved but
/// never interpreted by the engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiOption {
    pub id: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_step_id: Option<String>,
}

impl UiOption {
    #[must_use]
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            value: None,
            next_step_id: None,
        }
    }

    #[must_use]
    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }
}

/// Declarative UI interaction attached to a step.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiConfig {
    pub component_id: String,
    pub mode: UiMode,
    /// Opaque render data handed to the component's renderer.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
    /// Timeout in milliseconds; semantics depend on the mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Select-mode options; must be non-empty for [`UiMode::Select`].
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<UiOption>,
}

impl UiConfig {
    #[must_use]
    pub fn new(component_id: impl Into<String>, mode: UiMode) -> Self {
        Self {
            component_id: component_id.into(),
            mode,
            data: Value::Null,
            timeout_ms: None,
            options: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    #[must_use]
    pub fn with_option(mut self, option: UiOption) -> Self {
        self.options.push(option);
        self
    }
}

/// A declarative tool call attached to a step.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocation {
    pub tool_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// When set, the invocation result is also written to this globals key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_key: Option<String>,
}

impl ToolInvocation {
    #[must_use]
    pub fn new(tool_id: impl Into<String>) -> Self {
        Self {
            tool_id: tool_id.into(),
            params: None,
            output_key: None,
        }
    }

    #[must_use]
    pub fn with_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }

    #[must_use]
    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = Some(key.into());
        self
    }
}

/// A single unit of work inside a definition.
#[derive(Clone, Debug)]
pub struct Step {
    /// Unique identifier within the definition.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Type tag (`task`, `ui`, `tool`, or a custom registered type).
    pub step_type: String,
    /// Ids of steps that must complete before this one becomes ready.
    pub dependencies: Vec<String>,
    /// Opaque per-type configuration.
    pub config: Value,
    pub retry: Option<RetryPolicy>,
    pub skip: Option<SkipPolicy>,
    pub hooks: Option<HookSet>,
    pub ui: Option<UiConfig>,
    pub tools: Vec<ToolInvocation>,
}

impl Step {
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        step_type: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            step_type: step_type.into(),
            dependencies: Vec::new(),
            config: Value::Null,
            retry: None,
            skip: None,
            hooks: None,
            ui: None,
            tools: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_dependency(mut self, dep: impl Into<String>) -> Self {
        self.dependencies.push(dep.into());
        self
    }

    #[must_use]
    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(deps.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    #[must_use]
    pub fn with_skip(mut self, skip: SkipPolicy) -> Self {
        self.skip = Some(skip);
        self
    }

    #[must_use]
    pub fn with_hooks(mut self, hooks: HookSet) -> Self {
        self.hooks = Some(hooks);
        self
    }

    #[must_use]
    pub fn with_ui(mut self, ui: UiConfig) -> Self {
        self.ui = Some(ui);
        self
    }

    #[must_use]
    pub fn with_tool(mut self, invocation: ToolInvocation) -> Self {
        self.tools.push(invocation);
        self
    }
}

/// Immutable declarative description of a workflow.
#[derive(Clone, Debug, Default)]
pub struct Definition {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub steps: Vec<Step>,
    /// Hooks registered globally for the lifetime of the loaded instance.
    pub global_hooks: Option<HookSet>,
}

impl Definition {
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            steps: Vec::new(),
            global_hooks: None,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn with_step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    #[must_use]
    pub fn with_global_hooks(mut self, hooks: HookSet) -> Self {
        self.global_hooks = Some(hooks);
        self
    }

    /// Looks up a step by id.
    #[must_use]
    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Structural validation: non-empty workflow id/name, non-empty step
    /// list, per-step non-empty id/name/type, and id uniqueness.
    ///
    /// Dependency resolution and cycle detection happen during DAG
    /// construction, not here.
    pub fn validate(&self) -> Result<(), EngineError> {
        let mut issues = Vec::new();

        if self.id.trim().is_empty() {
            issues.push("workflow id must not be empty".to_string());
        }
        if self.name.trim().is_empty() {
            issues.push("workflow name must not be empty".to_string());
        }
        if self.steps.is_empty() {
            issues.push("workflow must contain at least one step".to_string());
        }

        let mut seen = rustc_hash::FxHashSet::default();
        for (idx, step) in self.steps.iter().enumerate() {
            if step.id.trim().is_empty() {
                issues.push(format!("step #{idx} has an empty id"));
            }
            if step.name.trim().is_empty() {
                issues.push(format!("step '{}' has an empty name", step.id));
            }
            if step.step_type.trim().is_empty() {
                issues.push(format!("step '{}' has an empty type", step.id));
            }
            if !step.id.trim().is_empty() && !seen.insert(step.id.clone()) {
                issues.push(format!("duplicate step id '{}'", step.id));
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(EngineError::Validation { issues })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_schedule() {
        let policy = RetryPolicy::exponential(3, 10);
        // First retry waits the base interval, later retries double it.
        assert_eq!(policy.delay_before_attempt(2), Duration::from_millis(10));
        assert_eq!(policy.delay_before_attempt(3), Duration::from_millis(20));
        assert_eq!(policy.delay_before_attempt(4), Duration::from_millis(40));

        let flat = RetryPolicy::fixed(3, 10);
        assert_eq!(flat.delay_before_attempt(4), Duration::from_millis(10));
    }

    #[test]
    fn validate_flags_duplicates_and_empties() {
        let def = Definition::new("", "Flow")
            .with_step(Step::new("a", "A", "task"))
            .with_step(Step::new("a", "", "task"));
        let err = def.validate().unwrap_err();
        match err {
            EngineError::Validation { issues } => {
                assert!(issues.iter().any(|i| i.contains("workflow id")));
                assert!(issues.iter().any(|i| i.contains("duplicate step id 'a'")));
                assert!(issues.iter().any(|i| i.contains("empty name")));
            }
            other => panic!("expected Validation, got {other:?}"),
        }
    }

    #[test]
    fn validate_rejects_empty_step_list() {
        let def = Definition::new("wf", "Flow");
        assert!(def.validate().is_err());
    }
}
