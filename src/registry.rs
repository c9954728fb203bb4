//! Name-indexed catalogs of tools, UI components and step types.
//!
//! Registries are process-level and caller-managed; the engine treats them as
//! read-only once execution has started. Registering an id twice fails
//! rather than overwriting, and `get` on a missing id raises the matching
//! not-found error.

use async_trait::async_trait;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::context::ExecutionContext;
use crate::definition::UiConfig;
use crate::error::EngineError;
use crate::schema::Schema;
use crate::types::{ToolMode, UiMode};

// ---------------------------------------------------------------------------
// Tools
// ---------------------------------------------------------------------------

/// Metadata describing a registered tool.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolMeta {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub mode: ToolMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Schema>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Schema>,
    /// Per-call timeout in milliseconds, enforced by the invoker.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl ToolMeta {
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, mode: ToolMode) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            mode,
            input_schema: None,
            output_schema: None,
            timeout_ms: None,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn with_input_schema(mut self, schema: Schema) -> Self {
        self.input_schema = Some(schema);
        self
    }

    #[must_use]
    pub fn with_output_schema(mut self, schema: Schema) -> Self {
        self.output_schema = Some(schema);
        self
    }

    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

/// Executable side of a tool registration.
///
/// For [`ToolMode::Sync`] tools the invoker calls `execute` directly and
/// awaits the result; for [`ToolMode::Async`] tools the executor is ignored
/// at call time and an external caller resolves the pending call through the
/// engine's tool response entry points.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(
        &self,
        params: Value,
        ctx: Arc<ExecutionContext>,
    ) -> Result<Value, EngineError>;
}

struct FnToolExecutor<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> ToolExecutor for FnToolExecutor<F>
where
    F: Fn(Value, Arc<ExecutionContext>) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<Value, EngineError>> + Send,
{
    async fn execute(
        &self,
        params: Value,
        ctx: Arc<ExecutionContext>,
    ) -> Result<Value, EngineError> {
        (self.f)(params, ctx).await
    }
}

/// A tool's metadata paired with its executor.
#[derive(Clone)]
pub struct ToolRegistration {
    pub meta: ToolMeta,
    pub executor: Arc<dyn ToolExecutor>,
}

impl ToolRegistration {
    pub fn new(meta: ToolMeta, executor: Arc<dyn ToolExecutor>) -> Self {
        Self { meta, executor }
    }

    /// Builds a registration from an async closure.
    pub fn from_fn<F, Fut>(meta: ToolMeta, f: F) -> Self
    where
        F: Fn(Value, Arc<ExecutionContext>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value, EngineError>> + Send + 'static,
    {
        Self::new(meta, Arc::new(FnToolExecutor { f }))
    }
}

impl fmt::Debug for ToolRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistration")
            .field("meta", &self.meta)
            .finish_non_exhaustive()
    }
}

/// Catalog of tools, keyed by id.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    entries: RwLock<FxHashMap<String, ToolRegistration>>,
}

impl ToolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool; duplicate ids fail.
    pub fn register(&self, registration: ToolRegistration) -> Result<(), EngineError> {
        let mut entries = self.entries.write();
        let id = registration.meta.id.clone();
        if entries.contains_key(&id) {
            return Err(EngineError::DuplicateRegistration { id });
        }
        entries.insert(id, registration);
        Ok(())
    }

    /// Removes a tool; returns `true` if it existed.
    pub fn unregister(&self, id: &str) -> bool {
        self.entries.write().remove(id).is_some()
    }

    pub fn get(&self, id: &str) -> Result<ToolRegistration, EngineError> {
        self.entries
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::ToolNotFound {
                tool_id: id.to_string(),
            })
    }

    #[must_use]
    pub fn has(&self, id: &str) -> bool {
        self.entries.read().contains_key(id)
    }

    /// Metadata for every registered tool.
    #[must_use]
    pub fn get_all(&self) -> Vec<ToolMeta> {
        let mut all: Vec<ToolMeta> = self
            .entries
            .read()
            .values()
            .map(|r| r.meta.clone())
            .collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

// ---------------------------------------------------------------------------
// UI components
// ---------------------------------------------------------------------------

/// Result of rendering a UI component, and the shape of external responses.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiRenderResult {
    pub rendered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_response: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_option: Option<String>,
}

impl UiRenderResult {
    #[must_use]
    pub fn rendered() -> Self {
        Self {
            rendered: true,
            user_response: None,
            selected_option: None,
        }
    }

    #[must_use]
    pub fn with_response(mut self, response: Value) -> Self {
        self.user_response = Some(response);
        self
    }

    #[must_use]
    pub fn with_selected_option(mut self, option: impl Into<String>) -> Self {
        self.selected_option = Some(option.into());
        self
    }
}

/// Rendering side of a UI registration.
///
/// For Display mode the renderer's return value becomes the response; for
/// Confirm/Select the renderer is invoked for side effect only and the real
/// response arrives via the engine's `respond_to_ui` entry point.
#[async_trait]
pub trait UiRenderer: Send + Sync {
    async fn render(
        &self,
        config: &UiConfig,
        ctx: Arc<ExecutionContext>,
    ) -> Result<UiRenderResult, EngineError>;
}

struct FnUiRenderer<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> UiRenderer for FnUiRenderer<F>
where
    F: Fn(UiConfig, Arc<ExecutionContext>) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<UiRenderResult, EngineError>> + Send,
{
    async fn render(
        &self,
        config: &UiConfig,
        ctx: Arc<ExecutionContext>,
    ) -> Result<UiRenderResult, EngineError> {
        (self.f)(config.clone(), ctx).await
    }
}

/// Metadata describing a registered UI component.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiMeta {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub supported_modes: Vec<UiMode>,
}

impl UiMeta {
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        supported_modes: Vec<UiMode>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            supported_modes,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A UI component's metadata paired with its renderer.
#[derive(Clone)]
pub struct UiRegistration {
    pub meta: UiMeta,
    pub renderer: Arc<dyn UiRenderer>,
}

impl UiRegistration {
    pub fn new(meta: UiMeta, renderer: Arc<dyn UiRenderer>) -> Self {
        Self { meta, renderer }
    }

    pub fn from_fn<F, Fut>(meta: UiMeta, f: F) -> Self
    where
        F: Fn(UiConfig, Arc<ExecutionContext>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<UiRenderResult, EngineError>> + Send + 'static,
    {
        Self::new(meta, Arc::new(FnUiRenderer { f }))
    }
}

impl fmt::Debug for UiRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UiRegistration")
            .field("meta", &self.meta)
            .finish_non_exhaustive()
    }
}

/// Catalog of UI components, keyed by id.
#[derive(Debug, Default)]
pub struct UiRegistry {
    entries: RwLock<FxHashMap<String, UiRegistration>>,
}

impl UiRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, registration: UiRegistration) -> Result<(), EngineError> {
        let mut entries = self.entries.write();
        let id = registration.meta.id.clone();
        if entries.contains_key(&id) {
            return Err(EngineError::DuplicateRegistration { id });
        }
        entries.insert(id, registration);
        Ok(())
    }

    pub fn unregister(&self, id: &str) -> bool {
        self.entries.write().remove(id).is_some()
    }

    pub fn get(&self, id: &str) -> Result<UiRegistration, EngineError> {
        self.entries
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::UiComponentNotFound {
                component_id: id.to_string(),
            })
    }

    #[must_use]
    pub fn has(&self, id: &str) -> bool {
        self.entries.read().contains_key(id)
    }

    #[must_use]
    pub fn get_all(&self) -> Vec<UiMeta> {
        let mut all: Vec<UiMeta> = self
            .entries
            .read()
            .values()
            .map(|r| r.meta.clone())
            .collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

// ---------------------------------------------------------------------------
// Step types
// ---------------------------------------------------------------------------

/// Metadata describing a registerable step type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepTypeMeta {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl StepTypeMeta {
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Metadata-only catalog of step types, used by external editors to
/// introspect what a definition may contain.
#[derive(Debug, Default)]
pub struct StepTypeRegistry {
    entries: RwLock<FxHashMap<String, StepTypeMeta>>,
}

impl StepTypeRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-seeded with the built-in `task`, `ui` and `tool` types.
    #[must_use]
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        for (id, name, description) in [
            ("task", "Task", "Pass-through unit of work"),
            ("ui", "UI Interaction", "Human-in-the-loop interaction"),
            ("tool", "Tool Invocation", "Declarative tool calls"),
        ] {
            let _ = registry.register(StepTypeMeta::new(id, name).with_description(description));
        }
        registry
    }

    pub fn register(&self, meta: StepTypeMeta) -> Result<(), EngineError> {
        let mut entries = self.entries.write();
        if entries.contains_key(&meta.id) {
            return Err(EngineError::DuplicateRegistration {
                id: meta.id.clone(),
            });
        }
        entries.insert(meta.id.clone(), meta);
        Ok(())
    }

    pub fn unregister(&self, id: &str) -> bool {
        self.entries.write().remove(id).is_some()
    }

    #[must_use]
    pub fn has(&self, id: &str) -> bool {
        self.entries.read().contains_key(id)
    }

    #[must_use]
    pub fn get_all(&self) -> Vec<StepTypeMeta> {
        let mut all: Vec<StepTypeMeta> = self.entries.read().values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }
}
