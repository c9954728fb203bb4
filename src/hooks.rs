//! Lifecycle hook pipeline.
//!
//! Hooks are ordered async callbacks that run around every step body. The
//! [`HookManager`] keeps two process-level lists (`global_before`,
//! `global_after`); each step may additionally carry its own [`HookSet`].
//!
//! Ordering is fixed by contract:
//! - before the body: `global_before ++ step.before`
//! - after the body: `step.after ++ global_after`
//!
//! A before-hook may replace the step input for the remainder of the chain
//! and for the body itself. A failing before-hook aborts the chain and fails
//! the step; failing after-hooks are collected, logged, and never change the
//! step result.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::context::ExecutionContext;
use crate::error::EngineError;
use crate::types::HookPhase;

/// Data handed to a hook callback.
///
/// For before-hooks `output` is absent and `input` may be replaced; the value
/// left in `input` when the callback returns becomes the input for the rest
/// of the chain and for the step body. For after-hooks `output` is present
/// and mutations to `input` have no effect on the step.
#[derive(Clone, Debug)]
pub struct HookContext {
    /// Id of the step the hook runs around.
    pub step_id: String,
    /// Current step input; before-hooks may replace it.
    pub input: Value,
    /// Step output; present only in the after phase.
    pub output: Option<Value>,
    /// Live execution context of the instance.
    pub ctx: Arc<ExecutionContext>,
}

/// Async callback invoked by the hook pipeline.
///
/// The callback receives the [`HookContext`] by value and returns it,
/// possibly with a replaced `input`. Most callers construct hooks from
/// closures via [`Hook::from_fn`] instead of implementing this directly.
#[async_trait]
pub trait HookCallback: Send + Sync {
    async fn call(&self, ctx: HookContext) -> Result<HookContext, EngineError>;
}

struct FnHook<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> HookCallback for FnHook<F>
where
    F: Fn(HookContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<HookContext, EngineError>> + Send,
{
    async fn call(&self, ctx: HookContext) -> Result<HookContext, EngineError> {
        (self.f)(ctx).await
    }
}

/// A named hook entry.
#[derive(Clone)]
pub struct Hook {
    /// Unique identifier within its list.
    pub id: String,
    /// Display name.
    pub name: String,
    callback: Arc<dyn HookCallback>,
}

impl Hook {
    /// Creates a hook from any [`HookCallback`] implementation.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        callback: Arc<dyn HookCallback>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            callback,
        }
    }

    /// Creates a hook from an async closure.
    ///
    /// ```rust
    /// use taskloom::hooks::Hook;
    ///
    /// let hook = Hook::from_fn("audit", "Audit", |hc| async move {
    ///     tracing::info!(step = %hc.step_id, "step observed");
    ///     Ok(hc)
    /// });
    /// assert_eq!(hook.id, "audit");
    /// ```
    pub fn from_fn<F, Fut>(id: impl Into<String>, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(HookContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HookContext, EngineError>> + Send + 'static,
    {
        Self::new(id, name, Arc::new(FnHook { f }))
    }

    async fn invoke(&self, ctx: HookContext) -> Result<HookContext, EngineError> {
        self.callback.call(ctx).await
    }
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hook")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Ordered before/after hook lists attached to a step or a definition.
#[derive(Clone, Debug, Default)]
pub struct HookSet {
    pub before: Vec<Hook>,
    pub after: Vec<Hook>,
}

impl HookSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_before(mut self, hook: Hook) -> Self {
        self.before.push(hook);
        self
    }

    #[must_use]
    pub fn with_after(mut self, hook: Hook) -> Self {
        self.after.push(hook);
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.before.is_empty() && self.after.is_empty()
    }
}

/// Process-level hook registry and pipeline runner.
///
/// Global lists preserve insertion order; re-adding an id already present is
/// silently ignored. The lists are caller-managed but treated as read-only by
/// the engine once execution has started.
#[derive(Debug, Default)]
pub struct HookManager {
    global_before: RwLock<Vec<Hook>>,
    global_after: RwLock<Vec<Hook>>,
}

impl HookManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a global before-hook; duplicate ids are ignored.
    pub fn add_global_before(&self, hook: Hook) {
        let mut list = self.global_before.write();
        if !list.iter().any(|h| h.id == hook.id) {
            list.push(hook);
        }
    }

    /// Appends a global after-hook; duplicate ids are ignored.
    pub fn add_global_after(&self, hook: Hook) {
        let mut list = self.global_after.write();
        if !list.iter().any(|h| h.id == hook.id) {
            list.push(hook);
        }
    }

    /// Removes the hook with `id` from both global lists.
    ///
    /// Returns `true` if any entry was removed.
    pub fn remove_global_hook(&self, id: &str) -> bool {
        let mut removed = false;
        {
            let mut list = self.global_before.write();
            let len = list.len();
            list.retain(|h| h.id != id);
            removed |= list.len() != len;
        }
        {
            let mut list = self.global_after.write();
            let len = list.len();
            list.retain(|h| h.id != id);
            removed |= list.len() != len;
        }
        removed
    }

    /// Drops all global hooks.
    pub fn clear(&self) {
        self.global_before.write().clear();
        self.global_after.write().clear();
    }

    #[must_use]
    pub fn global_before_ids(&self) -> Vec<String> {
        self.global_before.read().iter().map(|h| h.id.clone()).collect()
    }

    #[must_use]
    pub fn global_after_ids(&self) -> Vec<String> {
        self.global_after.read().iter().map(|h| h.id.clone()).collect()
    }

    /// Runs the before chain: `global_before ++ step.before`.
    ///
    /// Each hook may replace the input; the final value is returned and
    /// becomes the step body's effective input. The first failing hook aborts
    /// the chain with [`EngineError::HookExecution`] in the before phase.
    pub async fn execute_before(
        &self,
        step_id: &str,
        input: Value,
        ctx: &Arc<ExecutionContext>,
        step_hooks: Option<&HookSet>,
    ) -> Result<Value, EngineError> {
        let mut chain: Vec<Hook> = self.global_before.read().clone();
        if let Some(set) = step_hooks {
            chain.extend(set.before.iter().cloned());
        }

        let mut current = input;
        for hook in chain {
            let hc = HookContext {
                step_id: step_id.to_string(),
                input: current,
                output: None,
                ctx: Arc::clone(ctx),
            };
            match hook.invoke(hc).await {
                Ok(hc) => current = hc.input,
                Err(err) => {
                    return Err(EngineError::HookExecution {
                        hook_id: hook.id.clone(),
                        phase: HookPhase::Before,
                        step_id: step_id.to_string(),
                        message: err.to_string(),
                    });
                }
            }
        }
        Ok(current)
    }

    /// Runs the after chain: `step.after ++ global_after`.
    ///
    /// Failures never abort the chain and never change the step result; each
    /// failure is logged and the first one is returned as a warning-level
    /// [`EngineError::HookExecution`] in the after phase.
    pub async fn execute_after(
        &self,
        step_id: &str,
        input: &Value,
        output: &Value,
        ctx: &Arc<ExecutionContext>,
        step_hooks: Option<&HookSet>,
    ) -> Option<EngineError> {
        let mut chain: Vec<Hook> = Vec::new();
        if let Some(set) = step_hooks {
            chain.extend(set.after.iter().cloned());
        }
        chain.extend(self.global_after.read().iter().cloned());

        let mut first_error = None;
        for hook in chain {
            let hc = HookContext {
                step_id: step_id.to_string(),
                input: input.clone(),
                output: Some(output.clone()),
                ctx: Arc::clone(ctx),
            };
            if let Err(err) = hook.invoke(hc).await {
                tracing::warn!(
                    hook = %hook.id,
                    step = %step_id,
                    error = %err,
                    "after-hook failed; step result unchanged"
                );
                if first_error.is_none() {
                    first_error = Some(EngineError::HookExecution {
                        hook_id: hook.id.clone(),
                        phase: HookPhase::After,
                        step_id: step_id.to_string(),
                        message: err.to_string(),
                    });
                }
            }
        }
        first_error
    }
}
