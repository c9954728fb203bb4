//! Per-instance execution context.
//!
//! Every workflow instance owns one [`ExecutionContext`] holding two disjoint
//! namespaces: `step_outputs` (committed step results, keyed by step id) and
//! `globals` (free-form keys written by tools, hooks and the caller's initial
//! globals). Values are opaque [`serde_json::Value`]s.
//!
//! The context is shared across concurrently running steps behind an `Arc`;
//! individual get/set operations are atomic. Parallel steps write disjoint
//! `step_outputs` keys by construction, while `globals` writes may race and
//! are serialized by the inner lock.
//!
//! [`ExecutionContext::snapshot`] takes a structural copy; mutating the
//! snapshot never affects the live context, and [`ExecutionContext::restore`]
//! replaces both namespaces wholesale. The `clear*` family exists for
//! administrative use only; normal execution never calls it.
//!
//! # Examples
//!
//! ```rust
//! use taskloom::context::ExecutionContext;
//! use serde_json::json;
//!
//! let ctx = ExecutionContext::new();
//! ctx.set_step_output("fetch", json!({"rows": 3}));
//! ctx.set_global("attempts", json!(1));
//!
//! let snap = ctx.snapshot();
//! ctx.set_global("attempts", json!(2));
//!
//! // The snapshot is independent of later mutation.
//! assert_eq!(snap.globals["attempts"], json!(1));
//! assert_eq!(ctx.get_global("attempts"), Some(json!(2)));
//! ```

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Structural copy of both context namespaces at a point in time.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextSnapshot {
    /// Committed step outputs, keyed by step id.
    pub step_outputs: FxHashMap<String, Value>,
    /// Global values, keyed by caller-chosen names.
    pub globals: FxHashMap<String, Value>,
}

/// Mutable per-instance key-value store for step outputs and globals.
///
/// Distinct instances share nothing; the engine creates a fresh context per
/// loaded workflow and preserves it after termination for inspection.
#[derive(Debug, Default)]
pub struct ExecutionContext {
    step_outputs: RwLock<FxHashMap<String, Value>>,
    globals: RwLock<FxHashMap<String, Value>>,
}

impl ExecutionContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Commits a step output, replacing any previous value for the id.
    pub fn set_step_output(&self, step_id: impl Into<String>, value: Value) {
        self.step_outputs.write().insert(step_id.into(), value);
    }

    /// Returns a clone of the committed output for `step_id`, if any.
    #[must_use]
    pub fn get_step_output(&self, step_id: &str) -> Option<Value> {
        self.step_outputs.read().get(step_id).cloned()
    }

    /// Returns `true` if an output has been committed for `step_id`.
    #[must_use]
    pub fn has_step_output(&self, step_id: &str) -> bool {
        self.step_outputs.read().contains_key(step_id)
    }

    /// Sets a global value, replacing any previous value for the key.
    pub fn set_global(&self, key: impl Into<String>, value: Value) {
        self.globals.write().insert(key.into(), value);
    }

    /// Returns a clone of the global value for `key`, if any.
    #[must_use]
    pub fn get_global(&self, key: &str) -> Option<Value> {
        self.globals.read().get(key).cloned()
    }

    /// Returns `true` if a global value exists for `key`.
    #[must_use]
    pub fn has_global(&self, key: &str) -> bool {
        self.globals.read().contains_key(key)
    }

    /// Number of committed step outputs.
    #[must_use]
    pub fn step_output_count(&self) -> usize {
        self.step_outputs.read().len()
    }

    /// Takes a structural copy of both namespaces.
    ///
    /// Mutating the returned snapshot does not affect this context.
    #[must_use]
    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            step_outputs: self.step_outputs.read().clone(),
            globals: self.globals.read().clone(),
        }
    }

    /// Replaces both namespaces wholesale with the snapshot's contents.
    pub fn restore(&self, snapshot: ContextSnapshot) {
        *self.step_outputs.write() = snapshot.step_outputs;
        *self.globals.write() = snapshot.globals;
    }

    /// Administrative: drops all committed step outputs.
    pub fn clear_step_outputs(&self) {
        self.step_outputs.write().clear();
    }

    /// Administrative: drops all global values.
    pub fn clear_globals(&self) {
        self.globals.write().clear();
    }

    /// Administrative: drops everything.
    pub fn clear(&self) {
        self.clear_step_outputs();
        self.clear_globals();
    }
}
