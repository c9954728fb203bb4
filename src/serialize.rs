//! Canonical JSON export/import for workflow definitions.
//!
//! Export emits `id`, `name`, optional `description`, `steps[]` and optional
//! `globalHooks`, with each step carrying only the optional fields that are
//! present. Declarative fields round-trip losslessly; callbacks do not: a
//! skip callback serializes as its lossy source-text representation and hook
//! callbacks serialize as id/name plus a `<callback>` placeholder. Imported
//! callback fields are inert no-ops until the caller re-binds them.

use serde_json::{json, Map, Value};

use crate::definition::{
    Definition, RetryPolicy, SkipCondition, SkipPolicy, Step, ToolInvocation, UiConfig,
};
use crate::error::EngineError;
use crate::hooks::{Hook, HookSet};

/// Serializes a definition to canonical JSON.
#[must_use]
pub fn export_definition(definition: &Definition) -> Value {
    let mut root = Map::new();
    root.insert("id".into(), Value::String(definition.id.clone()));
    root.insert("name".into(), Value::String(definition.name.clone()));
    if let Some(description) = &definition.description {
        root.insert("description".into(), Value::String(description.clone()));
    }
    root.insert(
        "steps".into(),
        Value::Array(definition.steps.iter().map(export_step).collect()),
    );
    if let Some(global_hooks) = &definition.global_hooks {
        root.insert("globalHooks".into(), export_hook_set(global_hooks));
    }
    Value::Object(root)
}

fn export_step(step: &Step) -> Value {
    let mut object = Map::new();
    object.insert("id".into(), Value::String(step.id.clone()));
    object.insert("name".into(), Value::String(step.name.clone()));
    object.insert("type".into(), Value::String(step.step_type.clone()));
    if !step.dependencies.is_empty() {
        object.insert(
            "dependencies".into(),
            Value::Array(
                step.dependencies
                    .iter()
                    .map(|d| Value::String(d.clone()))
                    .collect(),
            ),
        );
    }
    if !step.config.is_null() {
        object.insert("config".into(), step.config.clone());
    }
    if let Some(retry) = &step.retry {
        object.insert(
            "retryPolicy".into(),
            serde_json::to_value(retry).expect("retry policy serializes"),
        );
    }
    if let Some(skip) = &step.skip {
        object.insert("skipPolicy".into(), export_skip_policy(skip));
    }
    if let Some(hooks) = &step.hooks {
        object.insert("hooks".into(), export_hook_set(hooks));
    }
    if let Some(ui) = &step.ui {
        object.insert(
            "ui".into(),
            serde_json::to_value(ui).expect("ui config serializes"),
        );
    }
    if !step.tools.is_empty() {
        object.insert(
            "tools".into(),
            serde_json::to_value(&step.tools).expect("tool invocations serialize"),
        );
    }
    Value::Object(object)
}

fn export_skip_policy(policy: &SkipPolicy) -> Value {
    let condition = match &policy.condition {
        SkipCondition::Expression(source) => source.clone(),
        SkipCondition::Callback(callback) => callback.describe(),
    };
    let mut object = Map::new();
    object.insert("condition".into(), Value::String(condition));
    if let Some(default_output) = &policy.default_output {
        object.insert("defaultOutput".into(), default_output.clone());
    }
    Value::Object(object)
}

fn export_hook_set(hooks: &HookSet) -> Value {
    json!({
        "before": hooks.before.iter().map(export_hook).collect::<Vec<_>>(),
        "after": hooks.after.iter().map(export_hook).collect::<Vec<_>>(),
    })
}

fn export_hook(hook: &Hook) -> Value {
    json!({
        "id": hook.id,
        "name": hook.name,
        "callback": "<callback>",
    })
}

/// Parses and re-validates a definition from canonical JSON.
///
/// # Errors
///
/// [`EngineError::Import`] for malformed JSON shapes and
/// [`EngineError::Validation`] when the parsed definition fails the
/// structural checks.
pub fn import_definition(json: &Value) -> Result<Definition, EngineError> {
    let object = json
        .as_object()
        .ok_or_else(|| import_error("definition must be a JSON object"))?;

    let id = require_string(object, "id")?;
    let name = require_string(object, "name")?;
    let mut definition = Definition::new(id, name);
    if let Some(description) = object.get("description").and_then(Value::as_str) {
        definition = definition.with_description(description);
    }

    let steps = object
        .get("steps")
        .and_then(Value::as_array)
        .ok_or_else(|| import_error("definition requires a steps array"))?;
    for step in steps {
        definition = definition.with_step(import_step(step)?);
    }

    if let Some(global_hooks) = object.get("globalHooks") {
        definition = definition.with_global_hooks(import_hook_set(global_hooks)?);
    }

    definition.validate()?;
    Ok(definition)
}

fn import_step(json: &Value) -> Result<Step, EngineError> {
    let object = json
        .as_object()
        .ok_or_else(|| import_error("step must be a JSON object"))?;
    let id = require_string(object, "id")?;
    let name = require_string(object, "name")?;
    let step_type = require_string(object, "type")?;
    let mut step = Step::new(id, name, step_type);

    if let Some(dependencies) = object.get("dependencies").and_then(Value::as_array) {
        for dep in dependencies {
            let dep = dep
                .as_str()
                .ok_or_else(|| import_error("dependencies must be strings"))?;
            step = step.with_dependency(dep);
        }
    }
    if let Some(config) = object.get("config") {
        step = step.with_config(config.clone());
    }
    if let Some(retry) = object.get("retryPolicy") {
        let retry: RetryPolicy = serde_json::from_value(retry.clone())
            .map_err(|err| import_error(format!("invalid retryPolicy: {err}")))?;
        step = step.with_retry(retry);
    }
    if let Some(skip) = object.get("skipPolicy") {
        step = step.with_skip(import_skip_policy(skip)?);
    }
    if let Some(hooks) = object.get("hooks") {
        step = step.with_hooks(import_hook_set(hooks)?);
    }
    if let Some(ui) = object.get("ui") {
        let ui: UiConfig = serde_json::from_value(ui.clone())
            .map_err(|err| import_error(format!("invalid ui config: {err}")))?;
        step = step.with_ui(ui);
    }
    if let Some(tools) = object.get("tools") {
        let tools: Vec<ToolInvocation> = serde_json::from_value(tools.clone())
            .map_err(|err| import_error(format!("invalid tools list: {err}")))?;
        for tool in tools {
            step = step.with_tool(tool);
        }
    }
    Ok(step)
}

fn import_skip_policy(json: &Value) -> Result<SkipPolicy, EngineError> {
    let object = json
        .as_object()
        .ok_or_else(|| import_error("skipPolicy must be a JSON object"))?;
    let condition = require_string(object, "condition")?;
    // A serialized callback arrives as its placeholder text; importing it as
    // an expression keeps it inert (it never parses, hence never skips)
    // until the caller re-binds a real callback.
    let mut policy = SkipPolicy::expression(condition);
    if let Some(default_output) = object.get("defaultOutput") {
        policy = policy.with_default_output(default_output.clone());
    }
    Ok(policy)
}

fn import_hook_set(json: &Value) -> Result<HookSet, EngineError> {
    let object = json
        .as_object()
        .ok_or_else(|| import_error("hooks must be a JSON object"))?;
    let mut set = HookSet::new();
    for (list_name, target) in [("before", true), ("after", false)] {
        let Some(list) = object.get(list_name).and_then(Value::as_array) else {
            continue;
        };
        for hook in list {
            let hook_object = hook
                .as_object()
                .ok_or_else(|| import_error("hook entries must be JSON objects"))?;
            let id = require_string(hook_object, "id")?;
            let name = require_string(hook_object, "name")?;
            // Imported callbacks are inert identity hooks.
            let imported = Hook::from_fn(id, name, |hc| async move { Ok(hc) });
            if target {
                set = set.with_before(imported);
            } else {
                set = set.with_after(imported);
            }
        }
    }
    Ok(set)
}

fn require_string(object: &Map<String, Value>, key: &str) -> Result<String, EngineError> {
    object
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| import_error(format!("missing or non-string field '{key}'")))
}

fn import_error(message: impl Into<String>) -> EngineError {
    EngineError::Import {
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{RetryPolicy, SkipPolicy, Step, ToolInvocation, UiOption};
    use crate::types::UiMode;
    use serde_json::json;

    fn sample_definition() -> Definition {
        Definition::new("wf", "Flow")
            .with_description("sample")
            .with_step(
                Step::new("a", "A", "task")
                    .with_retry(RetryPolicy::exponential(2, 100))
                    .with_skip(
                        SkipPolicy::expression("globals.skip == true")
                            .with_default_output(json!("skipped")),
                    ),
            )
            .with_step(
                Step::new("b", "B", "tool")
                    .with_dependency("a")
                    .with_tool(
                        ToolInvocation::new("calc")
                            .with_params(json!({"x": 1}))
                            .with_output_key("calcResult"),
                    ),
            )
            .with_step(
                Step::new("c", "C", "ui").with_dependency("b").with_ui(
                    crate::definition::UiConfig::new("picker", UiMode::Select)
                        .with_option(UiOption::new("yes", "Yes"))
                        .with_option(UiOption::new("no", "No")),
                ),
            )
    }

    #[test]
    fn export_emits_only_present_fields() {
        let value = export_definition(&sample_definition());
        assert_eq!(value["id"], "wf");
        let steps = value["steps"].as_array().unwrap();
        assert!(steps[0].get("dependencies").is_none());
        assert_eq!(steps[1]["dependencies"], json!(["a"]));
        assert!(steps[0].get("tools").is_none());
        assert_eq!(steps[1]["tools"][0]["toolId"], "calc");
        assert_eq!(steps[0]["retryPolicy"]["maxRetries"], 2);
        assert_eq!(steps[0]["skipPolicy"]["condition"], "globals.skip == true");
    }

    #[test]
    fn round_trip_preserves_declarative_fields() {
        let original = sample_definition();
        let exported = export_definition(&original);
        let imported = import_definition(&exported).unwrap();

        assert_eq!(imported.id, original.id);
        assert_eq!(imported.name, original.name);
        assert_eq!(imported.description, original.description);
        assert_eq!(imported.steps.len(), original.steps.len());
        for (imported_step, original_step) in imported.steps.iter().zip(&original.steps) {
            assert_eq!(imported_step.id, original_step.id);
            assert_eq!(imported_step.step_type, original_step.step_type);
            assert_eq!(imported_step.dependencies, original_step.dependencies);
            assert_eq!(imported_step.retry, original_step.retry);
            assert_eq!(imported_step.ui, original_step.ui);
            assert_eq!(imported_step.tools, original_step.tools);
        }
        // Re-export equals the first export: the canonical form is a fixpoint.
        assert_eq!(export_definition(&imported), exported);
    }

    #[test]
    fn import_rejects_missing_fields() {
        let err = import_definition(&json!({"name": "x", "steps": []})).unwrap_err();
        assert!(matches!(err, EngineError::Import { .. }));
    }

    #[test]
    fn import_revalidates_structure() {
        let json = json!({
            "id": "wf",
            "name": "Flow",
            "steps": [
                {"id": "a", "name": "A", "type": "task"},
                {"id": "a", "name": "A2", "type": "task"}
            ]
        });
        let err = import_definition(&json).unwrap_err();
        assert!(matches!(err, EngineError::Validation { .. }));
    }
}
