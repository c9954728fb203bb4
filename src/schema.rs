//! Minimal recursive schema validation for tool parameters.
//!
//! Tools may declare an input schema over a deliberately narrow shape: the
//! five primitive type tags `string`, `number`, `boolean`, `object`, and
//! `array`. Objects check the type tag, required fields, and recursively
//! validate known properties (additional properties are allowed); arrays
//! validate every element against `items`. Failures carry dotted/indexed
//! paths like `params.filters[2].name`.
//!
//! # Examples
//!
//! ```rust
//! use taskloom::schema::Schema;
//! use serde_json::json;
//!
//! let schema: Schema = serde_json::from_value(json!({
//!     "type": "object",
//!     "properties": {
//!         "x": {"type": "number"},
//!         "tags": {"type": "array", "items": {"type": "string"}}
//!     },
//!     "required": ["x"]
//! })).unwrap();
//!
//! assert!(schema.validate(&json!({"x": 1, "tags": ["a"]})).is_empty());
//!
//! let failures = schema.validate(&json!({"tags": [1]}));
//! assert!(failures.iter().any(|f| f.contains("x")));
//! assert!(failures.iter().any(|f| f.contains("tags[0]")));
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Constrained schema shape accepted by the validator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Schema {
    String,
    Number,
    Boolean,
    Object {
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        properties: BTreeMap<String, Schema>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        required: Vec<String>,
    },
    Array {
        items: Box<Schema>,
    },
}

impl Schema {
    /// Convenience constructor for an object schema.
    #[must_use]
    pub fn object<I, S>(properties: I, required: impl IntoIterator<Item = S>) -> Self
    where
        I: IntoIterator<Item = (S, Schema)>,
        S: Into<String>,
    {
        Self::Object {
            properties: properties
                .into_iter()
                .map(|(k, v)| (k.into(), v))
                .collect(),
            required: required.into_iter().map(Into::into).collect(),
        }
    }

    /// Convenience constructor for an array schema.
    #[must_use]
    pub fn array(items: Schema) -> Self {
        Self::Array {
            items: Box::new(items),
        }
    }

    /// Validates `value`, returning one path-qualified message per failure.
    ///
    /// An empty result means the value conforms.
    #[must_use]
    pub fn validate(&self, value: &Value) -> Vec<String> {
        let mut failures = Vec::new();
        validate_at(self, value, "", &mut failures);
        failures
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn describe(path: &str) -> &str {
    if path.is_empty() {
        "value"
    } else {
        path
    }
}

fn child_path(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

fn validate_at(schema: &Schema, value: &Value, path: &str, failures: &mut Vec<String>) {
    match schema {
        Schema::String => {
            if !value.is_string() {
                failures.push(format!(
                    "{}: expected string, got {}",
                    describe(path),
                    type_name(value)
                ));
            }
        }
        Schema::Number => {
            if !value.is_number() {
                failures.push(format!(
                    "{}: expected number, got {}",
                    describe(path),
                    type_name(value)
                ));
            }
        }
        Schema::Boolean => {
            if !value.is_boolean() {
                failures.push(format!(
                    "{}: expected boolean, got {}",
                    describe(path),
                    type_name(value)
                ));
            }
        }
        Schema::Object {
            properties,
            required,
        } => {
            let Some(map) = value.as_object() else {
                failures.push(format!(
                    "{}: expected object, got {}",
                    describe(path),
                    type_name(value)
                ));
                return;
            };
            for field in required {
                if !map.contains_key(field) {
                    failures.push(format!(
                        "{}: missing required field",
                        child_path(path, field)
                    ));
                }
            }
            // Known properties validate recursively; extras pass untouched.
            for (key, prop_schema) in properties {
                if let Some(prop_value) = map.get(key) {
                    validate_at(prop_schema, prop_value, &child_path(path, key), failures);
                }
            }
        }
        Schema::Array { items } => {
            let Some(elements) = value.as_array() else {
                failures.push(format!(
                    "{}: expected array, got {}",
                    describe(path),
                    type_name(value)
                ));
                return;
            };
            for (idx, element) in elements.iter().enumerate() {
                validate_at(items, element, &format!("{path}[{idx}]"), failures);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn primitives() {
        assert!(Schema::String.validate(&json!("ok")).is_empty());
        assert_eq!(
            Schema::Number.validate(&json!("no")),
            vec!["value: expected number, got string"]
        );
        assert!(Schema::Boolean.validate(&json!(true)).is_empty());
    }

    #[test]
    fn object_required_and_recursion() {
        let schema = Schema::object(
            [
                ("name", Schema::String),
                ("count", Schema::Number),
            ],
            ["name"],
        );
        assert!(schema
            .validate(&json!({"name": "a", "count": 2, "extra": true}))
            .is_empty());

        let failures = schema.validate(&json!({"count": "two"}));
        assert!(failures.contains(&"name: missing required field".to_string()));
        assert!(failures.contains(&"count: expected number, got string".to_string()));
    }

    #[test]
    fn nested_paths_are_indexed() {
        let schema = Schema::object(
            [(
                "filters",
                Schema::array(Schema::object([("name", Schema::String)], ["name"])),
            )],
            ["filters"],
        );
        let failures = schema.validate(&json!({"filters": [{"name": "ok"}, {}]}));
        assert_eq!(failures, vec!["filters[1].name: missing required field"]);
    }

    #[test]
    fn schema_round_trips_through_json() {
        let schema = Schema::object([("xs", Schema::array(Schema::Number))], ["xs"]);
        let value = serde_json::to_value(&schema).unwrap();
        assert_eq!(value["type"], "object");
        let back: Schema = serde_json::from_value(value).unwrap();
        assert_eq!(back, schema);
    }
}
