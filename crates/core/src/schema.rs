//! Compiled tool input schemas.
//!
//! Providers declare their inputs as JSON Schema documents. The gateway compiles each one
//! into a small tagged [`Schema`] tree once, at registration time, and validates every
//! invocation against it before anything is sent to the provider. Only the structural
//! subset matters here: types, required properties, enums, array items, and the
//! `anyOf`/`oneOf`/`allOf` combinators.
//! Anything the compiler does not understand accepts any value.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Schema {
    /// Accepts any value.
    Any,
    Null,
    Boolean,
    Integer,
    Number,
    String {
        /// Allowed values from `enum`, if any.
        allowed: Option<Vec<Value>>,
    },
    Array {
        items: Box<Schema>,
    },
    Object {
        properties: BTreeMap<String, Schema>,
        required: Vec<String>,
        /// Schema for properties not listed in `properties`; `None` means they are rejected.
        additional: Option<Box<Schema>>,
    },
    /// Accepts a value matching any variant.
    Union(Vec<Schema>),
    /// Accepts a value matching every part.
    All(Vec<Schema>),
}

/// One reason a value does not match a schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    /// JSON path to the offending value, e.g. `$.items[2].name`.
    pub path: String,
    pub message: String,
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

impl Schema {
    /// Compile a JSON Schema document. Never fails: unknown constructs become [`Schema::Any`].
    pub fn compile(raw: &Value) -> Schema {
        let Some(obj) = raw.as_object() else {
            // `true` and `{}` both accept everything; `false` is not worth modelling.
            return Schema::Any;
        };

        // Combinators apply on top of the schema's own keywords, not instead of them.
        let mut parts = vec![compile_base(obj)];
        for key in ["anyOf", "oneOf"] {
            if let Some(Value::Array(variants)) = obj.get(key) {
                parts.push(union(variants.iter().map(Schema::compile).collect()));
            }
        }
        if let Some(Value::Array(members)) = obj.get("allOf") {
            parts.extend(members.iter().map(Schema::compile));
        }
        all(parts)
    }

    /// Validate `value`, collecting every violation found.
    pub fn validate(&self, value: &Value) -> Result<(), Vec<SchemaViolation>> {
        let mut violations = Vec::new();
        self.check(value, "$", &mut violations);
        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }

    fn check(&self, value: &Value, path: &str, out: &mut Vec<SchemaViolation>) {
        match self {
            Schema::Any => {}
            Schema::Null => {
                if !value.is_null() {
                    push(out, path, format!("expected null, got {}", type_name(value)));
                }
            }
            Schema::Boolean => {
                if !value.is_boolean() {
                    push(out, path, format!("expected boolean, got {}", type_name(value)));
                }
            }
            Schema::Integer => {
                if !is_integer(value) {
                    push(out, path, format!("expected integer, got {}", type_name(value)));
                }
            }
            Schema::Number => {
                if !value.is_number() {
                    push(out, path, format!("expected number, got {}", type_name(value)));
                }
            }
            Schema::String { allowed } => match (value, allowed) {
                (Value::String(_), None) => {}
                (v, Some(allowed)) if allowed.contains(v) => {}
                (Value::String(s), Some(_)) => push(out, path, format!("'{}' is not an allowed value", s)),
                (v, _) => push(out, path, format!("expected string, got {}", type_name(v))),
            },
            Schema::Array { items } => match value {
                Value::Array(elements) => {
                    for (i, element) in elements.iter().enumerate() {
                        items.check(element, &format!("{}[{}]", path, i), out);
                    }
                }
                other => push(out, path, format!("expected array, got {}", type_name(other))),
            },
            Schema::Object {
                properties,
                required,
                additional,
            } => {
                let Value::Object(fields) = value else {
                    push(out, path, format!("expected object, got {}", type_name(value)));
                    return;
                };

                for name in required {
                    if !fields.contains_key(name) {
                        push(out, path, format!("missing required property '{}'", name));
                    }
                }

                for (name, field) in fields {
                    let field_path = format!("{}.{}", path, name);
                    match (properties.get(name), additional) {
                        (Some(schema), _) => schema.check(field, &field_path, out),
                        (None, Some(schema)) => schema.check(field, &field_path, out),
                        (None, None) => push(out, &field_path, "unexpected property".to_string()),
                    }
                }
            }
            Schema::Union(variants) => {
                let matched = variants.iter().any(|variant| {
                    let mut scratch = Vec::new();
                    variant.check(value, path, &mut scratch);
                    scratch.is_empty()
                });
                if !matched {
                    push(out, path, format!("{} does not match any allowed schema", type_name(value)));
                }
            }
            Schema::All(parts) => {
                for part in parts {
                    part.check(value, path, out);
                }
            }
        }
    }
}

fn push(out: &mut Vec<SchemaViolation>, path: &str, message: String) {
    out.push(SchemaViolation {
        path: path.to_string(),
        message,
    });
}

fn compile_base(obj: &Map<String, Value>) -> Schema {
    if let Some(Value::Array(allowed)) = obj.get("enum") {
        let ty = obj.get("type");
        if ty.is_none() || ty.and_then(Value::as_str) == Some("string") {
            return Schema::String {
                allowed: Some(allowed.clone()),
            };
        }
    }

    match obj.get("type") {
        Some(Value::String(_)) => compile_typed(obj),
        Some(Value::Array(types)) => union(
            types
                .iter()
                .filter_map(Value::as_str)
                .map(|ty| compile_type(ty, obj))
                .collect(),
        ),
        _ if obj.contains_key("properties") || obj.contains_key("required") => compile_type("object", obj),
        _ => Schema::Any,
    }
}

fn compile_typed(obj: &Map<String, Value>) -> Schema {
    match obj.get("type").and_then(Value::as_str) {
        Some(ty) => compile_type(ty, obj),
        None => Schema::Any,
    }
}

fn compile_type(ty: &str, obj: &Map<String, Value>) -> Schema {
    match ty {
        "null" => Schema::Null,
        "boolean" => Schema::Boolean,
        "integer" => Schema::Integer,
        "number" => Schema::Number,
        "string" => Schema::String {
            allowed: obj.get("enum").and_then(Value::as_array).cloned(),
        },
        "array" => Schema::Array {
            items: Box::new(obj.get("items").map(Schema::compile).unwrap_or(Schema::Any)),
        },
        "object" => {
            let properties = obj
                .get("properties")
                .and_then(Value::as_object)
                .map(|props| {
                    props
                        .iter()
                        .map(|(name, schema)| (name.clone(), Schema::compile(schema)))
                        .collect()
                })
                .unwrap_or_default();
            let required = obj
                .get("required")
                .and_then(Value::as_array)
                .map(|names| names.iter().filter_map(Value::as_str).map(String::from).collect())
                .unwrap_or_default();
            // Names matching `patternProperties` are let through unchecked.
            let additional = match obj.get("additionalProperties") {
                _ if obj.contains_key("patternProperties") => Some(Box::new(Schema::Any)),
                Some(Value::Bool(false)) => None,
                Some(schema @ Value::Object(_)) => Some(Box::new(Schema::compile(schema))),
                _ => Some(Box::new(Schema::Any)),
            };
            Schema::Object {
                properties,
                required,
                additional,
            }
        }
        _ => Schema::Any,
    }
}

fn all(parts: Vec<Schema>) -> Schema {
    let mut parts: Vec<Schema> = parts.into_iter().filter(|p| !matches!(p, Schema::Any)).collect();
    match parts.len() {
        0 => Schema::Any,
        1 => parts.remove(0),
        _ => Schema::All(parts),
    }
}

fn union(mut variants: Vec<Schema>) -> Schema {
    if variants.iter().any(|v| matches!(v, Schema::Any)) || variants.is_empty() {
        return Schema::Any;
    }
    if variants.len() == 1 {
        return variants.remove(0);
    }
    Schema::Union(variants)
}

fn is_integer(value: &Value) -> bool {
    match value {
        Value::Number(n) => n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0),
        _ => false,
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo_schema() -> Schema {
        Schema::compile(&json!({
            "type": "object",
            "properties": {
                "text": {"type": "string"},
                "count": {"type": "integer"},
                "tags": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["text"]
        }))
    }

    #[test]
    fn test_accepts_matching_object() {
        let schema = echo_schema();
        assert!(schema.validate(&json!({"text": "hi"})).is_ok());
        assert!(schema
            .validate(&json!({"text": "hi", "count": 3, "tags": ["a"], "extra": null}))
            .is_ok());
    }

    #[test]
    fn test_reports_missing_required_and_wrong_types() {
        let schema = echo_schema();
        let violations = schema
            .validate(&json!({"count": 1.5, "tags": ["a", 2]}))
            .unwrap_err();

        let rendered: Vec<String> = violations.iter().map(ToString::to_string).collect();
        assert!(rendered.contains(&"$: missing required property 'text'".to_string()));
        assert!(rendered.contains(&"$.count: expected integer, got number".to_string()));
        assert!(rendered.contains(&"$.tags[1]: expected string, got number".to_string()));
    }

    #[test]
    fn test_non_object_arguments() {
        let violations = echo_schema().validate(&json!([1, 2])).unwrap_err();
        assert_eq!(violations[0].message, "expected object, got array");
    }

    #[test]
    fn test_additional_properties_false() {
        let schema = Schema::compile(&json!({
            "type": "object",
            "properties": {"a": {"type": "number"}},
            "additionalProperties": false
        }));
        let violations = schema.validate(&json!({"a": 1, "b": 2})).unwrap_err();
        assert_eq!(violations[0].path, "$.b");
    }

    #[test]
    fn test_unions_and_enums() {
        let nullable = Schema::compile(&json!({"type": ["string", "null"]}));
        assert!(nullable.validate(&json!(null)).is_ok());
        assert!(nullable.validate(&json!("x")).is_ok());
        assert!(nullable.validate(&json!(1)).is_err());

        let any_of = Schema::compile(&json!({"anyOf": [{"type": "integer"}, {"type": "boolean"}]}));
        assert!(any_of.validate(&json!(true)).is_ok());
        assert!(any_of.validate(&json!("no")).is_err());

        let mode = Schema::compile(&json!({"type": "string", "enum": ["fast", "slow"]}));
        assert!(mode.validate(&json!("fast")).is_ok());
        assert!(mode.validate(&json!("medium")).is_err());
    }

    #[test]
    fn test_any_of_keeps_sibling_keywords() {
        let schema = Schema::compile(&json!({
            "type": "object",
            "properties": {"path": {"type": "string"}},
            "required": ["path"],
            "anyOf": [{"required": ["a"]}, {"required": ["b"]}]
        }));

        let violations = schema.validate(&json!({"a": 1, "path": 5})).unwrap_err();
        let rendered: Vec<String> = violations.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, vec!["$.path: expected string, got number".to_string()]);

        assert!(schema.validate(&json!({"a": 1})).is_err());
        assert!(schema.validate(&json!({"path": "x"})).is_err());
        assert!(schema.validate(&json!({"path": "x", "b": true})).is_ok());
    }

    #[test]
    fn test_one_of_alongside_type() {
        let schema = Schema::compile(&json!({
            "type": "object",
            "oneOf": [
                {"properties": {"mode": {"enum": ["fast"]}}},
                {"properties": {"mode": {"enum": ["slow"]}}, "required": ["delay"]}
            ]
        }));
        assert!(schema.validate(&json!({"mode": "fast"})).is_ok());
        assert!(schema.validate(&json!({"mode": "slow", "delay": 1})).is_ok());
        assert!(schema.validate(&json!({"mode": "medium"})).is_err());
        assert!(schema.validate(&json!("fast")).is_err());
    }

    #[test]
    fn test_all_of_requires_every_part() {
        let schema = Schema::compile(&json!({"allOf": [{"type": "object", "required": ["q"]}]}));
        let violations = schema.validate(&json!({})).unwrap_err();
        assert_eq!(violations[0].message, "missing required property 'q'");
        assert!(schema.validate(&json!({"q": "rust"})).is_ok());

        let both = Schema::compile(&json!({
            "allOf": [
                {"properties": {"q": {"type": "string"}}, "required": ["q"]},
                {"properties": {"limit": {"type": "integer"}}, "required": ["limit"]}
            ]
        }));
        assert!(matches!(both, Schema::All(ref parts) if parts.len() == 2));
        assert!(both.validate(&json!({"q": "rust", "limit": 5})).is_ok());
        assert_eq!(both.validate(&json!({"q": 1})).unwrap_err().len(), 2);
    }

    #[test]
    fn test_pattern_properties_are_let_through() {
        let schema = Schema::compile(&json!({
            "type": "object",
            "properties": {"id": {"type": "string"}},
            "patternProperties": {"^x-": {"type": "string"}},
            "additionalProperties": false
        }));
        assert!(schema.validate(&json!({"x-id": "1"})).is_ok());
        assert!(schema.validate(&json!({"id": "a", "x-trace": "t"})).is_ok());
        assert!(schema.validate(&json!({"id": 1})).is_err());

        let untyped = Schema::compile(&json!({
            "patternProperties": {"^x-": {"type": "string"}},
            "additionalProperties": false
        }));
        assert!(untyped.validate(&json!({"x-id": "1"})).is_ok());
    }

    #[test]
    fn test_lenient_compilation() {
        assert_eq!(Schema::compile(&json!({})), Schema::Any);
        assert_eq!(Schema::compile(&json!(true)), Schema::Any);
        assert_eq!(Schema::compile(&json!({"type": "custom"})), Schema::Any);
        assert_eq!(Schema::compile(&json!({"type": "integer"})), Schema::Integer);
        assert!(matches!(
            Schema::compile(&json!({"required": ["x"]})),
            Schema::Object { ref required, .. } if required == &vec!["x".to_string()]
        ));
        assert!(Schema::compile(&json!({"type": "object"})).validate(&json!({"anything": 1})).is_ok());
    }
}
