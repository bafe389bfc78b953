//! Schema-driven argument validation
//!
//! Checks raw `tools/call` arguments against a tool's input schema before any
//! remote call is made. Supports the subset of JSON Schema the tool schemas
//! use: `type`, `properties`, `required`, `items`, `enum`, `default`,
//! `minimum` and `maximum`. Numeric bounds clamp rather than reject.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::{McpError, Result, ValidationError};

/// Arguments that passed validation, with schema defaults filled in
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolArguments {
    values: Map<String, Value>,
}

impl ToolArguments {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }

    /// Deserialize into a handler's argument struct
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(Value::Object(self.values.clone())).map_err(|e| {
            McpError::InvalidArguments {
                message: e.to_string(),
            }
            .into()
        })
    }
}

/// Validate `arguments` against `schema`
///
/// Every missing required field is reported at once. Type errors are reported
/// for the first offending field.
pub fn validate(
    schema: &Value,
    arguments: &Map<String, Value>,
) -> std::result::Result<ToolArguments, ValidationError> {
    let values = validate_object(schema, arguments, "")?;
    Ok(ToolArguments { values })
}

fn validate_object(
    schema: &Value,
    object: &Map<String, Value>,
    path: &str,
) -> std::result::Result<Map<String, Value>, ValidationError> {
    let missing: Vec<String> = schema
        .get("required")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .filter(|name| object.get(*name).map_or(true, Value::is_null))
        .map(|name| join_path(path, name))
        .collect();

    if !missing.is_empty() {
        return Err(ValidationError::MissingFields { fields: missing });
    }

    let mut validated = object.clone();

    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Ok(validated);
    };

    for (name, property) in properties {
        match object.get(name) {
            Some(value) if !value.is_null() => {
                let checked = validate_value(property, value, &join_path(path, name))?;
                validated.insert(name.clone(), checked);
            }
            _ => {
                validated.remove(name);
                if let Some(default) = property.get("default") {
                    validated.insert(name.clone(), default.clone());
                }
            }
        }
    }

    Ok(validated)
}

fn validate_value(
    schema: &Value,
    value: &Value,
    path: &str,
) -> std::result::Result<Value, ValidationError> {
    let Some(expected) = schema.get("type").and_then(Value::as_str) else {
        return Ok(value.clone());
    };

    let checked = match expected {
        "string" => {
            if !value.is_string() {
                return Err(type_mismatch(path, expected, value));
            }
            value.clone()
        }
        "integer" => {
            let Some(number) = value
                .as_i64()
                .or_else(|| value.as_u64().map(|_| i64::MAX))
            else {
                return Err(type_mismatch(path, expected, value));
            };
            Value::from(clamp_integer(schema, number, path))
        }
        "number" => {
            let Some(number) = value.as_f64() else {
                return Err(type_mismatch(path, expected, value));
            };
            clamp_number(schema, number, value, path)
        }
        "boolean" => {
            if !value.is_boolean() {
                return Err(type_mismatch(path, expected, value));
            }
            value.clone()
        }
        "array" => {
            let Some(items) = value.as_array() else {
                return Err(type_mismatch(path, expected, value));
            };
            match schema.get("items") {
                Some(item_schema) => Value::Array(
                    items
                        .iter()
                        .enumerate()
                        .map(|(i, item)| validate_value(item_schema, item, &format!("{}[{}]", path, i)))
                        .collect::<std::result::Result<Vec<_>, _>>()?,
                ),
                None => value.clone(),
            }
        }
        "object" => {
            let Some(object) = value.as_object() else {
                return Err(type_mismatch(path, expected, value));
            };
            Value::Object(validate_object(schema, object, path)?)
        }
        _ => value.clone(),
    };

    check_enum(schema, &checked, path)?;
    Ok(checked)
}

fn check_enum(schema: &Value, value: &Value, path: &str) -> std::result::Result<(), ValidationError> {
    let Some(allowed) = schema.get("enum").and_then(Value::as_array) else {
        return Ok(());
    };

    if allowed.contains(value) {
        return Ok(());
    }

    let choices: Vec<String> = allowed.iter().map(Value::to_string).collect();
    Err(ValidationError::InvalidValue {
        field: path.to_string(),
        message: format!("must be one of {}", choices.join(", ")),
    })
}

fn clamp_integer(schema: &Value, number: i64, path: &str) -> i64 {
    let mut clamped = number;
    if let Some(min) = schema.get("minimum").and_then(Value::as_i64) {
        clamped = clamped.max(min);
    }
    if let Some(max) = schema.get("maximum").and_then(Value::as_i64) {
        clamped = clamped.min(max);
    }
    if clamped != number {
        tracing::debug!("Clamped {} from {} to {}", path, number, clamped);
    }
    clamped
}

fn clamp_number(schema: &Value, number: f64, original: &Value, path: &str) -> Value {
    let mut clamped = number;
    if let Some(min) = schema.get("minimum").and_then(Value::as_f64) {
        clamped = clamped.max(min);
    }
    if let Some(max) = schema.get("maximum").and_then(Value::as_f64) {
        clamped = clamped.min(max);
    }
    if clamped == number {
        return original.clone();
    }
    tracing::debug!("Clamped {} from {} to {}", path, number, clamped);
    serde_json::Number::from_f64(clamped).map_or_else(|| original.clone(), Value::Number)
}

fn type_mismatch(path: &str, expected: &str, value: &Value) -> ValidationError {
    ValidationError::TypeMismatch {
        field: path.to_string(),
        expected: expected.to_string(),
        actual: json_type_name(value).to_string(),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", parent, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn events_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "__user_id__": {"type": "string"},
                "max_results": {"type": "integer", "minimum": 1, "maximum": 2500, "default": 250},
                "show_deleted": {"type": "boolean", "default": false},
                "query": {"type": "string"}
            },
            "required": ["__user_id__"]
        })
    }

    #[test]
    fn test_reports_every_missing_field() {
        let schema = json!({
            "type": "object",
            "properties": {
                "to": {"type": "string"},
                "subject": {"type": "string"},
                "body": {"type": "string"}
            },
            "required": ["to", "subject", "body"]
        });

        let err = validate(&schema, &args(json!({"subject": "hi", "body": null}))).unwrap_err();
        assert_eq!(
            err,
            ValidationError::MissingFields {
                fields: vec!["to".to_string(), "body".to_string()]
            }
        );
    }

    #[test]
    fn test_fills_defaults() {
        let validated = validate(&events_schema(), &args(json!({"__user_id__": "a@x.com"}))).unwrap();
        assert_eq!(validated.get("max_results"), Some(&json!(250)));
        assert_eq!(validated.get("show_deleted"), Some(&json!(false)));
        assert!(validated.get("query").is_none());
    }

    #[test]
    fn test_clamps_out_of_range_integers() {
        let low = validate(
            &events_schema(),
            &args(json!({"__user_id__": "a@x.com", "max_results": 0})),
        )
        .unwrap();
        assert_eq!(low.get("max_results"), Some(&json!(1)));

        let high = validate(
            &events_schema(),
            &args(json!({"__user_id__": "a@x.com", "max_results": 10000})),
        )
        .unwrap();
        assert_eq!(high.get("max_results"), Some(&json!(2500)));
    }

    #[test]
    fn test_rejects_wrong_type() {
        let err = validate(
            &events_schema(),
            &args(json!({"__user_id__": "a@x.com", "max_results": "ten"})),
        )
        .unwrap_err();
        assert_eq!(
            err,
            ValidationError::TypeMismatch {
                field: "max_results".to_string(),
                expected: "integer".to_string(),
                actual: "string".to_string(),
            }
        );
    }

    #[test]
    fn test_nested_array_items_report_path() {
        let schema = json!({
            "type": "object",
            "properties": {
                "attachments": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "message_id": {"type": "string"},
                            "part_id": {"type": "string"}
                        },
                        "required": ["message_id", "part_id"]
                    }
                }
            },
            "required": ["attachments"]
        });

        let err = validate(
            &schema,
            &args(json!({"attachments": [
                {"message_id": "m1", "part_id": "1"},
                {"message_id": "m2"}
            ]})),
        )
        .unwrap_err();
        assert_eq!(
            err,
            ValidationError::MissingFields {
                fields: vec!["attachments[1].part_id".to_string()]
            }
        );
    }

    #[test]
    fn test_enum_rejects_unlisted_value() {
        let schema = json!({
            "type": "object",
            "properties": {"order": {"type": "string", "enum": ["asc", "desc"]}}
        });
        let err = validate(&schema, &args(json!({"order": "sideways"}))).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidValue { ref field, .. } if field == "order"));
    }

    #[test]
    fn test_parse_into_struct() {
        #[derive(Deserialize)]
        struct Args {
            max_results: u32,
            show_deleted: bool,
        }

        let validated = validate(&events_schema(), &args(json!({"__user_id__": "a@x.com"}))).unwrap();
        let parsed: Args = validated.parse().unwrap();
        assert_eq!(parsed.max_results, 250);
        assert!(!parsed.show_deleted);
    }
}
