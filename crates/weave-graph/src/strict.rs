//! Conversion between a tool's declared schema and the strict form sent to models.
//!
//! Strict mode needs every property listed in `required` and every object closed with
//! `additionalProperties: false`. Properties that were optional become nullable instead, and a
//! `null` the model sends for one of them is dropped again when the call comes back.

use serde_json::{json, Map, Value};
use weave_types::{Tool, ToolCallRequest, ToolParameter};

/// Strict version of `tool`
pub fn strictify_tool(tool: &Tool) -> Tool {
    let mut strict = tool.clone();
    strict.function.parameters = strictify_schema(&tool.function.parameters);
    strict.function.strict = Some(true);
    strict
}

/// Undo [`strictify_tool`] on the arguments of a finalized call
///
/// `original` is the tool as it was offered, before strictification.
pub fn unstrictify_tool_call(original: &Tool, request: &ToolCallRequest) -> ToolCallRequest {
    let schema = &original.function.parameters;
    let required = required_names(schema);

    let parameters = request
        .parameters
        .iter()
        .filter(|p| !is_dropped_null(&required, &p.parameter_name, &p.parameter_value))
        .map(|p| ToolParameter {
            parameter_name: p.parameter_name.clone(),
            parameter_value: unstrictify_value(
                property_schema(schema, &p.parameter_name),
                &p.parameter_value,
            ),
        })
        .collect();

    ToolCallRequest {
        tool_name: request.tool_name.clone(),
        parameters,
    }
}

fn strictify_schema(schema: &Value) -> Value {
    let Some(object) = schema.as_object() else {
        return schema.clone();
    };
    let mut strict = object.clone();

    if is_object_schema(object) {
        let required = required_names(schema);
        let mut properties = Map::new();
        if let Some(Value::Object(declared)) = object.get("properties") {
            for (name, property) in declared {
                let property = strictify_schema(property);
                let property = if required.contains(&name.as_str()) {
                    property
                } else {
                    make_nullable(property)
                };
                properties.insert(name.clone(), property);
            }
        }
        let all_names = properties.keys().cloned().map(Value::String).collect();
        strict.insert("properties".to_string(), Value::Object(properties));
        strict.insert("required".to_string(), Value::Array(all_names));
        strict.insert("additionalProperties".to_string(), Value::Bool(false));
    }

    if let Some(items) = object.get("items") {
        strict.insert("items".to_string(), strictify_schema(items));
    }
    for key in ["anyOf", "oneOf"] {
        if let Some(Value::Array(variants)) = object.get(key) {
            let variants = variants.iter().map(strictify_schema).collect();
            strict.insert(key.to_string(), Value::Array(variants));
        }
    }

    Value::Object(strict)
}

fn make_nullable(mut schema: Value) -> Value {
    let Some(object) = schema.as_object_mut() else {
        return schema;
    };

    if let Some(Value::Array(values)) = object.get_mut("enum") {
        if !values.contains(&Value::Null) {
            values.push(Value::Null);
        }
    }

    match object.get_mut("type") {
        Some(Value::String(kind)) if kind.as_str() != "null" => {
            let kind = std::mem::take(kind);
            object.insert("type".to_string(), json!([kind, "null"]));
            schema
        }
        Some(Value::String(_)) => schema,
        Some(Value::Array(kinds)) => {
            if !kinds.iter().any(|k| k == "null") {
                kinds.push(json!("null"));
            }
            schema
        }
        _ => json!({ "anyOf": [schema, { "type": "null" }] }),
    }
}

fn unstrictify_value(schema: Option<&Value>, value: &Value) -> Value {
    let Some(schema) = schema else {
        return value.clone();
    };

    match value {
        Value::Object(fields) if schema.get("properties").is_some() => {
            let required = required_names(schema);
            let cleaned = fields
                .iter()
                .filter(|(name, v)| !is_dropped_null(&required, name, v))
                .map(|(name, v)| {
                    let restored = unstrictify_value(property_schema(schema, name), v);
                    (name.clone(), restored)
                })
                .collect();
            Value::Object(cleaned)
        }
        Value::Array(items) => {
            let item_schema = schema.get("items");
            Value::Array(items.iter().map(|v| unstrictify_value(item_schema, v)).collect())
        }
        _ => value.clone(),
    }
}

/// A `null` for a property the original schema did not require stands for "not supplied"
fn is_dropped_null(required: &[&str], name: &str, value: &Value) -> bool {
    value.is_null() && !required.contains(&name)
}

fn is_object_schema(object: &Map<String, Value>) -> bool {
    object.get("type").and_then(Value::as_str) == Some("object")
        || object.contains_key("properties")
}

fn required_names(schema: &Value) -> Vec<&str> {
    schema
        .get("required")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

fn property_schema<'a>(schema: &'a Value, name: &str) -> Option<&'a Value> {
    schema.get("properties").and_then(|properties| properties.get(name))
}
