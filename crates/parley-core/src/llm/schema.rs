//! Output schema normalisation
//!
//! Callers may describe a structured answer either with a JSON schema or with
//! a shorthand "natural" schema such as
//! `{"name": "string", "tags": ["string"], "address": {"city": "string"}}`.
//! Both are reduced to a plain JSON schema that vendor validators accept.

use serde_json::{json, Map, Value};

use crate::errors::LlmError;

const JSON_TYPES: [&str; 7] = [
    "string", "number", "integer", "boolean", "object", "array", "null",
];

const SCHEMA_KEYWORDS: [&str; 22] = [
    "$schema",
    "$id",
    "$ref",
    "$defs",
    "definitions",
    "type",
    "title",
    "description",
    "properties",
    "required",
    "additionalProperties",
    "items",
    "enum",
    "const",
    "anyOf",
    "oneOf",
    "allOf",
    "format",
    "minimum",
    "maximum",
    "minItems",
    "maxItems",
];

/// Returns true when `value` already reads as a JSON schema rather than a
/// natural schema.
pub fn is_json_schema(value: &Value) -> bool {
    let Some(map) = value.as_object() else {
        return false;
    };
    if ["$schema", "properties", "$ref", "anyOf", "oneOf", "allOf"]
        .iter()
        .any(|k| map.contains_key(*k))
    {
        return true;
    }
    match map.get("type") {
        Some(Value::String(t)) if JSON_TYPES.contains(&t.as_str()) => map
            .keys()
            .all(|k| SCHEMA_KEYWORDS.contains(&k.as_str())),
        _ => false,
    }
}

/// Normalises a JSON or natural schema into a JSON schema without `$schema`.
pub fn normalize_output_schema(schema: &Value) -> Result<Value, LlmError> {
    let mut normalized = if is_json_schema(schema) {
        schema.clone()
    } else {
        expand_natural(schema)?
    };
    strip_keys(&mut normalized, &["$schema"]);
    Ok(normalized)
}

/// Removes the given keywords at any depth. Property names under
/// `properties` are user fields, not keywords, and are kept.
pub fn strip_keys(value: &mut Value, keys: &[&str]) {
    match value {
        Value::Object(map) => {
            for key in keys {
                map.remove(*key);
            }
            for (name, child) in map.iter_mut() {
                match (name.as_str(), child) {
                    ("properties", Value::Object(properties)) => {
                        for property in properties.values_mut() {
                            strip_keys(property, keys);
                        }
                    }
                    (_, child) => strip_keys(child, keys),
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                strip_keys(item, keys);
            }
        }
        _ => {}
    }
}

fn expand_natural(value: &Value) -> Result<Value, LlmError> {
    match value {
        Value::String(name) => expand_type_name(name),
        Value::Array(items) => match items.as_slice() {
            [item] => Ok(json!({ "type": "array", "items": expand_natural(item)? })),
            [] => Ok(json!({ "type": "array" })),
            _ => Err(LlmError::Config(
                "Natural schema arrays must contain exactly one item schema".to_string(),
            )),
        },
        Value::Object(map) if is_json_schema(value) => Ok(Value::Object(map.clone())),
        Value::Object(map) => {
            let mut properties = Map::new();
            let mut required = Vec::with_capacity(map.len());
            for (key, child) in map {
                properties.insert(key.clone(), expand_natural(child)?);
                required.push(Value::String(key.clone()));
            }
            Ok(json!({
                "type": "object",
                "properties": properties,
                "required": required,
                "additionalProperties": false,
            }))
        }
        other => Err(LlmError::Config(format!(
            "Unsupported value in natural schema: {}",
            other
        ))),
    }
}

fn expand_type_name(name: &str) -> Result<Value, LlmError> {
    let normalized = name.trim().to_ascii_lowercase();
    match normalized.as_str() {
        "string" | "number" | "integer" | "boolean" | "null" => Ok(json!({ "type": normalized })),
        "object" => Ok(json!({ "type": "object" })),
        "array" => Ok(json!({ "type": "array" })),
        "float" | "double" => Ok(json!({ "type": "number" })),
        "int" => Ok(json!({ "type": "integer" })),
        "bool" => Ok(json!({ "type": "boolean" })),
        _ => Err(LlmError::Config(format!(
            "Unknown type '{}' in natural schema",
            name
        ))),
    }
}
