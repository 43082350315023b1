//! Validation of tool input against the subset of JSON Schema the tools
//! declare: object root, `required`, `additionalProperties: false`, and per
//! property `type`, `enum` and `minLength`.

use serde_json::Value;

use crate::error::{Result, SwarmError};

pub fn validate(schema: &Value, input: &Value) -> Result<()> {
    let object = input
        .as_object()
        .ok_or_else(|| SwarmError::invalid("tool input must be a JSON object"))?;

    let empty = serde_json::Map::new();
    let properties = schema
        .get("properties")
        .and_then(|p| p.as_object())
        .unwrap_or(&empty);

    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for name in required.iter().filter_map(|n| n.as_str()) {
            match object.get(name) {
                None | Some(Value::Null) => {
                    return Err(SwarmError::invalid(format!(
                        "missing required parameter '{}'",
                        name
                    )));
                }
                Some(_) => {}
            }
        }
    }

    let closed = schema.get("additionalProperties") == Some(&Value::Bool(false));
    for (name, value) in object {
        match properties.get(name) {
            Some(property) => check_property(name, property, value)?,
            None if closed => {
                return Err(SwarmError::invalid(format!("unknown parameter '{}'", name)));
            }
            None => {}
        }
    }

    Ok(())
}

fn check_property(name: &str, property: &Value, value: &Value) -> Result<()> {
    // Optional parameters may be passed explicitly as null
    if value.is_null() {
        return Ok(());
    }

    if let Some(expected) = property.get("type").and_then(|t| t.as_str()) {
        let matches = match expected {
            "string" => value.is_string(),
            "integer" => value.is_i64() || value.is_u64(),
            "number" => value.is_number(),
            "boolean" => value.is_boolean(),
            "object" => value.is_object(),
            "array" => value.is_array(),
            _ => true,
        };
        if !matches {
            return Err(SwarmError::invalid(format!(
                "parameter '{}' must be of type {}, got {}",
                name,
                expected,
                type_name(value)
            )));
        }
    }

    if let Some(allowed) = property.get("enum").and_then(|e| e.as_array())
        && !allowed.contains(value)
    {
        let options: Vec<String> = allowed.iter().map(|v| v.to_string()).collect();
        return Err(SwarmError::invalid(format!(
            "parameter '{}' must be one of {}",
            name,
            options.join(", ")
        )));
    }

    if let (Some(min), Some(text)) = (
        property.get("minLength").and_then(|m| m.as_u64()),
        value.as_str(),
    ) && (text.trim().chars().count() as u64) < min
    {
        return Err(SwarmError::invalid(format!(
            "parameter '{}' must be at least {} characters",
            name, min
        )));
    }

    Ok(())
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
