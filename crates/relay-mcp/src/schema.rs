//! Argument validation against a tool's declared input schema.
//!
//! Covers the JSON-Schema subset tool workers declare in practice: `type`
//! (single or list), `properties`, `required`, `enum`, `items` and
//! `additionalProperties: false`, recursively. Other keywords are ignored.

use serde_json::Value;

/// Check `args` against `schema`, returning the first violation found.
///
/// `null` arguments are treated as an empty object, matching how models omit
/// arguments for parameterless tools.
pub fn validate_arguments(schema: &Value, args: &Value) -> Result<(), String> {
    let empty = Value::Object(Default::default());
    let args = if args.is_null() { &empty } else { args };
    validate_at(schema, args, "")
}

fn validate_at(schema: &Value, value: &Value, path: &str) -> Result<(), String> {
    let Some(schema) = schema.as_object() else {
        // `true` or a malformed schema accepts anything
        return Ok(());
    };

    if let Some(expected) = schema.get("type") {
        let allowed: Vec<&str> = match expected {
            Value::String(t) => vec![t.as_str()],
            Value::Array(ts) => ts.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        };
        if !allowed.is_empty() && !allowed.iter().any(|t| matches_type(t, value)) {
            return Err(format!(
                "{}: expected {}, got {}",
                display_path(path),
                allowed.join(" or "),
                type_name(value)
            ));
        }
    }

    if let Some(Value::Array(choices)) = schema.get("enum") {
        if !choices.contains(value) {
            let listed: Vec<String> = choices.iter().map(Value::to_string).collect();
            return Err(format!(
                "{}: must be one of {}",
                display_path(path),
                listed.join(", ")
            ));
        }
    }

    match value {
        Value::Object(map) => {
            if let Some(Value::Array(required)) = schema.get("required") {
                for key in required.iter().filter_map(Value::as_str) {
                    if !map.contains_key(key) {
                        return Err(format!("missing required field '{}'", join(path, key)));
                    }
                }
            }

            let properties = schema.get("properties").and_then(Value::as_object);
            let closed = schema.get("additionalProperties") == Some(&Value::Bool(false));
            for (key, field) in map {
                match properties.and_then(|p| p.get(key)) {
                    Some(field_schema) => validate_at(field_schema, field, &join(path, key))?,
                    None if closed => {
                        return Err(format!("unexpected field '{}'", join(path, key)));
                    }
                    None => {}
                }
            }
        }
        Value::Array(items) => {
            if let Some(item_schema) = schema.get("items") {
                for (i, item) in items.iter().enumerate() {
                    validate_at(item_schema, item, &format!("{path}[{i}]"))?;
                }
            }
        }
        _ => {}
    }

    Ok(())
}

fn matches_type(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64() || is_integral_float(value),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        // Unknown type names are not ours to enforce
        _ => true,
    }
}

fn is_integral_float(value: &Value) -> bool {
    value.as_f64().is_some_and(|f| f.fract() == 0.0)
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

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

fn display_path(path: &str) -> &str {
    if path.is_empty() { "arguments" } else { path }
}
