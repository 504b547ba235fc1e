//! Compatibility matching of test descriptors against device-type contracts.
//!
//! Compatibility fragments are small JSON Schema documents. A subset of the
//! validation keywords is evaluated. Annotation keywords are accepted and
//! ignored; any other keyword is rejected with [`SchemaError`] so a fragment
//! is never matched against constraints it could not check.

use serde_json::{Map, Value};
use thiserror::Error;

/// Raised when a schema is malformed or uses a keyword that cannot be
/// evaluated.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("invalid schema keyword '{keyword}': {message}")]
pub struct SchemaError {
    /// Keyword carrying the malformed value.
    pub keyword: String,
    /// Human-readable description of the problem.
    pub message: String,
}

impl SchemaError {
    fn new(keyword: &str, message: &str) -> Self {
        Self {
            keyword: keyword.to_owned(),
            message: message.to_owned(),
        }
    }
}

/// Returns whether `instance` satisfies `schema`.
///
/// # Errors
///
/// Returns [`SchemaError`] when the schema itself is malformed.
pub fn matches(schema: &Value, instance: &Value) -> Result<bool, SchemaError> {
    match schema {
        Value::Bool(accept) => Ok(*accept),
        Value::Object(keywords) => matches_object(keywords, instance),
        _ => Err(SchemaError::new("<root>", "schema must be an object or boolean")),
    }
}

/// Keywords that describe a schema without constraining instances.
const ANNOTATIONS: &[&str] = &[
    "$schema",
    "$id",
    "$comment",
    "title",
    "description",
    "default",
    "examples",
];

fn matches_object(keywords: &Map<String, Value>, instance: &Value) -> Result<bool, SchemaError> {
    for (keyword, value) in keywords {
        let holds = match keyword.as_str() {
            "type" => matches_type(value, instance)?,
            "const" => value == instance,
            "enum" => as_array(keyword, value)?.contains(instance),
            "required" => matches_required(value, instance)?,
            "properties" => matches_properties(value, instance)?,
            "items" => matches_items(value, instance)?,
            "contains" => matches_contains(value, instance)?,
            "minimum" => compare(keyword, value, instance, |actual, bound| actual >= bound)?,
            "maximum" => compare(keyword, value, instance, |actual, bound| actual <= bound)?,
            "minItems" => instance.as_array().map_or(Ok(true), |items| {
                bounded(keyword, value, items.len(), |len, limit| len >= limit)
            })?,
            "maxItems" => instance.as_array().map_or(Ok(true), |items| {
                bounded(keyword, value, items.len(), |len, limit| len <= limit)
            })?,
            "minLength" => instance.as_str().map_or(Ok(true), |text| {
                bounded(keyword, value, text.chars().count(), |len, limit| len >= limit)
            })?,
            "maxLength" => instance.as_str().map_or(Ok(true), |text| {
                bounded(keyword, value, text.chars().count(), |len, limit| len <= limit)
            })?,
            "not" => !matches(value, instance)?,
            "allOf" => count_matching(keyword, value, instance)? == as_array(keyword, value)?.len(),
            "anyOf" => count_matching(keyword, value, instance)? > 0,
            "oneOf" => count_matching(keyword, value, instance)? == 1,
            other if ANNOTATIONS.contains(&other) => true,
            other => return Err(SchemaError::new(other, "unsupported keyword")),
        };
        if !holds {
            return Ok(false);
        }
    }
    Ok(true)
}

fn as_array<'a>(keyword: &str, value: &'a Value) -> Result<&'a Vec<Value>, SchemaError> {
    value
        .as_array()
        .ok_or_else(|| SchemaError::new(keyword, "expected an array"))
}

fn count_matching(keyword: &str, value: &Value, instance: &Value) -> Result<usize, SchemaError> {
    let mut count = 0;
    for schema in as_array(keyword, value)? {
        if matches(schema, instance)? {
            count += 1;
        }
    }
    Ok(count)
}

fn matches_type(value: &Value, instance: &Value) -> Result<bool, SchemaError> {
    match value {
        Value::String(name) => type_holds(name, instance),
        Value::Array(names) => {
            for entry in names {
                let Some(name) = entry.as_str() else {
                    return Err(SchemaError::new("type", "type names must be strings"));
                };
                if type_holds(name, instance)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        _ => Err(SchemaError::new("type", "expected a string or array")),
    }
}

fn type_holds(name: &str, instance: &Value) -> Result<bool, SchemaError> {
    Ok(match name {
        "null" => instance.is_null(),
        "boolean" => instance.is_boolean(),
        "object" => instance.is_object(),
        "array" => instance.is_array(),
        "string" => instance.is_string(),
        "number" => instance.is_number(),
        "integer" => instance.is_i64() || instance.is_u64(),
        _ => return Err(SchemaError::new("type", "unknown type name")),
    })
}

fn matches_required(value: &Value, instance: &Value) -> Result<bool, SchemaError> {
    let names = as_array("required", value)?;
    let Some(object) = instance.as_object() else {
        return Ok(true);
    };
    for entry in names {
        let Some(name) = entry.as_str() else {
            return Err(SchemaError::new("required", "property names must be strings"));
        };
        if !object.contains_key(name) {
            return Ok(false);
        }
    }
    Ok(true)
}

fn matches_properties(value: &Value, instance: &Value) -> Result<bool, SchemaError> {
    let Some(properties) = value.as_object() else {
        return Err(SchemaError::new("properties", "expected an object"));
    };
    let Some(object) = instance.as_object() else {
        return Ok(true);
    };
    for (name, schema) in properties {
        if let Some(property) = object.get(name)
            && !matches(schema, property)?
        {
            return Ok(false);
        }
    }
    Ok(true)
}

fn matches_items(value: &Value, instance: &Value) -> Result<bool, SchemaError> {
    let Some(items) = instance.as_array() else {
        return Ok(true);
    };
    for item in items {
        if !matches(value, item)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn matches_contains(value: &Value, instance: &Value) -> Result<bool, SchemaError> {
    let Some(items) = instance.as_array() else {
        return Ok(true);
    };
    for item in items {
        if matches(value, item)? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn compare(
    keyword: &str,
    value: &Value,
    instance: &Value,
    holds: impl Fn(f64, f64) -> bool,
) -> Result<bool, SchemaError> {
    let Some(bound) = value.as_f64() else {
        return Err(SchemaError::new(keyword, "expected a number"));
    };
    Ok(instance.as_f64().is_none_or(|actual| holds(actual, bound)))
}

fn bounded(
    keyword: &str,
    value: &Value,
    len: usize,
    holds: impl Fn(usize, usize) -> bool,
) -> Result<bool, SchemaError> {
    let Some(limit) = value.as_u64() else {
        return Err(SchemaError::new(keyword, "expected a non-negative integer"));
    };
    Ok(holds(len, usize::try_from(limit).unwrap_or(usize::MAX)))
}
