//! Argument validation and normalization.
//!
//! Validates raw call arguments against a capability's `ParamSpec` before
//! execution: required-field presence, type coercion (numeric strings to
//! numbers, JSON-encoded strings to arrays/objects), enum membership and
//! numeric/length bounds. All violations are collected and returned
//! together so the caller can correct in a single round-trip. Pure:
//! no side effects, the raw input is never mutated.

use rmcp::model::JsonObject;
use serde_json::Value;
use std::fmt;

use super::schema::{FieldKind, ParamSpec};

/// A single validation violation, naming the offending field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Dotted path of the field (e.g. `filters.count`).
    pub field: String,

    /// What constraint was violated.
    pub message: String,
}

impl Violation {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate raw arguments against a spec.
///
/// On success returns the normalized argument object: defaults applied,
/// coercions performed, unknown fields dropped. On failure returns every
/// violation found.
pub fn validate(spec: &ParamSpec, raw: &JsonObject) -> Result<JsonObject, Vec<Violation>> {
    let mut normalized = JsonObject::new();
    let mut violations = Vec::new();

    for field in &spec.fields {
        match raw.get(&field.name) {
            Some(Value::Null) | None => {
                if let Some(default) = &field.default {
                    normalized.insert(field.name.clone(), default.clone());
                } else if field.required {
                    violations.push(Violation::new(&field.name, "required field is missing"));
                }
            }
            Some(value) => match normalize_value(&field.name, value, &field.kind) {
                Ok(value) => {
                    normalized.insert(field.name.clone(), value);
                }
                Err(mut errs) => violations.append(&mut errs),
            },
        }
    }

    if violations.is_empty() {
        Ok(normalized)
    } else {
        Err(violations)
    }
}

/// Coerce and check a single value against a field kind.
fn normalize_value(path: &str, value: &Value, kind: &FieldKind) -> Result<Value, Vec<Violation>> {
    match kind {
        FieldKind::String {
            min_len,
            max_len,
            allowed,
        } => {
            let s = match value {
                Value::String(s) => s.clone(),
                other => {
                    return Err(vec![Violation::new(
                        path,
                        format!("expected a string, got {}", type_of(other)),
                    )]);
                }
            };

            let mut violations = Vec::new();
            if let Some(min) = min_len {
                if s.chars().count() < *min {
                    violations.push(Violation::new(
                        path,
                        format!("length {} is below minimum {}", s.chars().count(), min),
                    ));
                }
            }
            if let Some(max) = max_len {
                if s.chars().count() > *max {
                    violations.push(Violation::new(
                        path,
                        format!("length {} exceeds maximum {}", s.chars().count(), max),
                    ));
                }
            }
            if let Some(values) = allowed {
                if !values.iter().any(|v| v == &s) {
                    violations.push(Violation::new(
                        path,
                        format!("'{}' is not one of: {}", s, values.join(", ")),
                    ));
                }
            }

            if violations.is_empty() {
                Ok(Value::String(s))
            } else {
                Err(violations)
            }
        }

        FieldKind::Integer { min, max } => {
            let n = match value {
                Value::Number(n) if n.is_i64() || n.is_u64() => n.as_i64(),
                // Numeric strings coerce to integers.
                Value::String(s) => s.trim().parse::<i64>().ok(),
                _ => None,
            };

            let Some(n) = n else {
                return Err(vec![Violation::new(
                    path,
                    format!("expected an integer, got {}", type_of(value)),
                )]);
            };

            if let Some(min) = min {
                if n < *min {
                    return Err(vec![Violation::new(
                        path,
                        format!("{} is below minimum {}", n, min),
                    )]);
                }
            }
            if let Some(max) = max {
                if n > *max {
                    return Err(vec![Violation::new(
                        path,
                        format!("{} exceeds maximum {}", n, max),
                    )]);
                }
            }
            Ok(Value::from(n))
        }

        FieldKind::Number { min, max } => {
            let n = match value {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            };

            let Some(n) = n else {
                return Err(vec![Violation::new(
                    path,
                    format!("expected a number, got {}", type_of(value)),
                )]);
            };

            if let Some(min) = min {
                if n < *min {
                    return Err(vec![Violation::new(
                        path,
                        format!("{} is below minimum {}", n, min),
                    )]);
                }
            }
            if let Some(max) = max {
                if n > *max {
                    return Err(vec![Violation::new(
                        path,
                        format!("{} exceeds maximum {}", n, max),
                    )]);
                }
            }
            Ok(Value::from(n))
        }

        FieldKind::Boolean => match value {
            Value::Bool(b) => Ok(Value::Bool(*b)),
            Value::String(s) if s == "true" || s == "false" => Ok(Value::Bool(s == "true")),
            other => Err(vec![Violation::new(
                path,
                format!("expected a boolean, got {}", type_of(other)),
            )]),
        },

        FieldKind::Array(element) => {
            // JSON-encoded strings coerce to arrays.
            let items = match decode_structured(value) {
                Some(Value::Array(items)) => items,
                Some(other) => {
                    return Err(vec![Violation::new(
                        path,
                        format!("expected an array, got {}", type_of(&other)),
                    )]);
                }
                None => {
                    return Err(vec![Violation::new(
                        path,
                        format!("expected an array, got {}", type_of(value)),
                    )]);
                }
            };

            let mut normalized = Vec::with_capacity(items.len());
            let mut violations = Vec::new();
            for (i, item) in items.iter().enumerate() {
                match normalize_value(&format!("{}[{}]", path, i), item, element) {
                    Ok(v) => normalized.push(v),
                    Err(mut errs) => violations.append(&mut errs),
                }
            }

            if violations.is_empty() {
                Ok(Value::Array(normalized))
            } else {
                Err(violations)
            }
        }

        FieldKind::Object(spec) => {
            // JSON-encoded strings coerce to objects.
            let object = match decode_structured(value) {
                Some(Value::Object(obj)) => obj,
                Some(other) => {
                    return Err(vec![Violation::new(
                        path,
                        format!("expected an object, got {}", type_of(&other)),
                    )]);
                }
                None => {
                    return Err(vec![Violation::new(
                        path,
                        format!("expected an object, got {}", type_of(value)),
                    )]);
                }
            };

            match validate(spec, &object) {
                Ok(normalized) => Ok(Value::Object(normalized)),
                Err(nested) => Err(nested
                    .into_iter()
                    .map(|v| Violation::new(format!("{}.{}", path, v.field), v.message))
                    .collect()),
            }
        }
    }
}

/// Decode a JSON-encoded string to its structured value; structured values
/// pass through unchanged.
fn decode_structured(value: &Value) -> Option<Value> {
    match value {
        Value::Array(_) | Value::Object(_) => Some(value.clone()),
        Value::String(s) => serde_json::from_str::<Value>(s).ok(),
        _ => None,
    }
}

fn type_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
