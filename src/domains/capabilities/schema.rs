//! Parameter schema model and wire conversion.
//!
//! Capabilities describe their parameters as a typed `ParamSpec` tree.
//! The adapter converts that tree into a JSON-schema object for the MCP
//! `tools/list` response, enriching free-text descriptions with the
//! machine-readable constraints (enums, ranges, lengths) so the calling
//! model can self-correct without a failed round-trip.

use rmcp::model::JsonObject;
use serde_json::{Map, Value, json};
use std::sync::Arc;

// ============================================================================
// Schema Model
// ============================================================================

/// The parameter schema of a capability: an ordered set of typed fields.
#[derive(Debug, Clone, Default)]
pub struct ParamSpec {
    /// Field specs in declaration order.
    pub fields: Vec<FieldSpec>,
}

/// A single typed field with optionality, constraints and default.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    /// Field name as it appears in the arguments object.
    pub name: String,

    /// Human-readable description (constraints are appended on the wire).
    pub description: String,

    /// Type and type-specific constraints.
    pub kind: FieldKind,

    /// Whether the field must be present (after defaults are applied).
    pub required: bool,

    /// Default applied when the field is absent.
    pub default: Option<Value>,
}

/// Field type with per-type constraints.
#[derive(Debug, Clone)]
pub enum FieldKind {
    /// A string, optionally length-bounded and/or restricted to an enum.
    String {
        min_len: Option<usize>,
        max_len: Option<usize>,
        allowed: Option<Vec<String>>,
    },

    /// A whole number with optional inclusive bounds.
    Integer { min: Option<i64>, max: Option<i64> },

    /// A floating-point number with optional inclusive bounds.
    Number { min: Option<f64>, max: Option<f64> },

    /// A boolean flag.
    Boolean,

    /// A homogeneous array of the given element kind.
    Array(Box<FieldKind>),

    /// A nested object described by its own spec.
    Object(ParamSpec),
}

impl ParamSpec {
    /// An empty spec (capability takes no arguments).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builder: append a field.
    pub fn field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    /// Look up a field by name.
    pub fn get(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }
}

impl FieldSpec {
    /// A required field of the given kind.
    pub fn required(name: impl Into<String>, description: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            kind,
            required: true,
            default: None,
        }
    }

    /// An optional field of the given kind.
    pub fn optional(name: impl Into<String>, description: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            kind,
            required: false,
            default: None,
        }
    }

    /// Builder: set the default applied when the field is absent.
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

impl FieldKind {
    /// An unconstrained string.
    pub fn string() -> Self {
        Self::String {
            min_len: None,
            max_len: None,
            allowed: None,
        }
    }

    /// A length-bounded string.
    pub fn string_bounded(min_len: usize, max_len: usize) -> Self {
        Self::String {
            min_len: Some(min_len),
            max_len: Some(max_len),
            allowed: None,
        }
    }

    /// A string restricted to a fixed set of values.
    pub fn string_enum(allowed: &[&str]) -> Self {
        Self::String {
            min_len: None,
            max_len: None,
            allowed: Some(allowed.iter().map(|s| s.to_string()).collect()),
        }
    }

    /// An unconstrained integer.
    pub fn integer() -> Self {
        Self::Integer {
            min: None,
            max: None,
        }
    }

    /// An integer with inclusive bounds.
    pub fn integer_range(min: i64, max: i64) -> Self {
        Self::Integer {
            min: Some(min),
            max: Some(max),
        }
    }

    /// JSON-schema type name for this kind.
    fn type_name(&self) -> &'static str {
        match self {
            Self::String { .. } => "string",
            Self::Integer { .. } => "integer",
            Self::Number { .. } => "number",
            Self::Boolean => "boolean",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
        }
    }
}

// ============================================================================
// Wire Conversion
// ============================================================================

/// Convert a `ParamSpec` into the MCP `inputSchema` object.
pub fn input_schema(spec: &ParamSpec) -> Arc<JsonObject> {
    Arc::new(schema_object(spec))
}

fn schema_object(spec: &ParamSpec) -> Map<String, Value> {
    let mut properties = Map::new();
    let mut required = Vec::new();

    for field in &spec.fields {
        properties.insert(field.name.clone(), field_schema(field));
        // Fields with a default are satisfiable without client input.
        if field.required && field.default.is_none() {
            required.push(Value::String(field.name.clone()));
        }
    }

    let mut schema = Map::new();
    schema.insert("type".to_string(), json!("object"));
    schema.insert("properties".to_string(), Value::Object(properties));
    if !required.is_empty() {
        schema.insert("required".to_string(), Value::Array(required));
    }
    schema
}

fn field_schema(field: &FieldSpec) -> Value {
    let mut prop = kind_schema(&field.kind);

    let description = enrich_description(&field.description, &field.kind);
    if let Value::Object(obj) = &mut prop {
        obj.insert("description".to_string(), json!(description));
        if let Some(default) = &field.default {
            obj.insert("default".to_string(), default.clone());
        }
    }

    prop
}

fn kind_schema(kind: &FieldKind) -> Value {
    let mut obj = Map::new();
    obj.insert("type".to_string(), json!(kind.type_name()));

    match kind {
        FieldKind::String {
            min_len,
            max_len,
            allowed,
        } => {
            if let Some(min) = min_len {
                obj.insert("minLength".to_string(), json!(min));
            }
            if let Some(max) = max_len {
                obj.insert("maxLength".to_string(), json!(max));
            }
            if let Some(values) = allowed {
                obj.insert("enum".to_string(), json!(values));
            }
        }
        FieldKind::Integer { min, max } => {
            if let Some(min) = min {
                obj.insert("minimum".to_string(), json!(min));
            }
            if let Some(max) = max {
                obj.insert("maximum".to_string(), json!(max));
            }
        }
        FieldKind::Number { min, max } => {
            if let Some(min) = min {
                obj.insert("minimum".to_string(), json!(min));
            }
            if let Some(max) = max {
                obj.insert("maximum".to_string(), json!(max));
            }
        }
        FieldKind::Boolean => {}
        FieldKind::Array(element) => {
            obj.insert("items".to_string(), kind_schema(element));
        }
        FieldKind::Object(spec) => {
            return Value::Object(schema_object(spec));
        }
    }

    Value::Object(obj)
}

/// Append the kind's constraints to the free-text description.
fn enrich_description(description: &str, kind: &FieldKind) -> String {
    let mut notes = Vec::new();

    match kind {
        FieldKind::String {
            min_len,
            max_len,
            allowed,
        } => {
            if let Some(values) = allowed {
                notes.push(format!("allowed: {}", values.join(", ")));
            }
            match (min_len, max_len) {
                (Some(min), Some(max)) => notes.push(format!("length {}..{}", min, max)),
                (Some(min), None) => notes.push(format!("min length {}", min)),
                (None, Some(max)) => notes.push(format!("max length {}", max)),
                (None, None) => {}
            }
        }
        FieldKind::Integer { min, max } => match (min, max) {
            (Some(min), Some(max)) => notes.push(format!("range {}..{}", min, max)),
            (Some(min), None) => notes.push(format!("minimum {}", min)),
            (None, Some(max)) => notes.push(format!("maximum {}", max)),
            (None, None) => {}
        },
        FieldKind::Number { min, max } => match (min, max) {
            (Some(min), Some(max)) => notes.push(format!("range {}..{}", min, max)),
            (Some(min), None) => notes.push(format!("minimum {}", min)),
            (None, Some(max)) => notes.push(format!("maximum {}", max)),
            (None, None) => {}
        },
        FieldKind::Boolean | FieldKind::Array(_) | FieldKind::Object(_) => {}
    }

    if notes.is_empty() {
        description.to_string()
    } else {
        format!("{} ({})", description, notes.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_spec() -> ParamSpec {
        ParamSpec::empty()
            .field(FieldSpec::required(
                "channel",
                "Delivery channel",
                FieldKind::string_enum(&["email", "sms"]),
            ))
            .field(FieldSpec::required(
                "count",
                "Number of items",
                FieldKind::integer_range(1, 10),
            ))
            .field(
                FieldSpec::optional("urgent", "Send immediately", FieldKind::Boolean)
                    .with_default(json!(false)),
            )
    }

    #[test]
    fn test_schema_structure() {
        let schema = input_schema(&sample_spec());
        assert_eq!(schema["type"], json!("object"));

        let props = schema["properties"].as_object().unwrap();
        assert_eq!(props["channel"]["type"], json!("string"));
        assert_eq!(props["channel"]["enum"], json!(["email", "sms"]));
        assert_eq!(props["count"]["minimum"], json!(1));
        assert_eq!(props["count"]["maximum"], json!(10));
        assert_eq!(props["urgent"]["default"], json!(false));

        let required = schema["required"].as_array().unwrap();
        assert!(required.contains(&json!("channel")));
        assert!(required.contains(&json!("count")));
        assert!(!required.contains(&json!("urgent")));
    }

    #[test]
    fn test_description_enrichment() {
        let schema = input_schema(&sample_spec());
        let props = schema["properties"].as_object().unwrap();

        let channel_desc = props["channel"]["description"].as_str().unwrap();
        assert!(channel_desc.contains("allowed: email, sms"));

        let count_desc = props["count"]["description"].as_str().unwrap();
        assert!(count_desc.contains("range 1..10"));
    }

    #[test]
    fn test_bounded_string_enrichment() {
        let spec = ParamSpec::empty().field(FieldSpec::required(
            "subject",
            "Message subject",
            FieldKind::string_bounded(1, 120),
        ));
        let schema = input_schema(&spec);
        let props = schema["properties"].as_object().unwrap();
        assert_eq!(props["subject"]["maxLength"], json!(120));
        assert!(
            props["subject"]["description"]
                .as_str()
                .unwrap()
                .contains("length 1..120")
        );
    }

    #[test]
    fn test_required_with_default_not_required_on_wire() {
        let spec = ParamSpec::empty().field(
            FieldSpec::required("limit", "Page size", FieldKind::integer_range(1, 100))
                .with_default(json!(25)),
        );
        let schema = input_schema(&spec);
        assert!(schema.get("required").is_none());
    }

    #[test]
    fn test_nested_array_schema() {
        let spec = ParamSpec::empty().field(FieldSpec::optional(
            "tags",
            "Labels to attach",
            FieldKind::Array(Box::new(FieldKind::string())),
        ));
        let schema = input_schema(&spec);
        let props = schema["properties"].as_object().unwrap();
        assert_eq!(props["tags"]["type"], json!("array"));
        assert_eq!(props["tags"]["items"]["type"], json!("string"));
    }
}
