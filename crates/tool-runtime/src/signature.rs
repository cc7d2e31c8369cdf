//! Local argument signatures derived from a tool's JSON Schema.
//!
//! Only the top level of `input_schema` is mapped: every entry in
//! `properties` becomes one named parameter, `required` decides whether it is
//! mandatory, and the JSON Schema primitive type picks the closest local type.
//! Nested schemas are not interpreted; their values pass through untouched.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tool::ToolError;

/// Local type a parameter maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    /// Map a JSON Schema `type` name. Unknown names fall back to `String`.
    pub fn from_schema_type(name: &str) -> Self {
        match name {
            "integer" => ParamType::Integer,
            "number" => ParamType::Number,
            "boolean" => ParamType::Boolean,
            "array" => ParamType::Array,
            "object" => ParamType::Object,
            _ => ParamType::String,
        }
    }

    /// Read the type of a property schema. Accepts `"type": "x"` and the
    /// nullable form `"type": ["x", "null"]`.
    pub fn from_property(schema: &Value) -> Self {
        match schema.get("type") {
            Some(Value::String(name)) => Self::from_schema_type(name),
            Some(Value::Array(names)) => names
                .iter()
                .filter_map(Value::as_str)
                .find(|n| *n != "null")
                .map(Self::from_schema_type)
                .unwrap_or(ParamType::String),
            _ => ParamType::String,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "a string",
            ParamType::Integer => "an integer",
            ParamType::Number => "a number",
            ParamType::Boolean => "a boolean",
            ParamType::Array => "an array",
            ParamType::Object => "an object",
        }
    }

    /// Whether `value` is acceptable for this type.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Number => value.is_number(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Array => value.is_array(),
            ParamType::Object => value.is_object(),
        }
    }
}

/// One named argument of a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    pub param_type: ParamType,
    /// Mandatory when listed in the schema's `required`; optional
    /// parameters carry no default.
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Argument list of a tool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolSignature {
    pub parameters: Vec<ToolParameter>,
}

impl ToolSignature {
    /// Derive a signature from a JSON Schema object.
    pub fn from_input_schema(schema: &Value) -> Self {
        let required: Vec<&str> = schema
            .get("required")
            .and_then(Value::as_array)
            .map(|names| names.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let parameters = schema
            .get("properties")
            .and_then(Value::as_object)
            .map(|props| {
                props
                    .iter()
                    .map(|(name, prop)| ToolParameter {
                        name: name.clone(),
                        param_type: ParamType::from_property(prop),
                        required: required.contains(&name.as_str()),
                        description: prop
                            .get("description")
                            .and_then(Value::as_str)
                            .map(str::to_string),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self { parameters }
    }

    pub fn get(&self, name: &str) -> Option<&ToolParameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn required(&self) -> impl Iterator<Item = &ToolParameter> {
        self.parameters.iter().filter(|p| p.required)
    }

    /// Check supplied arguments against the signature.
    ///
    /// `null` stands for "no arguments". Arguments not named in the
    /// signature are allowed and forwarded as-is.
    pub fn check(&self, arguments: &Value) -> Result<(), ToolError> {
        let empty = serde_json::Map::new();
        let args = match arguments {
            Value::Null => &empty,
            Value::Object(map) => map,
            _ => {
                return Err(ToolError::InvalidInput(
                    "arguments must be a JSON object".to_string(),
                ))
            }
        };

        for param in self.required() {
            if args.get(&param.name).map_or(true, Value::is_null) {
                return Err(ToolError::MissingArgument(param.name.clone()));
            }
        }

        for (name, value) in args {
            let Some(param) = self.get(name) else { continue };
            if value.is_null() && !param.required {
                continue;
            }
            if !param.param_type.accepts(value) {
                return Err(ToolError::WrongType {
                    name: name.clone(),
                    expected: param.param_type.as_str(),
                });
            }
        }

        Ok(())
    }
}
