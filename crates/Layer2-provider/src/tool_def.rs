//! Tool definitions for LLM function calling
//!
//! A `ToolDef` is what the model sees: name, description and a JSON-schema
//! object describing the arguments. `validate_arguments` checks a model's
//! tool-call arguments against that schema before anything is executed.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Definition of a tool that can be called by the LLM
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDef {
    /// Tool name (should be unique)
    pub name: String,

    /// Human-readable description
    pub description: String,

    /// JSON Schema for parameters
    pub parameters: ToolParameters,
}

/// Parameters schema for a tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParameters {
    /// Type (usually "object")
    #[serde(rename = "type")]
    pub schema_type: String,

    /// Properties (parameter definitions)
    pub properties: Value,

    /// Required parameters
    #[serde(default)]
    pub required: Vec<String>,
}

impl ToolParameters {
    /// Full JSON schema object
    pub fn to_schema(&self) -> Value {
        json!({
            "type": self.schema_type,
            "properties": self.properties,
            "required": self.required
        })
    }
}

impl ToolDef {
    /// Create a new tool definition
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: ToolParameters {
                schema_type: "object".to_string(),
                properties: json!({}),
                required: vec![],
            },
        }
    }

    /// Add a string parameter
    pub fn with_string_param(
        self,
        name: impl Into<String>,
        description: impl Into<String>,
        required: bool,
    ) -> Self {
        let schema = json!({ "type": "string", "description": description.into() });
        self.with_param(name, schema, required)
    }

    /// Add an integer parameter
    pub fn with_integer_param(
        self,
        name: impl Into<String>,
        description: impl Into<String>,
        required: bool,
    ) -> Self {
        let schema = json!({ "type": "integer", "description": description.into() });
        self.with_param(name, schema, required)
    }

    /// Add a boolean parameter
    pub fn with_boolean_param(
        self,
        name: impl Into<String>,
        description: impl Into<String>,
        required: bool,
    ) -> Self {
        let schema = json!({ "type": "boolean", "description": description.into() });
        self.with_param(name, schema, required)
    }

    /// Add an enum parameter
    pub fn with_enum_param(
        self,
        name: impl Into<String>,
        description: impl Into<String>,
        values: Vec<&str>,
        required: bool,
    ) -> Self {
        let schema = json!({
            "type": "string",
            "description": description.into(),
            "enum": values
        });
        self.with_param(name, schema, required)
    }

    /// Add a custom parameter with full schema
    pub fn with_param(mut self, name: impl Into<String>, schema: Value, required: bool) -> Self {
        let name = name.into();

        if let Value::Object(ref mut props) = self.parameters.properties {
            props.insert(name.clone(), schema);
        }

        if required && !self.parameters.required.contains(&name) {
            self.parameters.required.push(name);
        }

        self
    }

    /// Check tool-call arguments against the declared schema.
    ///
    /// Arguments must be an object, every required key must be present and
    /// non-null, and every declared property that is present must match its
    /// declared primitive type (and enum, if any). Unknown keys are allowed.
    pub fn validate_arguments(&self, arguments: &Value) -> Result<(), String> {
        let args = arguments.as_object().ok_or_else(|| {
            format!(
                "arguments for '{}' must be a JSON object, got {}",
                self.name,
                type_name(arguments)
            )
        })?;

        for key in &self.parameters.required {
            match args.get(key) {
                None | Some(Value::Null) => {
                    return Err(format!(
                        "missing required argument '{}' for '{}'",
                        key, self.name
                    ))
                }
                Some(_) => {}
            }
        }

        let Some(props) = self.parameters.properties.as_object() else {
            return Ok(());
        };

        for (key, value) in args {
            let Some(schema) = props.get(key) else {
                continue;
            };
            if value.is_null() && !self.parameters.required.contains(key) {
                continue;
            }
            if let Some(expected) = schema.get("type").and_then(|t| t.as_str()) {
                if !matches_type(expected, value) {
                    return Err(format!(
                        "argument '{}' for '{}' must be {}, got {}",
                        key,
                        self.name,
                        expected,
                        type_name(value)
                    ));
                }
            }
            if let Some(allowed) = schema.get("enum").and_then(|e| e.as_array()) {
                if !allowed.contains(value) {
                    return Err(format!(
                        "argument '{}' for '{}' must be one of {}",
                        key,
                        self.name,
                        Value::Array(allowed.clone())
                    ));
                }
            }
        }

        Ok(())
    }
}

fn matches_type(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        _ => true,
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

    fn write_tool() -> ToolDef {
        ToolDef::new("file_write", "Write a file")
            .with_string_param("path", "Path", true)
            .with_string_param("content", "Content", true)
            .with_boolean_param("append", "Append instead of overwrite", false)
    }

    #[test]
    fn test_builder_collects_required() {
        let def = write_tool();
        assert_eq!(def.parameters.required, vec!["path", "content"]);
        let schema = def.parameters.to_schema();
        assert_eq!(schema["properties"]["append"]["type"], "boolean");
    }

    #[test]
    fn test_validate_ok() {
        let def = write_tool();
        assert!(def
            .validate_arguments(&json!({"path": "a.py", "content": "x", "extra": 1}))
            .is_ok());
    }

    #[test]
    fn test_validate_missing_required() {
        let err = write_tool()
            .validate_arguments(&json!({"path": "a.py"}))
            .unwrap_err();
        assert!(err.contains("content"));
    }

    #[test]
    fn test_validate_wrong_type() {
        let err = write_tool()
            .validate_arguments(&json!({"path": 3, "content": "x"}))
            .unwrap_err();
        assert!(err.contains("must be string"));
    }

    #[test]
    fn test_validate_not_object() {
        assert!(write_tool().validate_arguments(&Value::Null).is_err());
        assert!(write_tool().validate_arguments(&json!("path")).is_err());
    }

    #[test]
    fn test_validate_enum() {
        let def = ToolDef::new("tool_create", "")
            .with_enum_param("language", "Runtime", vec!["python", "node", "shell"], true);
        assert!(def.validate_arguments(&json!({"language": "node"})).is_ok());
        assert!(def.validate_arguments(&json!({"language": "ruby"})).is_err());
    }
}
