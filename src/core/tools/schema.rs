//! Tool schema dialects.
//!
//! Realtime and Gemini APIs take flat `{name, description, parameters}` objects;
//! OpenAI chat completions wrap the same fields as
//! `{type: "function", function: {...}}`. Definitions are stored flat and
//! rendered per provider.

use serde_json::{Value, json};
use thiserror::Error;

use super::ToolDefinition;

#[derive(Debug, Error, PartialEq)]
pub enum SchemaError {
    #[error("Tool definition is not an object")]
    NotAnObject,

    #[error("Tool definition is missing a name")]
    MissingName,
}

/// Wire shape of a tool definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolSchemaDialect {
    /// `{name, description, parameters}`
    Flat,
    /// `{type: "function", function: {name, description, parameters}}`
    Nested,
}

impl ToolSchemaDialect {
    /// Detect the dialect of a raw definition.
    pub fn detect(value: &Value) -> Option<Self> {
        if value.get("type").and_then(Value::as_str) == Some("function")
            && value.get("function").is_some_and(Value::is_object)
        {
            Some(ToolSchemaDialect::Nested)
        } else if value.get("name").is_some_and(Value::is_string) {
            Some(ToolSchemaDialect::Flat)
        } else {
            None
        }
    }
}

fn empty_parameters() -> Value {
    json!({"type": "object", "properties": {}})
}

impl ToolDefinition {
    /// Render in the given dialect.
    pub fn to_dialect(&self, dialect: ToolSchemaDialect) -> Value {
        let flat = json!({
            "name": self.name,
            "description": self.description,
            "parameters": self.parameters,
        });
        match dialect {
            ToolSchemaDialect::Flat => flat,
            ToolSchemaDialect::Nested => json!({"type": "function", "function": flat}),
        }
    }

    /// Parse a definition in either dialect.
    pub fn from_value(value: &Value) -> Result<Self, SchemaError> {
        let inner = match ToolSchemaDialect::detect(value) {
            Some(ToolSchemaDialect::Nested) => &value["function"],
            _ => value,
        };
        let object = inner.as_object().ok_or(SchemaError::NotAnObject)?;
        let name = object
            .get("name")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .ok_or(SchemaError::MissingName)?;
        let description = object
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let parameters = match object.get("parameters") {
            Some(Value::Null) | None => empty_parameters(),
            Some(p) => p.clone(),
        };
        Ok(ToolDefinition::new(name, description, parameters))
    }
}

/// Convert a raw definition to `target`. Already-conforming input is returned
/// unchanged.
pub fn normalize_value(value: &Value, target: ToolSchemaDialect) -> Result<Value, SchemaError> {
    if ToolSchemaDialect::detect(value) == Some(target) {
        return Ok(value.clone());
    }
    Ok(ToolDefinition::from_value(value)?.to_dialect(target))
}

/// Render a batch of definitions in one dialect.
pub fn render_all(definitions: &[ToolDefinition], dialect: ToolSchemaDialect) -> Vec<Value> {
    definitions.iter().map(|d| d.to_dialect(dialect)).collect()
}
