//! Tool parameter schemas and their conversion to and from a tool server's `inputSchema`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use stepwise_llm::ToolDefinition;

use crate::McpError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SchemaType {
    Single(String),
    Union(Vec<String>),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AdditionalProperties {
    Allowed(bool),
    Schema(Box<ParameterSchema>),
}

/// The JSON-schema subset tool parameters use. Keywords outside the modeled set are kept in
/// `extra` so conversion never drops constraints such as `minimum` or `format`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterSchema {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub schema_type: Option<SchemaType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, ParameterSchema>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<ParameterSchema>>,
    #[serde(
        rename = "additionalProperties",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub additional_properties: Option<AdditionalProperties>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nullable: Option<bool>,
    #[serde(rename = "$ref", default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(rename = "$defs", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub definitions: BTreeMap<String, ParameterSchema>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ParameterSchema {
    pub fn object() -> Self {
        Self {
            schema_type: Some(SchemaType::Single("object".to_string())),
            ..Self::default()
        }
    }

    pub fn is_object(&self) -> bool {
        matches!(&self.schema_type, Some(SchemaType::Single(kind)) if kind == "object")
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| json!({ "type": "object" }))
    }
}

/// Reads a tool server's `inputSchema`. A missing or null schema means "no parameters".
pub fn from_tool_server_schema(input_schema: &Value) -> Result<ParameterSchema, McpError> {
    if input_schema.is_null() {
        return Ok(ParameterSchema::object());
    }
    let mut schema: ParameterSchema = serde_json::from_value(input_schema.clone())
        .map_err(|error| McpError::Protocol(format!("invalid tool input schema: {error}")))?;
    if schema.schema_type.is_none() {
        schema.schema_type = Some(SchemaType::Single("object".to_string()));
    }
    if !schema.is_object() {
        return Err(McpError::Protocol(
            "tool input schema must describe an object".to_string(),
        ));
    }
    Ok(schema)
}

/// Produces a tool server's `inputSchema`; the root is always an object schema.
pub fn to_tool_server_schema(schema: &ParameterSchema) -> Value {
    let mut root = schema.clone();
    if root.schema_type.is_none() {
        root.schema_type = Some(SchemaType::Single("object".to_string()));
    }
    root.to_value()
}

/// Tool definition in the model-facing shape, built from a tool server's listing entry.
pub fn definition_from_tool_server(
    name: &str,
    description: Option<&str>,
    input_schema: &Value,
) -> Result<ToolDefinition, McpError> {
    let schema = from_tool_server_schema(input_schema)?;
    Ok(ToolDefinition {
        name: name.to_string(),
        description: description.unwrap_or_default().to_string(),
        parameters: schema.to_value(),
    })
}

/// Listing entry (`name`, `description`, `inputSchema`) for a model-facing tool definition.
pub fn definition_to_tool_server(definition: &ToolDefinition) -> Result<Value, McpError> {
    let schema = from_tool_server_schema(&definition.parameters)?;
    Ok(json!({
        "name": definition.name,
        "description": definition.description,
        "inputSchema": to_tool_server_schema(&schema),
    }))
}
