use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use stepwise_llm::ToolDefinition;
use tokio::sync::Mutex;

use super::client::McpClient;
use crate::ToolError;
use crate::tools::Tool;

/// A tool imported from a tool server. Calls are forwarded over the server's connection.
pub struct McpTool {
    server: String,
    definition: ToolDefinition,
    client: Arc<Mutex<McpClient>>,
}

impl McpTool {
    pub fn new(server: impl Into<String>, definition: ToolDefinition, client: Arc<Mutex<McpClient>>) -> Self {
        Self {
            server: server.into(),
            definition,
            client,
        }
    }

    pub fn server(&self) -> &str {
        &self.server
    }
}

#[async_trait]
impl Tool for McpTool {
    fn definition(&self) -> ToolDefinition {
        self.definition.clone()
    }

    async fn invoke(&self, raw_arguments: &str) -> Result<String, ToolError> {
        let arguments = if raw_arguments.trim().is_empty() {
            Value::Object(Map::new())
        } else {
            serde_json::from_str(raw_arguments).map_err(|error| {
                ToolError::Validation(format!("invalid tool arguments JSON: {error}"))
            })?
        };
        let result = self
            .client
            .lock()
            .await
            .call_tool(&self.definition.name, arguments)
            .await?;
        if result.is_error {
            return Err(ToolError::Execution(result.text.trim_end().to_string()));
        }
        Ok(result.text)
    }

    fn name(&self) -> String {
        self.definition.name.clone()
    }
}
