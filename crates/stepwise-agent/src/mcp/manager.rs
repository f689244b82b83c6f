use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use super::client::{McpClient, McpServerSpec};
use super::tool::McpTool;
use crate::McpError;
use crate::schema::definition_from_tool_server;
use crate::tools::Tool;

/// Running tool servers keyed by the name each reported at initialization.
pub struct McpManager {
    clients: BTreeMap<String, Arc<Mutex<McpClient>>>,
    timeout: Duration,
}

impl McpManager {
    pub fn new(timeout: Duration) -> Self {
        Self {
            clients: BTreeMap::new(),
            timeout,
        }
    }

    /// Starts a server and returns its reported name. A second server reporting a name already
    /// in use is shut down again and rejected.
    pub async fn connect(&mut self, spec: &McpServerSpec) -> Result<String, McpError> {
        let client = McpClient::spawn(spec, self.timeout).await?;
        let name = client.server_name().to_string();
        if self.clients.contains_key(&name) {
            if let Err(error) = client.close().await {
                tracing::warn!(server = %name, error = %error, "failed to stop duplicate tool server");
            }
            return Err(McpError::DuplicateServer(name));
        }
        self.clients.insert(name.clone(), Arc::new(Mutex::new(client)));
        Ok(name)
    }

    pub fn server_names(&self) -> Vec<String> {
        self.clients.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Lists every server's tools as registry endpoints. Failures from individual servers are
    /// collected; any failure fails the whole load.
    pub async fn load_all_tools(&self) -> Result<Vec<Arc<dyn Tool>>, McpError> {
        let mut tools: Vec<Arc<dyn Tool>> = Vec::new();
        let mut errors = Vec::new();
        for (server, client) in &self.clients {
            match Self::load_tools(server, client).await {
                Ok(loaded) => tools.extend(loaded),
                Err(error) => errors.push(error),
            }
        }
        if errors.is_empty() {
            Ok(tools)
        } else {
            Err(McpError::Multiple(errors))
        }
    }

    async fn load_tools(
        server: &str,
        client: &Arc<Mutex<McpClient>>,
    ) -> Result<Vec<Arc<dyn Tool>>, McpError> {
        let listed = client.lock().await.list_tools().await?;
        let mut tools: Vec<Arc<dyn Tool>> = Vec::with_capacity(listed.len());
        for info in listed {
            let definition = definition_from_tool_server(
                &info.name,
                info.description.as_deref(),
                &info.input_schema,
            )?;
            tools.push(Arc::new(McpTool::new(server, definition, client.clone())));
        }
        tracing::debug!(server, tools = tools.len(), "loaded tool server tools");
        Ok(tools)
    }

    pub async fn close_server(&mut self, name: &str) -> Result<(), McpError> {
        let client = self
            .clients
            .remove(name)
            .ok_or_else(|| McpError::UnknownServer(name.to_string()))?;
        close_client(client).await
    }

    /// Stops every server, reporting all failures together.
    pub async fn close_all(&mut self) -> Result<(), McpError> {
        let mut errors = Vec::new();
        for (_, client) in std::mem::take(&mut self.clients) {
            if let Err(error) = close_client(client).await {
                errors.push(error);
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(McpError::Multiple(errors))
        }
    }
}

/// Tools still holding the connection keep the process alive until they are dropped.
async fn close_client(client: Arc<Mutex<McpClient>>) -> Result<(), McpError> {
    match Arc::try_unwrap(client) {
        Ok(client) => client.into_inner().close().await,
        Err(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::client::fake_server_spec;
    use crate::tools::ToolRegistry;

    #[tokio::test(flavor = "current_thread")]
    async fn imported_tools_dispatch_through_the_registry() {
        let mut manager = McpManager::new(Duration::from_secs(10));
        let name = manager.connect(&fake_server_spec("files")).await.unwrap();
        assert_eq!(name, "files");

        let tools = manager.load_all_tools().await.unwrap();
        let mut registry = ToolRegistry::default();
        registry.register(tools).unwrap();
        assert_eq!(registry.names(), vec!["shout"]);

        let envelope = registry.dispatch("shout", r#"{"text":"hello"}"#, "call-1").await;
        assert!(envelope.ends_with("** Result **\nHELLO\nWORLD\n"));

        drop(registry);
        manager.close_all().await.unwrap();
        assert!(manager.is_empty());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn servers_reporting_the_same_name_are_rejected() {
        let mut manager = McpManager::new(Duration::from_secs(10));
        manager.connect(&fake_server_spec("dup")).await.unwrap();
        let error = manager.connect(&fake_server_spec("dup")).await.unwrap_err();
        assert!(matches!(error, McpError::DuplicateServer(name) if name == "dup"));
        assert_eq!(manager.server_names(), vec!["dup"]);

        let error = manager.close_server("missing").await.unwrap_err();
        assert!(matches!(error, McpError::UnknownServer(_)));
        manager.close_server("dup").await.unwrap();
    }
}
