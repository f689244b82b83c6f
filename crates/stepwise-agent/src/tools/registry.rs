use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use stepwise_llm::ToolDefinition;

use super::Tool;
use crate::schema::definition_to_tool_server;
use crate::{
    AgentConfig, AuditEvent, AuditSink, McpError, NoopAuditSink, OutputBudget, RegistryError,
    ToolError,
};

/// One audited tool invocation. `id` is the record's position in the registry's log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolExecutionRecord {
    pub id: usize,
    pub tool_name: String,
    pub raw_arguments: String,
    pub result: Result<String, ToolError>,
}

impl ToolExecutionRecord {
    pub fn envelope(&self) -> String {
        render_envelope(self.id, &self.result)
    }
}

/// Text block handed back to the model for one tool call.
pub fn render_envelope(log_id: usize, result: &Result<String, ToolError>) -> String {
    let mut out = format!("** Metadata **\nTOOL_LOG_ID: {log_id}\n** Status **\n");
    match result {
        Ok(output) => {
            out.push_str("Execute tool call success\n** Result **\n");
            out.push_str(output);
        }
        Err(error) => {
            out.push_str(&format!("Execute tool call failed, error: {error}\n"));
        }
    }
    out
}

#[derive(Clone)]
struct AuditScope {
    sink: Arc<dyn AuditSink>,
    loop_id: String,
    role: String,
}

/// Name-keyed tool table plus the append-only execution log of every dispatch.
#[derive(Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    log: Vec<ToolExecutionRecord>,
    config: AgentConfig,
    audit: AuditScope,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new(AgentConfig::default())
    }
}

impl ToolRegistry {
    pub fn new(config: AgentConfig) -> Self {
        Self {
            tools: HashMap::new(),
            log: Vec::new(),
            config,
            audit: AuditScope {
                sink: Arc::new(NoopAuditSink),
                loop_id: String::new(),
                role: String::new(),
            },
        }
    }

    /// Routes tool start/end events of subsequent dispatches to `sink`.
    pub fn attach_audit(
        &mut self,
        sink: Arc<dyn AuditSink>,
        loop_id: impl Into<String>,
        role: impl Into<String>,
    ) {
        self.audit = AuditScope {
            sink,
            loop_id: loop_id.into(),
            role: role.into(),
        };
    }

    /// Adds every tool whose name is free. Clashing names are collected into one error; the rest
    /// of the batch is still registered.
    pub fn register<I>(&mut self, tools: I) -> Result<(), RegistryError>
    where
        I: IntoIterator<Item = Arc<dyn Tool>>,
    {
        let mut duplicates = Vec::new();
        for tool in tools {
            let name = tool.name();
            if self.tools.contains_key(&name) {
                duplicates.push(name);
                continue;
            }
            self.tools.insert(name, tool);
        }
        if duplicates.is_empty() {
            Ok(())
        } else {
            Err(RegistryError::DuplicateName(duplicates))
        }
    }

    pub fn register_tool(&mut self, tool: impl Tool + 'static) -> Result<(), RegistryError> {
        self.register([Arc::new(tool) as Arc<dyn Tool>])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Tool schemas for the next chat request, ordered by name.
    pub fn export_schemas(&self) -> Vec<ToolDefinition> {
        let mut definitions: Vec<ToolDefinition> =
            self.tools.values().map(|tool| tool.definition()).collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    /// The same schemas as `tools/list` entries of a tool server.
    pub fn export_tool_server_listing(&self) -> Result<Vec<Value>, McpError> {
        self.export_schemas()
            .iter()
            .map(definition_to_tool_server)
            .collect()
    }

    pub fn log(&self) -> &[ToolExecutionRecord] {
        &self.log
    }

    pub fn reset_log(&mut self) {
        self.log.clear();
    }

    /// Runs one tool call and returns the envelope for the model. Unknown tools and tool failures
    /// become failure envelopes; every call appends exactly one log record.
    pub async fn dispatch(&mut self, tool_name: &str, raw_arguments: &str, call_id: &str) -> String {
        let log_id = self.log.len();
        let start_time = std::time::Instant::now();
        self.emit(AuditEvent::tool_call_start(
            &self.audit.loop_id,
            &self.audit.role,
            call_id,
            tool_name,
            raw_arguments,
        ));

        let result = match self.tools.get(tool_name).cloned() {
            Some(tool) => tool.invoke(raw_arguments).await,
            None => Err(ToolError::NotFound(format!(
                "Run tool call failed, Can not find tool with name {tool_name}"
            ))),
        };
        let duration_ms = start_time.elapsed().as_millis();

        match &result {
            Ok(output) => {
                tracing::debug!(tool = tool_name, log_id, duration_ms = duration_ms as u64, "tool call succeeded");
                self.emit(AuditEvent::tool_call_end(
                    &self.audit.loop_id,
                    &self.audit.role,
                    call_id,
                    log_id,
                    Some(output),
                    None,
                    duration_ms,
                ));
            }
            Err(error) => {
                tracing::info!(tool = tool_name, log_id, error = %error, "tool call failed");
                self.emit(AuditEvent::tool_call_end(
                    &self.audit.loop_id,
                    &self.audit.role,
                    call_id,
                    log_id,
                    None,
                    Some(&error.to_string()),
                    duration_ms,
                ));
            }
        }

        let model_view = result
            .as_ref()
            .map(|output| OutputBudget::for_tool(tool_name, &self.config).apply(output))
            .map_err(Clone::clone);
        self.log.push(ToolExecutionRecord {
            id: log_id,
            tool_name: tool_name.to_string(),
            raw_arguments: raw_arguments.to_string(),
            result,
        });
        render_envelope(log_id, &model_view)
    }

    fn emit(&self, event: AuditEvent) {
        if let Err(error) = self.audit.sink.emit(event) {
            tracing::warn!(error = %error, "dropping audit event");
        }
    }
}
