//! Orchestrator / worker / context-refine rounds over one shared ledger.

use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use stepwise_llm::Client;

use crate::agent_loop::{AbortHandle, AgentLoop};
use crate::ledger::{SharedLedger, TaskLedger};
use crate::mcp::{McpManager, McpServerSpec};
use crate::patch::PatchApplier;
use crate::sandbox::SandboxedExecutor;
use crate::tools::{
    RegisteredTool, Tool, bash_tool, create_file_tool, create_task_tool, edit_file_tool,
    finish_task_tool, refine_context_tool, view_file_tool,
};
use crate::{
    AgentConfig, AgentError, AgentRole, AuditSink, NoopAuditSink, ToolExecutionRecord,
    ToolRegistry,
};

pub struct Workflow {
    repo_root: PathBuf,
    ledger: SharedLedger,
    client: Arc<Client>,
    config: AgentConfig,
    audit: Arc<dyn AuditSink>,
    executor: Arc<SandboxedExecutor>,
    applier: Arc<PatchApplier>,
    tool_servers: McpManager,
    abort: AbortHandle,
}

impl Workflow {
    pub fn new(repo_root: impl Into<PathBuf>, client: Arc<Client>, config: AgentConfig) -> Self {
        let repo_root = repo_root.into();
        Self {
            executor: Arc::new(
                SandboxedExecutor::new(repo_root.clone(), config.command_timeout)
                    .with_shell(config.shell.clone()),
            ),
            applier: Arc::new(PatchApplier::new(repo_root.clone(), config.patch_timeout)),
            tool_servers: McpManager::new(config.tool_server_timeout),
            ledger: TaskLedger::shared(""),
            repo_root,
            client,
            config,
            audit: Arc::new(NoopAuditSink),
            abort: AbortHandle::new(),
        }
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn ledger(&self) -> SharedLedger {
        self.ledger.clone()
    }

    /// Aborting interrupts whichever loop is running; the next `run_goal` starts clear.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Starts a tool server whose tools join the worker and context-refine loops.
    pub async fn connect_tool_server(&mut self, spec: &McpServerSpec) -> Result<String, AgentError> {
        let name = self.tool_servers.connect(spec).await?;
        tracing::info!(server = %name, command = %spec.command, "tool server connected");
        Ok(name)
    }

    pub fn tool_server_names(&self) -> Vec<String> {
        self.tool_servers.server_names()
    }

    /// Tools a `role` loop would be offered, shaped as a tool server's `tools/list` result.
    pub async fn tool_listing(&self, role: AgentRole) -> Result<Value, AgentError> {
        let external = self.tool_servers.load_all_tools().await?;
        let registry = self.registry_for(role, &external)?;
        Ok(json!({ "tools": registry.export_tool_server_listing()? }))
    }

    /// Decomposes `goal` into tasks until the orchestrator answers without leaving one open.
    pub async fn run_goal(&mut self, goal: &str) -> Result<String, AgentError> {
        if goal.trim().is_empty() {
            return Err(AgentError::InvalidConfiguration(
                "goal must not be empty".to_string(),
            ));
        }
        self.abort.clear();
        self.ledger.lock().await.reset(goal);
        let external = self.tool_servers.load_all_tools().await?;
        tracing::info!(external_tools = external.len(), "workflow started");

        let mut rounds = 0usize;
        loop {
            if self.config.max_tasks > 0 && rounds >= self.config.max_tasks {
                return Err(AgentError::TaskLimit {
                    max_tasks: self.config.max_tasks,
                });
            }
            rounds += 1;

            if !self.ledger.lock().await.has_current_task() {
                let orchestrator = self.run_role(AgentRole::Orchestrator, &[]).await?;
                if !self.ledger.lock().await.has_current_task() {
                    tracing::info!(rounds, "workflow finalized");
                    return Ok(orchestrator.0);
                }
            }

            let (_, worker_log) = self.run_role(AgentRole::Worker, &external).await?;
            if self.ledger.lock().await.has_current_task() {
                tracing::info!(rounds, "task still open after worker loop");
                continue;
            }
            if self.config.enable_context_refine {
                let prompt = self.ledger.lock().await.render_refine_prompt(&worker_log);
                self.run_role_with_context(AgentRole::ContextRefine, prompt, &external)
                    .await?;
            }
        }
    }

    /// Closes every tool server and the audit sink.
    pub async fn shutdown(&mut self) -> Result<(), AgentError> {
        let servers = self.tool_servers.close_all().await;
        self.audit.close()?;
        servers.map_err(AgentError::from)
    }

    async fn run_role(
        &self,
        role: AgentRole,
        external: &[Arc<dyn Tool>],
    ) -> Result<(String, Vec<ToolExecutionRecord>), AgentError> {
        let context = self.ledger.lock().await.render_context_prompt();
        self.run_role_with_context(role, context, external).await
    }

    async fn run_role_with_context(
        &self,
        role: AgentRole,
        context: String,
        external: &[Arc<dyn Tool>],
    ) -> Result<(String, Vec<ToolExecutionRecord>), AgentError> {
        let registry = self.registry_for(role, external)?;
        let mut agent = AgentLoop::new(
            role,
            context,
            registry,
            self.client.clone(),
            self.config.clone(),
            self.audit.clone(),
        )
        .with_abort_handle(self.abort.clone());
        let outcome = agent.run().await?;
        let log = agent.into_registry().log().to_vec();
        Ok((outcome.final_message, log))
    }

    fn registry_for(
        &self,
        role: AgentRole,
        external: &[Arc<dyn Tool>],
    ) -> Result<ToolRegistry, AgentError> {
        let mut registry = ToolRegistry::new(self.config.clone());
        let ledger = self.ledger.clone();
        let builtin: Vec<RegisteredTool> = match role {
            AgentRole::Orchestrator => vec![create_task_tool(ledger)],
            AgentRole::Worker => vec![
                finish_task_tool(ledger),
                bash_tool(self.executor.clone()),
                view_file_tool(self.repo_root.clone()),
                create_file_tool(self.repo_root.clone()),
                edit_file_tool(self.applier.clone()),
            ],
            AgentRole::ContextRefine => vec![refine_context_tool(ledger)],
        };
        registry.register(
            builtin
                .into_iter()
                .map(|tool| Arc::new(tool) as Arc<dyn Tool>),
        )?;
        if role != AgentRole::Orchestrator {
            registry.register(external.iter().cloned())?;
        }
        Ok(registry)
    }
}
