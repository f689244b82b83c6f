use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Failures a tool reports back to the model. The registry renders every one into the result
/// envelope; `Substrate` additionally aborts the loop that dispatched it.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum ToolError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    State(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Execution(String),
    /// A process the tool depends on could not be started or driven.
    #[error("{0}")]
    Substrate(String),
}

impl ToolError {
    pub fn aborts_loop(&self) -> bool {
        matches!(self, ToolError::Substrate(_))
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Current Task {goal} not finished, can not create new task")]
    TaskInProgress { goal: String },
    #[error("There is no current task, can not finish task")]
    NoCurrentTask,
    #[error("There is no completed task to refine")]
    NoCompletedTask,
    #[error("context #{id} does not exist in task {task_id}")]
    ContextNotFound { task_id: usize, id: u32 },
    #[error("context #{id} already exists in task {task_id}")]
    ContextIdCollision { task_id: usize, id: u32 },
    #[error("context #{id} is listed more than once")]
    DuplicateContextId { id: u32 },
}

impl From<LedgerError> for ToolError {
    fn from(error: LedgerError) -> Self {
        ToolError::State(error.to_string())
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("tool with name {} already exist", .0.join(", "))]
    DuplicateName(Vec<String>),
}

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("error when parsing shell command: {0}")]
    Parse(String),
    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("git {command} failed: {message}")]
    Git { command: String, message: String },
    #[error("isolated index: {0}")]
    Index(#[source] std::io::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<SandboxError> for ToolError {
    fn from(error: SandboxError) -> Self {
        match error {
            SandboxError::Parse(_) => ToolError::Validation(error.to_string()),
            other => ToolError::Substrate(other.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum PatchError {
    #[error("malformed diff: {0}")]
    Parse(String),
    #[error("security violation: diff attempts to modify {found}, but only {expected} is allowed")]
    CrossFile { found: String, expected: String },
    #[error(
        "malformed diff: hunk at line {current} appears after hunk at line {previous} (must be in ascending order)"
    )]
    HunkOrder { previous: u64, current: u64 },
    #[error("dry run failed (context mismatch): {0}")]
    DryRun(String),
    #[error("final application failed: {0}")]
    Apply(String),
    #[error("failed to start patch: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("patch timed out after {0:?}")]
    Timeout(Duration),
}

impl From<PatchError> for ToolError {
    fn from(error: PatchError) -> Self {
        match error {
            PatchError::Parse(_) | PatchError::CrossFile { .. } | PatchError::HunkOrder { .. } => {
                ToolError::Validation(error.to_string())
            }
            PatchError::DryRun(_) => ToolError::State(error.to_string()),
            PatchError::Spawn(_) => ToolError::Substrate(error.to_string()),
            other => ToolError::Execution(other.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum McpError {
    #[error("failed to start tool server '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("tool server io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("tool server protocol error: {0}")]
    Protocol(String),
    #[error("tool server returned error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("tool server closed its output stream")]
    Closed,
    #[error("tool server did not answer within {0:?}")]
    Timeout(Duration),
    #[error("tool server {0} already exist")]
    DuplicateServer(String),
    #[error("tool server {0} not exist")]
    UnknownServer(String),
    #[error("{}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("\n"))]
    Multiple(Vec<McpError>),
}

impl From<McpError> for ToolError {
    fn from(error: McpError) -> Self {
        ToolError::Execution(error.to_string())
    }
}

/// Top-level error type for the stepwise-agent crate. Any of these aborts the running loop.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error(transparent)]
    Llm(#[from] stepwise_llm::SDKError),
    #[error("chat request timed out after {0:?}")]
    RequestTimeout(Duration),
    #[error("{role} loop exceeded {max_iterations} iterations")]
    TurnLimit { role: String, max_iterations: usize },
    #[error("workflow exceeded {max_tasks} tasks without finalizing")]
    TaskLimit { max_tasks: usize },
    #[error("agent loop aborted")]
    Aborted,
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Mcp(#[from] McpError),
    #[error("tool {tool} could not run: {message}")]
    ToolSubstrate { tool: String, message: String },
    #[error("audit sink error: {0}")]
    Audit(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
