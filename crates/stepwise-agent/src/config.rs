use std::collections::HashMap;
use std::time::Duration;

use crate::tools::{BASH_TOOL, CREATE_FILE_TOOL, EDIT_FILE_TOOL, VIEW_FILE_TOOL};

pub const DEFAULT_MODEL: &str = "glm-5";
pub const DEFAULT_SHELL: &str = "bash";

/// Runtime configuration shared by the workflow driver and each agent loop.
#[derive(Clone, Debug, PartialEq)]
pub struct AgentConfig {
    pub model: String,
    pub provider: Option<String>,
    /// Upper bound on request/response rounds in one loop. Zero disables the bound.
    pub max_iterations: usize,
    /// Upper bound on orchestrator rounds in one `run_goal`. Zero disables the bound.
    pub max_tasks: usize,
    pub request_timeout: Option<Duration>,
    pub command_timeout: Duration,
    /// Program that runs `bash` tool commands as `<shell> -c <command>`.
    pub shell: String,
    pub patch_timeout: Duration,
    pub tool_server_timeout: Duration,
    pub enable_context_refine: bool,
    pub tool_output_limits: HashMap<String, usize>,
    pub tool_line_limits: HashMap<String, usize>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            provider: None,
            max_iterations: 50,
            max_tasks: 20,
            request_timeout: Some(Duration::from_secs(300)),
            command_timeout: Duration::from_secs(120),
            shell: DEFAULT_SHELL.to_string(),
            patch_timeout: Duration::from_secs(30),
            tool_server_timeout: Duration::from_secs(60),
            enable_context_refine: false,
            tool_output_limits: default_tool_output_limits(),
            tool_line_limits: default_tool_line_limits(),
        }
    }
}

pub fn default_tool_output_limits() -> HashMap<String, usize> {
    HashMap::from([
        (VIEW_FILE_TOOL.to_string(), 50_000),
        (BASH_TOOL.to_string(), 30_000),
        (EDIT_FILE_TOOL.to_string(), 10_000),
        (CREATE_FILE_TOOL.to_string(), 1_000),
    ])
}

pub fn default_tool_line_limits() -> HashMap<String, usize> {
    HashMap::from([(BASH_TOOL.to_string(), 256)])
}
