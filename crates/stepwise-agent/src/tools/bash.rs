use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use stepwise_llm::ToolDefinition;

use super::{BASH_TOOL, RegisteredTool, ToolFuture, decode_arguments};
use crate::ToolError;
use crate::sandbox::{ExecOutcome, SandboxedExecutor};

/// JSON shape of a `bash` tool result.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BashResult {
    pub exit_code: i32,
    pub output: String,
    pub modified_files: Vec<String>,
    pub created_files: Vec<String>,
    pub deleted_files: Vec<String>,
    pub timed_out: bool,
}

impl From<ExecOutcome> for BashResult {
    fn from(outcome: ExecOutcome) -> Self {
        Self {
            exit_code: outcome.exit_code,
            output: outcome.output,
            modified_files: outcome.changes.modified,
            created_files: outcome.changes.created,
            deleted_files: outcome.changes.deleted,
            timed_out: outcome.timed_out,
        }
    }
}

#[derive(Debug, Deserialize)]
struct BashArguments {
    cmd: String,
    #[serde(default)]
    dir: Option<String>,
}

pub fn bash_tool(executor: Arc<SandboxedExecutor>) -> RegisteredTool {
    RegisteredTool {
        definition: ToolDefinition {
            name: BASH_TOOL.to_string(),
            description: "Executes a bash command and returns the exit code, the combined stdout and stderr, and the files created, modified or deleted during execution. Use this for running tests, build scripts, or system diagnostics.".to_string(),
            parameters: json!({
                "type": "object",
                "required": ["cmd"],
                "properties": {
                    "cmd": {
                        "type": "string",
                        "description": "The full bash command string to execute."
                    },
                    "dir": {
                        "type": "string",
                        "description": "Working directory, relative to the project root. Defaults to the project root."
                    }
                },
                "additionalProperties": false
            }),
        },
        executor: Arc::new(move |raw: String| -> ToolFuture {
            let executor = executor.clone();
            Box::pin(async move {
                let args: BashArguments = decode_arguments(&raw)?;
                let dir = args.dir.as_deref().filter(|dir| !dir.is_empty()).map(Path::new);
                let outcome = executor.run(&args.cmd, dir).await?;
                let result = BashResult::from(outcome);
                serde_json::to_string(&result).map_err(|error| {
                    ToolError::Execution(format!("failed to encode bash result: {error}"))
                })
            })
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::Tool;
    use std::time::Duration;
    use tempfile::tempdir;

    #[tokio::test(flavor = "current_thread")]
    async fn result_is_reported_as_json() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/x.txt"), "x").unwrap();
        let tool = bash_tool(Arc::new(SandboxedExecutor::new(dir.path(), Duration::from_secs(10))));

        let output = tool.invoke(r#"{"cmd":"ls","dir":"sub"}"#).await.unwrap();
        let result: BashResult = serde_json::from_str(&output).unwrap();
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.output.trim(), "x.txt");
        assert!(!result.timed_out);
        assert!(result.created_files.is_empty());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn parse_errors_are_validation_failures() {
        let dir = tempdir().unwrap();
        let tool = bash_tool(Arc::new(SandboxedExecutor::new(dir.path(), Duration::from_secs(10))));
        let error = tool.invoke(r#"{"cmd":"cat 'open"}"#).await.unwrap_err();
        assert!(matches!(error, ToolError::Validation(message) if message.starts_with("error when parsing shell command")));
    }
}
