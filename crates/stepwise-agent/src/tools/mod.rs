mod bash;
mod create_file;
mod edit_file;
mod registry;
mod task;
mod view_file;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use stepwise_llm::ToolDefinition;

use crate::ToolError;

pub use bash::{BashResult, bash_tool};
pub use create_file::{create_file, create_file_tool};
pub use edit_file::edit_file_tool;
pub use registry::{ToolExecutionRecord, ToolRegistry, render_envelope};
pub use task::{ContextEntryArgument, create_task_tool, finish_task_tool, refine_context_tool};
pub use view_file::{view_file, view_file_tool};

pub const CREATE_TASK_TOOL: &str = "create_task";
pub const FINISH_TASK_TOOL: &str = "finish_task";
pub const REFINE_CONTEXT_TOOL: &str = "refine_context";
pub const BASH_TOOL: &str = "bash";
pub const VIEW_FILE_TOOL: &str = "view_file";
pub const CREATE_FILE_TOOL: &str = "create_file";
pub const EDIT_FILE_TOOL: &str = "edit_file";

/// A named capability the model can call. `invoke` receives the raw argument text exactly as the
/// model produced it.
#[async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    async fn invoke(&self, raw_arguments: &str) -> Result<String, ToolError>;

    fn name(&self) -> String {
        self.definition().name
    }
}

pub type ToolFuture = Pin<Box<dyn Future<Output = Result<String, ToolError>> + Send>>;
pub type ToolExecutor = Arc<dyn Fn(String) -> ToolFuture + Send + Sync>;

/// Adapts a definition plus a closure into a [`Tool`].
#[derive(Clone)]
pub struct RegisteredTool {
    pub definition: ToolDefinition,
    pub executor: ToolExecutor,
}

#[async_trait]
impl Tool for RegisteredTool {
    fn definition(&self) -> ToolDefinition {
        self.definition.clone()
    }

    async fn invoke(&self, raw_arguments: &str) -> Result<String, ToolError> {
        (self.executor)(raw_arguments.to_string()).await
    }

    fn name(&self) -> String {
        self.definition.name.clone()
    }
}

fn parse_arguments(raw_arguments: &str) -> Result<Value, ToolError> {
    let trimmed = raw_arguments.trim();
    if trimmed.is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    let value: Value = serde_json::from_str(trimmed)
        .map_err(|error| ToolError::Validation(format!("invalid tool arguments JSON: {error}")))?;
    if !value.is_object() {
        return Err(ToolError::Validation(
            "tool arguments must be a JSON object".to_string(),
        ));
    }
    Ok(value)
}

fn decode_arguments<T: DeserializeOwned>(raw_arguments: &str) -> Result<T, ToolError> {
    let value = parse_arguments(raw_arguments)?;
    serde_json::from_value(value)
        .map_err(|error| ToolError::Validation(format!("invalid tool arguments: {error}")))
}

fn required_string_argument(arguments: &Value, key: &str) -> Result<String, ToolError> {
    optional_string_argument(arguments, key)?
        .ok_or_else(|| ToolError::Validation(format!("missing required argument '{}'", key)))
}

fn optional_string_argument(arguments: &Value, key: &str) -> Result<Option<String>, ToolError> {
    let Some(value) = arguments.get(key) else {
        return Ok(None);
    };
    if value.is_null() {
        return Ok(None);
    }
    let Some(value) = value.as_str() else {
        return Err(ToolError::Validation(format!(
            "argument '{}' must be a string",
            key
        )));
    };
    Ok(Some(value.to_string()))
}

fn required_u32_argument(arguments: &Value, key: &str) -> Result<u32, ToolError> {
    let Some(value) = arguments.get(key) else {
        return Err(ToolError::Validation(format!(
            "missing required argument '{}'",
            key
        )));
    };
    value
        .as_u64()
        .and_then(|value| u32::try_from(value).ok())
        .ok_or_else(|| {
            ToolError::Validation(format!("argument '{}' must be a positive integer", key))
        })
}

/// Relative paths resolve against the project root; absolute paths are used as given.
fn resolve_path(root: &Path, path: &str) -> PathBuf {
    let candidate = Path::new(path);
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        root.join(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_arguments_parse_as_empty_object() {
        assert_eq!(parse_arguments("  ").unwrap(), json!({}));
    }

    #[test]
    fn non_object_arguments_are_rejected() {
        let error = parse_arguments("[1,2]").unwrap_err();
        assert!(matches!(error, ToolError::Validation(_)));
        let error = parse_arguments("{not json").unwrap_err();
        assert!(matches!(error, ToolError::Validation(message) if message.contains("invalid tool arguments JSON")));
    }

    #[test]
    fn argument_helpers_report_type_errors() {
        let args = json!({ "cmd": 3, "id": -1 });
        assert!(matches!(
            required_string_argument(&args, "cmd"),
            Err(ToolError::Validation(message)) if message == "argument 'cmd' must be a string"
        ));
        assert!(required_u32_argument(&args, "id").is_err());
        assert!(matches!(
            required_string_argument(&args, "missing"),
            Err(ToolError::Validation(message)) if message == "missing required argument 'missing'"
        ));
    }

    #[test]
    fn relative_paths_resolve_under_root() {
        let root = Path::new("/work/repo");
        assert_eq!(resolve_path(root, "src/a.rs"), PathBuf::from("/work/repo/src/a.rs"));
        assert_eq!(resolve_path(root, "/etc/hosts"), PathBuf::from("/etc/hosts"));
    }
}
