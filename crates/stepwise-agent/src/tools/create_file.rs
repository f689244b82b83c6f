use serde::Deserialize;
use serde_json::json;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use stepwise_llm::ToolDefinition;
use tokio::io::AsyncWriteExt;

use super::{CREATE_FILE_TOOL, RegisteredTool, ToolFuture, decode_arguments, resolve_path};
use crate::ToolError;

#[derive(Debug, Deserialize)]
struct CreateFileArguments {
    path: String,
    content: String,
}

/// Writes a new file, creating missing parent directories. Never overwrites.
pub async fn create_file(root: &Path, path: &str, content: &str) -> Result<PathBuf, ToolError> {
    let target = resolve_path(root, path);
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|error| {
            ToolError::Execution(format!("failed to create directory structure: {error}"))
        })?;
    }

    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&target)
        .await
        .map_err(|error| match error.kind() {
            ErrorKind::AlreadyExists => ToolError::State(format!(
                "refusing to create file: '{path}' already exists (use an edit tool to modify existing files)"
            )),
            _ => ToolError::Execution(format!("failed to create {path}: {error}")),
        })?;
    file.write_all(content.as_bytes())
        .await
        .map_err(|error| ToolError::Execution(format!("failed to write file: {error}")))?;
    file.flush()
        .await
        .map_err(|error| ToolError::Execution(format!("failed to write file: {error}")))?;
    Ok(target)
}

pub fn create_file_tool(root: PathBuf) -> RegisteredTool {
    RegisteredTool {
        definition: ToolDefinition {
            name: CREATE_FILE_TOOL.to_string(),
            description: "Creates a new file at the specified path with the provided content. Fails if the file already exists.".to_string(),
            parameters: json!({
                "type": "object",
                "required": ["path", "content"],
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "Path of the new file, including filename and extension."
                    },
                    "content": {
                        "type": "string",
                        "description": "The full text content of the new file."
                    }
                },
                "additionalProperties": false
            }),
        },
        executor: Arc::new(move |raw: String| -> ToolFuture {
            let root = root.clone();
            Box::pin(async move {
                let args: CreateFileArguments = decode_arguments(&raw)?;
                create_file(&root, &args.path, &args.content).await?;
                Ok(format!("Create new file {} success", args.path))
            })
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::Tool;
    use tempfile::tempdir;

    #[tokio::test(flavor = "current_thread")]
    async fn creates_parents_and_refuses_overwrite() {
        let dir = tempdir().unwrap();
        let tool = create_file_tool(dir.path().to_path_buf());

        let output = tool
            .invoke(r#"{"path":"src/deep/new.rs","content":"fn main() {}\n"}"#)
            .await
            .unwrap();
        assert_eq!(output, "Create new file src/deep/new.rs success");
        assert_eq!(
            std::fs::read_to_string(dir.path().join("src/deep/new.rs")).unwrap(),
            "fn main() {}\n"
        );

        let error = tool
            .invoke(r#"{"path":"src/deep/new.rs","content":"other"}"#)
            .await
            .unwrap_err();
        assert_eq!(
            error,
            ToolError::State(
                "refusing to create file: 'src/deep/new.rs' already exists (use an edit tool to modify existing files)"
                    .to_string()
            )
        );
        assert_eq!(
            std::fs::read_to_string(dir.path().join("src/deep/new.rs")).unwrap(),
            "fn main() {}\n"
        );
    }
}
